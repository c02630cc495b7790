//! The deployment scope an engine controls.

use super::InterceptionEngine;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Holds the engine currently controlling request routing.
///
/// The host owns one scope per deployment and passes it to
/// [`InterceptionEngine::on_activate`]; at most one engine is its
/// controller at a time.
#[derive(Default)]
pub struct DeploymentScope {
    controller: RwLock<Option<Arc<InterceptionEngine>>>,
}

impl DeploymentScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current controller, if any.
    pub async fn controller(&self) -> Option<Arc<InterceptionEngine>> {
        self.controller.read().await.clone()
    }

    /// Install `engine` as controller and return the one it replaced.
    ///
    /// The replaced engine is returned as-is; retiring it is the caller's job.
    pub async fn take_over(
        &self,
        engine: Arc<InterceptionEngine>,
    ) -> Option<Arc<InterceptionEngine>> {
        self.controller.write().await.replace(engine)
    }

    /// Remove the controller, leaving the scope uncontrolled.
    pub async fn release(&self) -> Option<Arc<InterceptionEngine>> {
        self.controller.write().await.take()
    }
}

impl std::fmt::Debug for DeploymentScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let controller = self
            .controller
            .try_read()
            .map(|c| c.as_ref().map(|e| e.id().to_string()))
            .unwrap_or(None);
        f.debug_struct("DeploymentScope")
            .field("controller", &controller)
            .finish()
    }
}
