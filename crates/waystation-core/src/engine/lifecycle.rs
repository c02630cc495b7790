//! Engine lifecycle states.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one engine instance.
///
/// Transitions only move forward: Installing -> Activating -> Active ->
/// Terminated. Any state may jump straight to Terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Created; warm-up has not completed yet.
    Installing = 0,
    /// Warm-up done; waiting to take over the deployment scope.
    Activating = 1,
    /// Controlling the scope and handling requests.
    Active = 2,
    /// Retired; declines every request.
    Terminated = 3,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Installing => "installing",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
            LifecycleState::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic wrapper for LifecycleState.
pub(crate) struct AtomicLifecycleState(AtomicU8);

impl AtomicLifecycleState {
    pub(crate) fn new(state: LifecycleState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> LifecycleState {
        Self::decode(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn store(&self, state: LifecycleState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Fail with `InvalidState` unless the current state is `expected`.
    pub(crate) fn ensure(&self, expected: LifecycleState) -> Result<()> {
        let actual = self.load();
        if actual == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected: expected.as_str(),
                actual: actual.as_str(),
            })
        }
    }

    /// Move from `from` to `to`, failing if another transition got there first.
    pub(crate) fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<()> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|actual| Error::InvalidState {
                expected: from.as_str(),
                actual: Self::decode(actual).as_str(),
            })
    }

    fn decode(raw: u8) -> LifecycleState {
        match raw {
            0 => LifecycleState::Installing,
            1 => LifecycleState::Activating,
            2 => LifecycleState::Active,
            _ => LifecycleState::Terminated,
        }
    }
}
