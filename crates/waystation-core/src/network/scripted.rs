//! In-memory network with scripted replies.
//!
//! Used by tests and offline demos to exercise strategies without a server.
//! Every request is recorded so callers can assert on what reached the
//! network.

use super::fetcher::Fetcher;
use crate::error::{Error, Result};
use crate::request::{Request, Response};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// What the scripted network does for a URL.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(Response),
    /// Transport failure with the given message.
    Fail(String),
    /// Wait, then behave like the inner reply.
    Delay(Duration, Box<Reply>),
}

/// Network stand-in keyed by exact URL string.
///
/// URLs without a script answer 404.
#[derive(Default)]
pub struct ScriptedNetwork {
    replies: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<Request>>,
    offline: AtomicBool,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a reply for `url`, replacing any previous one.
    pub fn script(&self, url: &str, reply: Reply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.insert(url.to_string(), reply);
        }
    }

    /// Answer `url` with a 200 response carrying `body`.
    pub fn respond(&self, url: &str, body: &'static str) {
        self.script(url, Reply::Respond(Response::ok(body)));
    }

    /// Fail every fetch of `url` with a transport error.
    pub fn fail(&self, url: &str) {
        self.script(url, Reply::Fail(format!("connection refused: {}", url)));
    }

    /// Fail every fetch regardless of script while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every request fetched so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// Number of fetches whose URL equals `url`.
    pub fn requests_to(&self, url: &str) -> usize {
        self.requests
            .lock()
            .map(|r| r.iter().filter(|req| req.url.as_str() == url).count())
            .unwrap_or_default()
    }

    pub fn clear_requests(&self) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.clear();
        }
    }
}

#[async_trait]
impl Fetcher for ScriptedNetwork {
    async fn fetch(&self, request: &Request, _timeout: Option<Duration>) -> Result<Response> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network {
                message: format!("offline: {}", request.url),
                status: None,
            });
        }

        let reply = self
            .replies
            .lock()
            .ok()
            .and_then(|replies| replies.get(request.url.as_str()).cloned());

        let mut reply = match reply {
            Some(reply) => reply,
            None => return Ok(Response::new(404, "not found")),
        };

        loop {
            match reply {
                Reply::Respond(response) => return Ok(response),
                Reply::Fail(message) => {
                    return Err(Error::Network {
                        message,
                        status: None,
                    })
                }
                Reply::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}
