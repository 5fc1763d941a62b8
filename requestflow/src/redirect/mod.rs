//! Redirect policy: decides, per hop, whether and how a redirect is followed.

mod hop;
mod registry;

pub use hop::next_hop;
use hop::upgrade_insecure;
pub use registry::{RedirectRegistration, RedirectRegistry};

use crate::interceptors::ChallengeConfig;
use crate::task::TaskId;
use crate::transport::HttpResponse;
use reqwest::Request;
use std::sync::Arc;
use tracing::{debug, info};

/// Per-request redirect override.
pub trait RedirectHandler: Send + Sync {
    /// Returns the request to follow, or `None` to stop at `response`.
    fn redirect(&self, response: &HttpResponse, next: Request) -> Option<Request>;
}

impl<F> RedirectHandler for F
where
    F: Fn(&HttpResponse, Request) -> Option<Request> + Send + Sync,
{
    fn redirect(&self, response: &HttpResponse, next: Request) -> Option<Request> {
        self(response, next)
    }
}

/// Pipeline-wide redirect policy.
///
/// Insecure targets are upgraded to `https` first, so handlers only ever
/// see the upgraded request. Challenge-check targets are refused before any
/// handler is consulted.
#[derive(Debug)]
pub struct RedirectPolicy {
    challenge: Arc<ChallengeConfig>,
    handlers: Arc<RedirectRegistry>,
}

impl RedirectPolicy {
    /// Creates a policy refusing the check paths of `challenge`.
    #[must_use]
    pub fn new(challenge: Arc<ChallengeConfig>, handlers: Arc<RedirectRegistry>) -> Self {
        Self { challenge, handlers }
    }

    /// Returns the per-request handler registry.
    #[must_use]
    pub const fn handlers(&self) -> &Arc<RedirectRegistry> {
        &self.handlers
    }

    /// Decides the next hop of the request `task_id` after `response`.
    pub fn decide(&self, task_id: TaskId, response: &HttpResponse, mut next: Request) -> Option<Request> {
        upgrade_insecure(next.url_mut());

        if self.challenge.is_check_path(next.url()) {
            info!(url = %next.url(), "Refusing redirect to challenge check path");
            return None;
        }

        match self.handlers.handler(task_id) {
            Some(handler) => {
                let decided = handler.redirect(response, next);
                if decided.is_none() {
                    debug!(task = %task_id, "Redirect handler refused redirect");
                }
                decided
            }
            None => Some(next),
        }
    }
}
