//! Hooks invoked around every cluster round trip.

use crate::error::SearchError;
use crate::transport::{EngineRequest, EngineResponse};
use std::time::Duration;
use trawler_log::{debug, warn};

/// Observes requests sent through a [`crate::Session`].
///
/// All methods default to doing nothing, so implementors override only what
/// they need.
pub trait RequestObserver: Send + Sync {
    /// Called before a request is handed to the transport.
    fn on_request(&self, _request: &EngineRequest) {}

    /// Called after any response, including error statuses.
    fn on_response(&self, _request: &EngineRequest, _response: &EngineResponse, _elapsed: Duration) {
    }

    /// Called when no response could be obtained.
    fn on_error(&self, _request: &EngineRequest, _error: &SearchError, _elapsed: Duration) {}
}

/// Logs each round trip. Used by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl RequestObserver for LoggingObserver {
    fn on_request(&self, request: &EngineRequest) {
        debug!("-> {}", request.endpoint());
    }

    fn on_response(&self, request: &EngineRequest, response: &EngineResponse, elapsed: Duration) {
        debug!(
            "<- {} {} in {}ms",
            request.endpoint(),
            response.status,
            elapsed.as_millis()
        );
    }

    fn on_error(&self, request: &EngineRequest, error: &SearchError, elapsed: Duration) {
        warn!(
            "{} failed after {}ms: {}",
            request.endpoint(),
            elapsed.as_millis(),
            error
        );
    }
}

/// Ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RequestObserver for NoopObserver {}
