use crate::error::XpropError;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Processing stage of a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    Received,
    Validating,
    Expanding,
    Propagating,
    Streaming,
    Completed,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Failed)
    }

    /// Forward transitions; `Failed` is handled separately
    fn can_advance_to(&self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Received, Validating)
                | (Validating, Expanding)
                | (Expanding, Propagating)
                | (Propagating, Streaming)
                | (Propagating, Completed)
                | (Streaming, Completed)
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Received => "received",
            RequestState::Validating => "validating",
            RequestState::Expanding => "expanding",
            RequestState::Propagating => "propagating",
            RequestState::Streaming => "streaming",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// State machine tracking one request from arrival to completion
#[derive(Debug)]
pub struct RequestLifecycle {
    req_id: u64,
    rpc: &'static str,
    state: RequestState,
    started: Instant,
}

impl RequestLifecycle {
    pub fn new(req_id: u64, rpc: &'static str) -> Self {
        debug!("{} request {} received", rpc, req_id);
        Self {
            req_id,
            rpc,
            state: RequestState::Received,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn req_id(&self) -> u64 {
        self.req_id
    }

    pub fn rpc(&self) -> &'static str {
        self.rpc
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn advance(&mut self, next: RequestState) -> Result<(), XpropError> {
        if !self.state.can_advance_to(next) {
            return Err(XpropError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(
            "{} request {}: {} -> {}",
            self.rpc, self.req_id, self.state, next
        );
        self.state = next;
        Ok(())
    }

    /// Move to `Failed` unless the request already finished
    pub fn fail(&mut self, reason: &dyn fmt::Display) {
        if self.state.is_terminal() {
            return;
        }
        debug!(
            "{} request {}: {} -> failed ({})",
            self.rpc, self.req_id, self.state, reason
        );
        self.state = RequestState::Failed;
    }
}
