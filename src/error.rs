use crate::dispatch::RequestState;
use crate::frame::FrameError;
use crate::grid::GridError;
use crate::propagation::PropagationError;
use crate::tle::TleError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XpropError {
    #[error("Request id is missing")]
    MissingRequestId,

    #[error("Request contains no tasks")]
    EmptyTaskList,

    #[error("Task {task_id} has no time grid and the request has no common time grid")]
    MissingTimeGrid { task_id: u64 },

    #[error(transparent)]
    Tle(#[from] TleError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Propagation(#[from] PropagationError),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Request {req_id} exceeded its budget of {budget} propagation failures")]
    DivergenceBudgetExceeded { req_id: u64, budget: usize },

    #[error("Invalid request transition from {from:?} to {to:?}")]
    InvalidTransition { from: RequestState, to: RequestState },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Worker failed: {0}")]
    WorkerFailed(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl XpropError {
    /// Stable code carried by wire-level error markers
    pub fn code(&self) -> ErrorCode {
        match self {
            XpropError::MissingRequestId => ErrorCode::MissingRequestId,
            XpropError::EmptyTaskList => ErrorCode::EmptyTaskList,
            XpropError::MissingTimeGrid { .. } => ErrorCode::InvalidRange,
            XpropError::Tle(_) => ErrorCode::MalformedTle,
            XpropError::Grid(e) => e.code(),
            XpropError::Frame(_) => ErrorCode::UnsupportedFrame,
            XpropError::Propagation(e) => e.code(),
            XpropError::InvalidTime(_) => ErrorCode::EpochOutOfRange,
            _ => ErrorCode::Internal,
        }
    }

    /// Errors caused by the caller's input rather than by the service
    pub fn is_invalid_request(&self) -> bool {
        !matches!(
            self,
            XpropError::DivergenceBudgetExceeded { .. }
                | XpropError::InvalidTransition { .. }
                | XpropError::Cancelled
                | XpropError::WorkerFailed(_)
                | XpropError::MetricsError(_)
                | XpropError::ConfigError(_)
                | XpropError::IoError(_)
                | XpropError::SerializationError(_)
        )
    }
}

/// Error codes shared with the wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Unspecified = 0,
    MalformedTle = 1,
    InvalidStep = 2,
    InvalidStepFormat = 3,
    EpochOutOfRange = 4,
    EmptyTaskList = 5,
    PropagationDivergence = 6,
    OrbitalDecay = 7,
    UnsupportedFrame = 8,
    InvalidRange = 9,
    MissingRequestId = 10,
    Internal = 11,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unspecified => "unspecified",
            ErrorCode::MalformedTle => "malformed_tle",
            ErrorCode::InvalidStep => "invalid_step",
            ErrorCode::InvalidStepFormat => "invalid_step_format",
            ErrorCode::EpochOutOfRange => "epoch_out_of_range",
            ErrorCode::EmptyTaskList => "empty_task_list",
            ErrorCode::PropagationDivergence => "propagation_divergence",
            ErrorCode::OrbitalDecay => "orbital_decay",
            ErrorCode::UnsupportedFrame => "unsupported_frame",
            ErrorCode::InvalidRange => "invalid_range",
            ErrorCode::MissingRequestId => "missing_request_id",
            ErrorCode::Internal => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, XpropError>;
