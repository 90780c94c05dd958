use crate::error::ErrorCode;
use crate::grid::{GridError, GridSpec};
use crate::propagation::{PropagationError, StateVector};
use crate::time::Epoch;
use crate::tle::{Satellite, TleError};
use thiserror::Error;

/// Target time of a single propagation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropTime {
    /// Minutes since the element set epoch
    Mse(f64),
    /// Days since 1950-01-01T12:00:00Z
    Ds50(f64),
    Utc(Epoch),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropRequest {
    pub req_id: u64,
    /// Wire `EphemType`; 0 selects TEME
    pub ephem_type: i32,
    pub time: PropTime,
    pub satellite: Satellite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EphemTask {
    pub task_id: u64,
    pub satellite: Satellite,
    /// Overrides the request's common grid
    pub grid: Option<GridSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EphemRequest {
    pub req_id: u64,
    pub ephem_type: i32,
    pub common_grid: Option<GridSpec>,
    pub tasks: Vec<EphemTask>,
}

/// One evaluated epoch. Failures keep their epoch and carry the error instead of a state.
#[derive(Debug, Clone, PartialEq)]
pub struct EphemPoint {
    pub epoch: Epoch,
    pub ds50: f64,
    /// Minutes since the element set epoch
    pub mse: f64,
    pub state: Result<StateVector, PropagationError>,
}

impl EphemPoint {
    pub fn is_error(&self) -> bool {
        self.state.is_err()
    }
}

/// Why a task produced no points at all
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error(transparent)]
    Tle(#[from] TleError),

    /// The satellite's orbit yields no usable dynamic step
    #[error(transparent)]
    Grid(#[from] GridError),
}

impl TaskError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TaskError::Tle(_) => ErrorCode::MalformedTle,
            TaskError::Grid(e) => e.code(),
        }
    }
}

/// One message of a task's ephemeris stream
#[derive(Debug, Clone, PartialEq)]
pub struct EphemChunk {
    pub req_id: u64,
    /// Zero-based index of the task within the request
    pub stream_id: u32,
    pub task_id: u64,
    pub stream_chunk_id: u32,
    pub points: Vec<EphemPoint>,
    /// Set when the task could not be propagated at all
    pub task_error: Option<TaskError>,
}

impl EphemChunk {
    pub fn points_count(&self) -> usize {
        self.points.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropResponse {
    pub req_id: u64,
    pub point: EphemPoint,
}
