//! Time grid expansion
//!
//! A [`TimeGrid`] is a validated `[start, end]` range with either a fixed step
//! or an explicit list of epochs. [`TimeGrid::expand`] yields the epochs lazily;
//! it can be called any number of times and never materialises a stepped grid.

mod duration;
mod spec;

pub use duration::parse_iso_duration;
pub use spec::{GridPlan, GridSpec, PlannedStep, StepSpec, DYNAMIC_STEPS_PER_PERIOD};

use crate::error::ErrorCode;
use crate::time::Epoch;
use chrono::TimeDelta;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("Invalid time step: {0}")]
    InvalidStep(String),

    #[error("Invalid time step format `{value}`: {reason}")]
    InvalidStepFormat { value: String, reason: &'static str },

    #[error("Epoch {epoch} is outside the grid range [{start}, {end}]")]
    EpochOutOfRange { epoch: Epoch, start: Epoch, end: Epoch },

    #[error("Invalid grid range: {0}")]
    InvalidRange(String),
}

impl GridError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GridError::InvalidStep(_) => ErrorCode::InvalidStep,
            GridError::InvalidStepFormat { .. } => ErrorCode::InvalidStepFormat,
            GridError::EpochOutOfRange { .. } => ErrorCode::EpochOutOfRange,
            GridError::InvalidRange(_) => ErrorCode::InvalidRange,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Fixed spacing from `start`
    Every(TimeDelta),
    /// Sorted, deduplicated epochs within the range
    Explicit(Arc<[Epoch]>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeGrid {
    start: Epoch,
    end: Epoch,
    step: Step,
    len: usize,
}

impl TimeGrid {
    pub fn new(start: Epoch, end: Epoch, step: Step) -> Result<Self, GridError> {
        match step {
            Step::Every(step) => Self::every(start, end, step),
            Step::Explicit(epochs) => Self::explicit(start, end, epochs.to_vec()),
        }
    }

    /// Stepped grid: `start`, `start + step`, ... up to and including `end`
    pub fn every(start: Epoch, end: Epoch, step: TimeDelta) -> Result<Self, GridError> {
        if start > end {
            return Err(GridError::InvalidRange(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        if step <= TimeDelta::zero() {
            return Err(GridError::InvalidStep(format!(
                "step must be positive, got {}",
                step
            )));
        }

        let span = (end - start)
            .num_nanoseconds()
            .ok_or_else(|| GridError::InvalidRange("grid span is too long".to_string()))?;
        // step fits in i64 nanoseconds whenever it is no longer than the span
        let len = match step.num_nanoseconds() {
            Some(step_ns) => span / step_ns + 1,
            None => 1,
        };

        Ok(Self {
            start,
            end,
            step: Step::Every(step),
            len: len as usize,
        })
    }

    /// Explicit grid; epochs are sorted and deduplicated
    pub fn explicit(start: Epoch, end: Epoch, mut epochs: Vec<Epoch>) -> Result<Self, GridError> {
        if start > end {
            return Err(GridError::InvalidRange(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        if let Some(epoch) = epochs.iter().find(|e| **e < start || **e > end) {
            return Err(GridError::EpochOutOfRange {
                epoch: *epoch,
                start,
                end,
            });
        }

        epochs.sort_unstable();
        epochs.dedup();
        let len = epochs.len();

        Ok(Self {
            start,
            end,
            step: Step::Explicit(epochs.into()),
            len,
        })
    }

    pub fn start(&self) -> Epoch {
        self.start
    }

    pub fn end(&self) -> Epoch {
        self.end
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    /// Number of epochs the grid expands to
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lazily expand the grid into its epochs
    pub fn expand(&self) -> Epochs {
        let kind = match &self.step {
            Step::Every(step) => EpochsKind::Stepped {
                start: self.start,
                step_ns: step.num_nanoseconds().unwrap_or(i64::MAX),
            },
            Step::Explicit(epochs) => EpochsKind::Explicit(Arc::clone(epochs)),
        };
        Epochs {
            kind,
            next: 0,
            len: self.len,
        }
    }
}

impl IntoIterator for &TimeGrid {
    type Item = Epoch;
    type IntoIter = Epochs;

    fn into_iter(self) -> Self::IntoIter {
        self.expand()
    }
}

#[derive(Debug, Clone)]
enum EpochsKind {
    Stepped { start: Epoch, step_ns: i64 },
    Explicit(Arc<[Epoch]>),
}

/// Iterator over the epochs of a [`TimeGrid`]
#[derive(Debug, Clone)]
pub struct Epochs {
    kind: EpochsKind,
    next: usize,
    len: usize,
}

impl Iterator for Epochs {
    type Item = Epoch;

    fn next(&mut self) -> Option<Epoch> {
        if self.next >= self.len {
            return None;
        }
        let i = self.next;
        self.next += 1;

        match &self.kind {
            EpochsKind::Stepped { start, step_ns } => {
                // i * step never exceeds the validated span
                Some(*start + TimeDelta::nanoseconds(*step_ns * i as i64))
            }
            EpochsKind::Explicit(epochs) => epochs.get(i).copied(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Epochs {}
