//! Wire-level grid descriptions and their resolution into [`TimeGrid`]s

use super::{parse_iso_duration, GridError, TimeGrid};
use crate::time::{from_ds50, Epoch, SECONDS_PER_DAY};
use chrono::TimeDelta;
use std::sync::Arc;

/// Dynamic steps place this many points in one nodal period
pub const DYNAMIC_STEPS_PER_PERIOD: f64 = 90.0;

/// How a request asked for its epochs to be spaced
#[derive(Debug, Clone, PartialEq)]
pub enum StepSpec {
    /// ISO-8601 duration, e.g. `PT8.5M`
    Period(String),
    /// Step in days
    Days(f64),
    /// Derived from each satellite's orbital period
    Dynamic,
    Explicit(Vec<Epoch>),
}

/// Time grid as received: each bound may be UTC or DS50
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridSpec {
    pub start_utc: Option<Epoch>,
    pub start_ds50: Option<f64>,
    pub end_utc: Option<Epoch>,
    pub end_ds50: Option<f64>,
    pub step: Option<StepSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannedStep {
    Every(TimeDelta),
    Dynamic,
    Explicit(Arc<[Epoch]>),
}

/// A validated grid that may still need a satellite to fix its step
#[derive(Debug, Clone, PartialEq)]
pub struct GridPlan {
    pub start: Epoch,
    pub end: Epoch,
    pub step: PlannedStep,
}

impl GridSpec {
    /// Validate bounds and step. Everything except a dynamic step is resolved here.
    pub fn plan(&self) -> Result<GridPlan, GridError> {
        let explicit = match &self.step {
            Some(StepSpec::Explicit(epochs)) => Some(epochs.as_slice()),
            _ => None,
        };

        let start = resolve_bound("start", self.start_utc, self.start_ds50)?
            .or_else(|| explicit.and_then(|e| e.iter().min().copied()));
        let end = resolve_bound("end", self.end_utc, self.end_ds50)?
            .or_else(|| explicit.and_then(|e| e.iter().max().copied()));
        let (start, end) = match (start, end) {
            (Some(start), Some(end)) => (start, end),
            (None, _) => return Err(GridError::InvalidRange("grid has no start time".to_string())),
            (_, None) => return Err(GridError::InvalidRange("grid has no end time".to_string())),
        };
        if start > end {
            return Err(GridError::InvalidRange(format!(
                "start {} is after end {}",
                start, end
            )));
        }

        let step = match &self.step {
            None => return Err(GridError::InvalidStep("grid has no time step".to_string())),
            Some(StepSpec::Period(period)) => {
                let step = parse_iso_duration(period)?;
                PlannedStep::Every(step)
            }
            Some(StepSpec::Days(days)) => PlannedStep::Every(days_to_step(*days)?),
            Some(StepSpec::Dynamic) => PlannedStep::Dynamic,
            Some(StepSpec::Explicit(epochs)) => {
                // Range and ordering checks happen once, here
                let grid = TimeGrid::explicit(start, end, epochs.clone())?;
                match grid.step {
                    super::Step::Explicit(epochs) => PlannedStep::Explicit(epochs),
                    super::Step::Every(step) => PlannedStep::Every(step),
                }
            }
        };

        let plan = GridPlan { start, end, step };
        if let PlannedStep::Every(step) = plan.step {
            TimeGrid::every(start, end, step)?;
        }
        Ok(plan)
    }
}

impl GridPlan {
    /// Fix the step for a satellite with the given nodal period
    pub fn build(&self, period_minutes: f64) -> Result<TimeGrid, GridError> {
        match &self.step {
            PlannedStep::Every(step) => TimeGrid::every(self.start, self.end, *step),
            PlannedStep::Dynamic => {
                TimeGrid::every(self.start, self.end, dynamic_step(period_minutes)?)
            }
            PlannedStep::Explicit(epochs) => TimeGrid::explicit(self.start, self.end, epochs.to_vec()),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.step, PlannedStep::Dynamic)
    }
}

fn resolve_bound(
    which: &str,
    utc: Option<Epoch>,
    ds50: Option<f64>,
) -> Result<Option<Epoch>, GridError> {
    match (utc, ds50) {
        (Some(_), Some(_)) => Err(GridError::InvalidRange(format!(
            "{} time is given both in UTC and DS50, use only one",
            which
        ))),
        (Some(utc), None) => Ok(Some(utc)),
        (None, Some(ds50)) => from_ds50(ds50).map(Some).ok_or_else(|| {
            GridError::InvalidRange(format!("{} time {} DS50 is not representable", which, ds50))
        }),
        (None, None) => Ok(None),
    }
}

fn seconds_to_step(seconds: f64) -> Option<TimeDelta> {
    let nanos = (seconds * 1e9).round();
    if !nanos.is_finite() || nanos.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(TimeDelta::nanoseconds(nanos as i64))
}

fn days_to_step(days: f64) -> Result<TimeDelta, GridError> {
    match seconds_to_step(days * SECONDS_PER_DAY) {
        Some(step) if step > TimeDelta::zero() => Ok(step),
        _ => Err(GridError::InvalidStep(format!(
            "DS50 step must be a positive number of days, got {}",
            days
        ))),
    }
}

fn dynamic_step(period_minutes: f64) -> Result<TimeDelta, GridError> {
    match seconds_to_step(period_minutes * 60.0 / DYNAMIC_STEPS_PER_PERIOD) {
        Some(step) if step > TimeDelta::zero() => Ok(step),
        _ => Err(GridError::InvalidStep(format!(
            "cannot derive a step from orbital period {} min",
            period_minutes
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use chrono::{TimeZone, Utc};

    fn utc(d: u32, h: u32) -> Epoch {
        Utc.with_ymd_and_hms(2025, 12, d, h, 0, 0).unwrap()
    }

    fn spec(step: StepSpec) -> GridSpec {
        GridSpec {
            start_utc: Some(utc(18, 0)),
            end_utc: Some(utc(28, 0)),
            step: Some(step),
            ..GridSpec::default()
        }
    }

    #[test]
    fn test_period_step() {
        let plan = spec(StepSpec::Period("PT8.5M".to_string())).plan().unwrap();
        assert_eq!(plan.step, PlannedStep::Every(TimeDelta::seconds(510)));
        assert_eq!(plan.build(90.0).unwrap().len(), 1695);
    }

    #[test]
    fn test_ds50_bounds_and_day_step() {
        let grid = GridSpec {
            start_ds50: Some(27744.5),
            end_ds50: Some(27745.5),
            step: Some(StepSpec::Days(0.25)),
            ..GridSpec::default()
        };
        let plan = grid.plan().unwrap();
        assert_eq!(plan.start, utc(18, 0));
        assert_eq!(plan.end, utc(19, 0));
        assert_eq!(plan.build(90.0).unwrap().len(), 5);
    }

    #[test]
    fn test_mixed_bounds() {
        let grid = GridSpec {
            start_ds50: Some(27744.5),
            end_utc: Some(utc(18, 1)),
            step: Some(StepSpec::Period("PT1M".to_string())),
            ..GridSpec::default()
        };
        assert_eq!(grid.plan().unwrap().build(90.0).unwrap().len(), 61);
    }

    #[test]
    fn test_conflicting_bounds_rejected() {
        let mut grid = spec(StepSpec::Days(1.0));
        grid.start_ds50 = Some(27744.5);
        assert_eq!(grid.plan().unwrap_err().code(), ErrorCode::InvalidRange);
    }

    #[test]
    fn test_missing_parts_rejected() {
        let mut grid = spec(StepSpec::Days(1.0));
        grid.end_utc = None;
        assert_eq!(grid.plan().unwrap_err().code(), ErrorCode::InvalidRange);

        let mut grid = spec(StepSpec::Days(1.0));
        grid.step = None;
        assert_eq!(grid.plan().unwrap_err().code(), ErrorCode::InvalidStep);
    }

    #[test]
    fn test_invalid_steps() {
        assert_eq!(spec(StepSpec::Days(0.0)).plan().unwrap_err().code(), ErrorCode::InvalidStep);
        assert_eq!(spec(StepSpec::Days(-1.0)).plan().unwrap_err().code(), ErrorCode::InvalidStep);
        assert_eq!(spec(StepSpec::Days(f64::NAN)).plan().unwrap_err().code(), ErrorCode::InvalidStep);
        assert_eq!(
            spec(StepSpec::Period("PT0S".to_string())).plan().unwrap_err().code(),
            ErrorCode::InvalidStep
        );
        assert_eq!(
            spec(StepSpec::Period("8 minutes".to_string())).plan().unwrap_err().code(),
            ErrorCode::InvalidStepFormat
        );
    }

    #[test]
    fn test_dynamic_step_uses_period() {
        let plan = spec(StepSpec::Dynamic).plan().unwrap();
        assert!(plan.is_dynamic());

        // 90 minute period gives one-minute spacing
        let grid = GridSpec {
            start_utc: Some(utc(18, 0)),
            end_utc: Some(utc(18, 1)),
            step: Some(StepSpec::Dynamic),
            ..GridSpec::default()
        }
        .plan()
        .unwrap()
        .build(90.0)
        .unwrap();
        assert_eq!(grid.len(), 61);
        assert_eq!(dynamic_step(0.0).unwrap_err().code(), ErrorCode::InvalidStep);
    }

    #[test]
    fn test_explicit_without_bounds_uses_extremes() {
        let grid = GridSpec {
            step: Some(StepSpec::Explicit(vec![utc(20, 0), utc(19, 0), utc(20, 0)])),
            ..GridSpec::default()
        };
        let plan = grid.plan().unwrap();
        assert_eq!(plan.start, utc(19, 0));
        assert_eq!(plan.end, utc(20, 0));
        assert_eq!(plan.build(90.0).unwrap().len(), 2);
    }

    #[test]
    fn test_explicit_out_of_bounds() {
        let grid = spec(StepSpec::Explicit(vec![utc(29, 0)]));
        assert_eq!(grid.plan().unwrap_err().code(), ErrorCode::EpochOutOfRange);
    }
}
