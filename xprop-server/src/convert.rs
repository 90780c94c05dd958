//! Conversions between `api.v1` wire messages and dispatcher types

use chrono::DateTime;
use tonic::Status;
use xprop::dispatch::{
    EphemChunk, EphemPoint, EphemRequest, EphemTask, PropRequest, PropResponse, PropTime,
};
use xprop::grid::{GridSpec, StepSpec};
use xprop::time::Epoch;
use xprop::tle::Satellite;
use xprop::XpropError;
use xprop_proto::ephem_time_grid::TimeStepType;
use xprop_proto as pb;

pub fn epoch_from_timestamp(ts: &prost_types::Timestamp) -> Result<Epoch, XpropError> {
    u32::try_from(ts.nanos)
        .ok()
        .and_then(|nanos| DateTime::from_timestamp(ts.seconds, nanos))
        .ok_or_else(|| {
            XpropError::InvalidTime(format!("timestamp {}s {}ns", ts.seconds, ts.nanos))
        })
}

pub fn timestamp_from_epoch(epoch: Epoch) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: epoch.timestamp(),
        nanos: epoch.timestamp_subsec_nanos() as i32,
    }
}

/// A missing satellite is kept as an empty element set so it fails as a task
pub fn satellite_from_proto(sat: Option<&pb::Satellite>) -> Satellite {
    let Some(sat) = sat else {
        return Satellite::new("", "", "");
    };
    let mut satellite = Satellite::new(sat.name.clone(), sat.tle_ln1.clone(), sat.tle_ln2.clone());
    if sat.norad_id != 0 {
        satellite.norad_id = sat.norad_id;
    }
    satellite
}

pub fn grid_from_proto(grid: &pb::EphemTimeGrid) -> Result<GridSpec, XpropError> {
    let step = match &grid.time_step_type {
        None | Some(TimeStepType::DynamicTimeStep(false)) => None,
        Some(TimeStepType::KnownTimeStepPeriod(period)) => Some(StepSpec::Period(period.clone())),
        Some(TimeStepType::KnownTimeStepDs50(days)) => Some(StepSpec::Days(*days)),
        Some(TimeStepType::DynamicTimeStep(true)) => Some(StepSpec::Dynamic),
        Some(TimeStepType::ExplicitTimes(explicit)) => Some(StepSpec::Explicit(
            explicit
                .times
                .iter()
                .map(epoch_from_timestamp)
                .collect::<Result<_, _>>()?,
        )),
    };

    Ok(GridSpec {
        start_utc: grid.time_start_utc.as_ref().map(epoch_from_timestamp).transpose()?,
        start_ds50: grid.time_start_ds50,
        end_utc: grid.time_end_utc.as_ref().map(epoch_from_timestamp).transpose()?,
        end_ds50: grid.time_end_ds50,
        step,
    })
}

pub fn prop_request_from_proto(req: pb::PropRequest) -> Result<PropRequest, XpropError> {
    let task = req
        .task
        .ok_or_else(|| XpropError::InvalidTime("request has no task".to_string()))?;

    let time = match &task.time_utc {
        Some(_) if task.time > 0.0 => {
            return Err(XpropError::InvalidTime(format!(
                "time {} given in DS50 or MSE alongside a UTC time",
                task.time
            )))
        }
        Some(ts) => PropTime::Utc(epoch_from_timestamp(ts)?),
        None => match pb::TimeType::try_from(req.time_type) {
            Ok(pb::TimeType::TimeMse) => PropTime::Mse(task.time),
            Ok(pb::TimeType::TimeDs50) => PropTime::Ds50(task.time),
            Err(_) => {
                return Err(XpropError::InvalidTime(format!(
                    "unknown time type {}",
                    req.time_type
                )))
            }
        },
    };

    Ok(PropRequest {
        req_id: req.req_id,
        ephem_type: req.ephem_type,
        time,
        satellite: satellite_from_proto(task.sat.as_ref()),
    })
}

pub fn ephem_request_from_proto(req: pb::EphemRequest) -> Result<EphemRequest, XpropError> {
    let common_grid = req.common_time_grid.as_ref().map(grid_from_proto).transpose()?;
    let tasks = req
        .tasks
        .iter()
        .map(|task| {
            Ok(EphemTask {
                task_id: task.task_id,
                satellite: satellite_from_proto(task.sat.as_ref()),
                grid: task.time_grid.as_ref().map(grid_from_proto).transpose()?,
            })
        })
        .collect::<Result<Vec<_>, XpropError>>()?;

    Ok(EphemRequest {
        req_id: req.req_id,
        ephem_type: req.ephem_type,
        common_grid,
        tasks,
    })
}

/// Failed points keep their times, carry zeroed vectors and a `PointError`
pub fn point_to_proto(point: &EphemPoint) -> pb::EphemerisData {
    let mut data = pb::EphemerisData {
        ds50_time: point.ds50,
        mse_time: point.mse,
        ..Default::default()
    };
    match &point.state {
        Ok(state) => {
            [data.x, data.y, data.z] = state.position;
            [data.vx, data.vy, data.vz] = state.velocity;
            data.stale = state.stale;
        }
        Err(e) => {
            data.error = Some(pb::PointError {
                code: e.code() as i32,
                message: e.to_string(),
            });
        }
    }
    data
}

pub fn chunk_to_proto(chunk: &EphemChunk) -> pb::EphemResponse {
    pb::EphemResponse {
        req_id: chunk.req_id,
        result: Some(pb::EphemOut {
            task_id: chunk.task_id,
            ephem_points_count: chunk.points_count() as u32,
            ephem_data: chunk.points.iter().map(point_to_proto).collect(),
            error: chunk.task_error.as_ref().map(|e| pb::TaskError {
                code: e.code() as i32,
                message: e.to_string(),
            }),
        }),
        stream_id: chunk.stream_id,
        stream_chunk_id: chunk.stream_chunk_id,
    }
}

pub fn prop_response_to_proto(response: &PropResponse) -> pb::PropResponse {
    pb::PropResponse {
        req_id: response.req_id,
        result: Some(point_to_proto(&response.point)),
    }
}

pub fn status_from_error(e: &XpropError) -> Status {
    match e {
        XpropError::Cancelled => Status::cancelled(e.to_string()),
        e if e.is_invalid_request() => Status::invalid_argument(e.to_string()),
        _ => Status::internal(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tonic::Code;
    use xprop::dispatch::TaskError;
    use xprop::frame::Frame;
    use xprop::grid::GridError;
    use xprop::propagation::{PropagationError, StateVector};
    use xprop::tle::TleError;

    const L1: &str = "1 65271U 25183A   25282.36302114 0.00010000  00000-0  55866-4 0    07";
    const L2: &str = "2 65271  48.7951   8.5514 0002000  85.4867 277.3551 15.78566782    05";

    fn ts(seconds: i64) -> prost_types::Timestamp {
        prost_types::Timestamp { seconds, nanos: 0 }
    }

    #[test]
    fn test_timestamp_round_trip() {
        let epoch = Utc.with_ymd_and_hms(2025, 12, 18, 0, 0, 0).unwrap();
        let converted = timestamp_from_epoch(epoch);
        assert_eq!(epoch_from_timestamp(&converted).unwrap(), epoch);

        let bad = prost_types::Timestamp {
            seconds: 0,
            nanos: -1,
        };
        assert!(epoch_from_timestamp(&bad).is_err());
    }

    #[test]
    fn test_grid_from_proto() {
        let grid = pb::EphemTimeGrid {
            time_start_utc: Some(ts(1_766_016_000)),
            time_end_utc: None,
            time_start_ds50: None,
            time_end_ds50: Some(27754.5),
            time_step_type: Some(TimeStepType::KnownTimeStepPeriod("PT8.5M".to_string())),
        };
        let spec = grid_from_proto(&grid).unwrap();
        assert_eq!(
            spec.start_utc,
            Some(Utc.with_ymd_and_hms(2025, 12, 18, 0, 0, 0).unwrap())
        );
        assert_eq!(spec.end_ds50, Some(27754.5));
        assert_eq!(spec.step, Some(StepSpec::Period("PT8.5M".to_string())));

        let dynamic = pb::EphemTimeGrid {
            time_step_type: Some(TimeStepType::DynamicTimeStep(true)),
            ..grid.clone()
        };
        assert_eq!(grid_from_proto(&dynamic).unwrap().step, Some(StepSpec::Dynamic));

        let off = pb::EphemTimeGrid {
            time_step_type: Some(TimeStepType::DynamicTimeStep(false)),
            ..grid
        };
        assert_eq!(grid_from_proto(&off).unwrap().step, None);
    }

    #[test]
    fn test_prop_request_time_selection() {
        let mut req = pb::PropRequest {
            req_id: 3,
            time_type: pb::TimeType::TimeDs50 as i32,
            task: Some(pb::PropTask {
                time: 27744.5,
                time_utc: None,
                sat: Some(pb::Satellite {
                    norad_id: 0,
                    name: "sat".to_string(),
                    tle_ln1: L1.to_string(),
                    tle_ln2: L2.to_string(),
                }),
            }),
            ephem_type: 0,
        };
        let converted = prop_request_from_proto(req.clone()).unwrap();
        assert_eq!(converted.time, PropTime::Ds50(27744.5));
        assert_eq!(converted.satellite.norad_id, 65271);

        // A UTC time excludes a DS50/MSE time
        if let Some(task) = req.task.as_mut() {
            task.time_utc = Some(ts(0));
        }
        assert!(matches!(
            prop_request_from_proto(req.clone()),
            Err(XpropError::InvalidTime(_))
        ));

        if let Some(task) = req.task.as_mut() {
            task.time = 0.0;
        }
        let converted = prop_request_from_proto(req.clone()).unwrap();
        assert!(matches!(converted.time, PropTime::Utc(_)));

        req.task = None;
        assert!(prop_request_from_proto(req).is_err());
    }

    #[test]
    fn test_error_point_is_zeroed() {
        let point = EphemPoint {
            epoch: Utc.with_ymd_and_hms(2025, 12, 18, 0, 0, 0).unwrap(),
            ds50: 27744.5,
            mse: 100277.25,
            state: Err(PropagationError::Divergence {
                minutes: 100277.25,
                reason: "eccentricity out of range".to_string(),
            }),
        };
        let data = point_to_proto(&point);
        assert_eq!(data.ds50_time, 27744.5);
        assert_eq!([data.x, data.vz], [0.0, 0.0]);
        let error = data.error.unwrap();
        assert_eq!(error.code, pb::ErrorCode::PropagationDivergence as i32);
    }

    #[test]
    fn test_point_values() {
        let epoch = Utc.with_ymd_and_hms(2025, 12, 18, 0, 0, 0).unwrap();
        let point = EphemPoint {
            epoch,
            ds50: 27744.5,
            mse: 1.0,
            state: Ok(StateVector {
                epoch,
                position: [1.0, 2.0, 3.0],
                velocity: [4.0, 5.0, 6.0],
                frame: Frame::Teme,
                stale: true,
            }),
        };
        let data = point_to_proto(&point);
        assert_eq!([data.x, data.y, data.z], [1.0, 2.0, 3.0]);
        assert_eq!([data.vx, data.vy, data.vz], [4.0, 5.0, 6.0]);
        assert!(data.stale);
        assert!(data.error.is_none());
    }

    #[test]
    fn test_task_error_chunk() {
        let chunk = EphemChunk {
            req_id: 1,
            stream_id: 2,
            task_id: 30,
            stream_chunk_id: 0,
            points: Vec::new(),
            task_error: Some(TaskError::Tle(TleError::Malformed {
                field: "line1",
                reason: "bad checksum".to_string(),
            })),
        };
        let response = chunk_to_proto(&chunk);
        let result = response.result.unwrap();
        assert_eq!(result.ephem_points_count, 0);
        assert_eq!(result.error.unwrap().code, pb::ErrorCode::MalformedTle as i32);
        assert_eq!(response.stream_id, 2);

        let grid_chunk = EphemChunk {
            task_error: Some(TaskError::Grid(GridError::InvalidStep(
                "cannot derive a step from orbital period NaN min".to_string(),
            ))),
            ..chunk
        };
        let result = chunk_to_proto(&grid_chunk).result.unwrap();
        assert_eq!(result.error.unwrap().code, pb::ErrorCode::InvalidStep as i32);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_from_error(&XpropError::EmptyTaskList).code(), Code::InvalidArgument);
        assert_eq!(status_from_error(&XpropError::Cancelled).code(), Code::Cancelled);
        assert_eq!(
            status_from_error(&XpropError::DivergenceBudgetExceeded { req_id: 1, budget: 2 }).code(),
            Code::Internal
        );
    }
}
