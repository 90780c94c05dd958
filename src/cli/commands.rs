use crate::cache::SatelliteCache;
use crate::cli::Commands;
use crate::dispatch::{
    DispatchSettings, Dispatcher, EphemChunk, EphemPoint, EphemRequest, EphemTask, PropRequest,
    PropTime,
};
use crate::error::XpropError;
use crate::frame::Frame;
use crate::grid::{GridSpec, StepSpec};
use crate::metrics::ServiceMetrics;
use crate::time::Epoch;
use crate::tle::{self, Satellite};
use crate::Result;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::path::Path;
use tracing::info;

pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Check { file } => handle_check(&file),
        Commands::Prop {
            tle,
            time,
            mse,
            frame,
        } => handle_prop(&tle, &time, mse, &frame),
        Commands::Ephem {
            tle,
            start,
            end,
            step,
            frame,
            chunk_size,
        } => handle_ephem(&tle, &start, &end, step, &frame, chunk_size).await,
    }
}

#[derive(Serialize)]
struct PointOutput {
    epoch: Epoch,
    ds50: f64,
    mse: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<[f64; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    velocity: Option<[f64; 3]>,
    stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&EphemPoint> for PointOutput {
    fn from(point: &EphemPoint) -> Self {
        let (frame, position, velocity, stale, error) = match &point.state {
            Ok(state) => (
                Some(state.frame.to_string()),
                Some(state.position),
                Some(state.velocity),
                state.stale,
                None,
            ),
            Err(e) => (None, None, None, false, Some(e.to_string())),
        };
        Self {
            epoch: point.epoch,
            ds50: point.ds50,
            mse: point.mse,
            frame,
            position,
            velocity,
            stale,
            error,
        }
    }
}

#[derive(Serialize)]
struct ChunkOutput {
    task_id: u64,
    stream_id: u32,
    stream_chunk_id: u32,
    points_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_error: Option<String>,
    points: Vec<PointOutput>,
}

impl From<&EphemChunk> for ChunkOutput {
    fn from(chunk: &EphemChunk) -> Self {
        Self {
            task_id: chunk.task_id,
            stream_id: chunk.stream_id,
            stream_chunk_id: chunk.stream_chunk_id,
            points_count: chunk.points_count(),
            task_error: chunk.task_error.as_ref().map(|e| e.to_string()),
            points: chunk.points.iter().map(PointOutput::from).collect(),
        }
    }
}

fn read_satellites(path: &Path) -> Result<Vec<Satellite>> {
    let text = std::fs::read_to_string(path)?;
    let satellites = tle::parse_sets(&text)?;
    if satellites.is_empty() {
        return Err(XpropError::EmptyTaskList);
    }
    Ok(satellites)
}

fn parse_utc(value: &str) -> Result<Epoch> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| XpropError::InvalidTime(format!("{}: {}", value, e)))
}

fn dispatcher(chunk_size: usize) -> Result<Dispatcher> {
    let settings = DispatchSettings {
        chunk_size,
        ..DispatchSettings::default()
    };
    Ok(Dispatcher::new(
        SatelliteCache::default(),
        settings,
        ServiceMetrics::new()?,
    ))
}

fn handle_check(file: &Path) -> Result<()> {
    info!("Checking element sets in {}", file.display());
    let satellites = read_satellites(file)?;

    let mut first_error = None;
    let mut valid = 0;
    for satellite in &satellites {
        match satellite.elements() {
            Ok(elements) => {
                valid += 1;
                println!("{}", serde_json::to_string_pretty(&elements)?);
            }
            Err(e) => {
                eprintln!("{} ({}): {}", satellite.norad_id, satellite.name, e);
                first_error.get_or_insert(e);
            }
        }
    }

    println!("{} of {} element sets valid", valid, satellites.len());
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn handle_prop(tle: &Path, time: &str, mse: bool, frame: &str) -> Result<()> {
    let satellite = read_satellites(tle)?.remove(0);
    let frame: Frame = frame.parse()?;

    let time = if mse {
        PropTime::Mse(
            time.parse()
                .map_err(|_| XpropError::InvalidTime(format!("minutes `{}`", time)))?,
        )
    } else {
        match time.parse::<f64>() {
            Ok(ds50) => PropTime::Ds50(ds50),
            Err(_) => PropTime::Utc(parse_utc(time)?),
        }
    };

    let response = dispatcher(crate::stream::DEFAULT_CHUNK_SIZE)?.prop(PropRequest {
        req_id: 1,
        ephem_type: frame.code(),
        time,
        satellite,
    })?;
    println!(
        "{}",
        serde_json::to_string_pretty(&PointOutput::from(&response.point))?
    );
    Ok(())
}

async fn handle_ephem(
    tle: &Path,
    start: &str,
    end: &str,
    step: Option<String>,
    frame: &str,
    chunk_size: usize,
) -> Result<()> {
    let satellites = read_satellites(tle)?;
    let frame: Frame = frame.parse()?;
    let grid = GridSpec {
        start_utc: Some(parse_utc(start)?),
        end_utc: Some(parse_utc(end)?),
        step: Some(step.map_or(StepSpec::Dynamic, StepSpec::Period)),
        ..GridSpec::default()
    };

    let tasks = satellites
        .into_iter()
        .enumerate()
        .map(|(i, satellite)| EphemTask {
            task_id: i as u64 + 1,
            satellite,
            grid: None,
        })
        .collect();

    let mut stream = dispatcher(chunk_size)?.ephem(EphemRequest {
        req_id: 1,
        ephem_type: frame.code(),
        common_grid: Some(grid),
        tasks,
    })?;

    let mut points = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        points += chunk.points_count();
        println!("{}", serde_json::to_string(&ChunkOutput::from(&chunk))?);
    }
    info!("Wrote {} points", points);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAT_65271: &str = "XPROP-TEST\n\
        1 65271U 25183A   25282.36302114 0.00010000  00000-0  55866-4 0    07\n\
        2 65271  48.7951   8.5514 0002000  85.4867 277.3551 15.78566782    05\n";

    fn tle_file(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_utc() {
        let epoch = parse_utc("2025-12-18T00:00:00Z").unwrap();
        assert_eq!(crate::time::to_ds50(epoch), 27744.5);
        assert!(matches!(parse_utc("yesterday"), Err(XpropError::InvalidTime(_))));
    }

    #[test]
    fn test_read_satellites() {
        let file = tle_file(SAT_65271);
        let satellites = read_satellites(file.path()).unwrap();
        assert_eq!(satellites.len(), 1);
        assert_eq!(satellites[0].name, "XPROP-TEST");
        assert_eq!(satellites[0].norad_id, 65271);

        let empty = tle_file("\n");
        assert!(matches!(
            read_satellites(empty.path()),
            Err(XpropError::EmptyTaskList)
        ));
    }

    #[test]
    fn test_check_reports_invalid_sets() {
        let good = tle_file(SAT_65271);
        assert!(handle_check(good.path()).is_ok());

        let bad = tle_file(&SAT_65271.replace("48.7951", "48.7952"));
        assert!(matches!(handle_check(bad.path()), Err(XpropError::Tle(_))));
    }

    #[test]
    fn test_prop_command() {
        let file = tle_file(SAT_65271);
        assert!(handle_prop(file.path(), "27744.5", false, "j2k").is_ok());
        assert!(handle_prop(file.path(), "2025-12-18T00:00:00Z", false, "eci").is_ok());
        assert!(handle_prop(file.path(), "90", true, "eci").is_ok());
        assert!(matches!(
            handle_prop(file.path(), "90", false, "gcrf"),
            Err(XpropError::Frame(_))
        ));
    }

    #[tokio::test]
    async fn test_ephem_command() {
        let file = tle_file(SAT_65271);
        handle_ephem(
            file.path(),
            "2025-12-18T00:00:00Z",
            "2025-12-18T01:00:00Z",
            Some("PT1M".to_string()),
            "eci",
            25,
        )
        .await
        .unwrap();
    }

    #[test]
    fn test_point_output_error() {
        let point = EphemPoint {
            epoch: parse_utc("2025-12-18T00:00:00Z").unwrap(),
            ds50: 27744.5,
            mse: 0.0,
            state: Err(crate::propagation::PropagationError::OrbitalDecay {
                minutes: 0.0,
                reason: "perigee below threshold".to_string(),
            }),
        };
        let json = serde_json::to_value(PointOutput::from(&point)).unwrap();
        assert!(json.get("position").is_none());
        assert!(json["error"].as_str().unwrap().len() > 0);
    }
}
