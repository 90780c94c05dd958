//! gRPC server implementation
//!
//! Implements `api.v1.Propagator` on top of the [`Dispatcher`].

use crate::convert::{
    chunk_to_proto, ephem_request_from_proto, prop_request_from_proto, prop_response_to_proto,
    status_from_error, timestamp_from_epoch,
};
use chrono::Utc;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use tokio_stream::{Stream, StreamExt};
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, info, Level};
use xprop::dispatch::Dispatcher;
use xprop_proto::{
    EphemRequest, EphemResponse, InfoResponse, PropRequest, PropResponse, Propagator,
    PropagatorServer,
};

pub const SERVICE_NAME: &str = "XPropagator Server";

/// Build metadata reported by `Info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: String,
    pub commit: String,
    pub build_date: String,
}

impl BuildInfo {
    /// Values stamped into this binary at compile time
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: env!("XPROP_COMMIT").to_string(),
            build_date: env!("XPROP_BUILD_DATE").to_string(),
        }
    }
}

pub struct PropagatorService {
    dispatcher: Dispatcher,
    build: BuildInfo,
}

impl PropagatorService {
    pub fn new(dispatcher: Dispatcher, build: BuildInfo) -> Self {
        Self { dispatcher, build }
    }
}

#[tonic::async_trait]
impl Propagator for PropagatorService {
    async fn info(&self, _request: Request<()>) -> Result<Response<InfoResponse>, Status> {
        Ok(Response::new(InfoResponse {
            name: SERVICE_NAME.to_string(),
            version: self.build.version.clone(),
            commit: self.build.commit.clone(),
            build_date: self.build.build_date.clone(),
            astro_std_lib_info: format!("xprop {} (WGS-72, IAU-76/80)", xprop::VERSION),
            sgp4_lib_info: "sgp4 crate 2.x (SGP4/SDP4, WGS-72, IAU sidereal time)".to_string(),
            timestamp: Some(timestamp_from_epoch(Utc::now())),
        }))
    }

    async fn prop(&self, request: Request<PropRequest>) -> Result<Response<PropResponse>, Status> {
        let req = prop_request_from_proto(request.into_inner())
            .map_err(|e| status_from_error(&e))?;
        let response = self
            .dispatcher
            .prop(req)
            .map_err(|e| status_from_error(&e))?;
        Ok(Response::new(prop_response_to_proto(&response)))
    }

    type EphemStream = Pin<Box<dyn Stream<Item = Result<EphemResponse, Status>> + Send + 'static>>;

    async fn ephem(
        &self,
        request: Request<EphemRequest>,
    ) -> Result<Response<Self::EphemStream>, Status> {
        let req = ephem_request_from_proto(request.into_inner())
            .map_err(|e| status_from_error(&e))?;
        let stream = self
            .dispatcher
            .ephem(req)
            .map_err(|e| status_from_error(&e))?;

        // Dropping the stream on client disconnect cancels the request
        let stream = stream.map(|item| {
            item.map(|chunk| chunk_to_proto(&chunk))
                .map_err(|e| status_from_error(&e))
        });
        Ok(Response::new(Box::pin(stream)))
    }
}

/// Reflection over the `api.v1` and health descriptors
pub fn reflection_builder() -> tonic_reflection::server::Builder<'static> {
    tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(xprop_proto::FILE_DESCRIPTOR_SET)
        .register_encoded_file_descriptor_set(tonic_health::pb::FILE_DESCRIPTOR_SET)
}

/// Serve the propagator and health services on `addr` until `shutdown` resolves
pub async fn serve<F>(
    addr: SocketAddr,
    dispatcher: Dispatcher,
    build: BuildInfo,
    reflection: bool,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send,
{
    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<PropagatorServer<PropagatorService>>()
        .await;

    let reflection = if reflection {
        info!("gRPC server reflection enabled");
        Some(reflection_builder().build_v1()?)
    } else {
        None
    };

    let service = PropagatorService::new(dispatcher, build);

    // Logs every unary and streaming call with its method and latency
    let trace = TraceLayer::new_for_grpc()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    info!("Starting gRPC server on {}", addr);
    Server::builder()
        .layer(trace)
        .add_service(health_service)
        .add_optional_service(reflection)
        .add_service(PropagatorServer::new(service))
        .serve_with_shutdown(addr, shutdown)
        .await?;
    debug!("gRPC server stopped accepting calls");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use xprop::cache::SatelliteCache;
    use xprop::dispatch::DispatchSettings;
    use xprop::metrics::ServiceMetrics;
    use xprop_proto::ephem_time_grid::TimeStepType;
    use xprop_proto::{EphemTask, EphemTimeGrid, EphemType, PropTask, Satellite, TimeType};

    const L1: &str = "1 65271U 25183A   25282.36302114 0.00010000  00000-0  55866-4 0    07";
    const L2: &str = "2 65271  48.7951   8.5514 0002000  85.4867 277.3551 15.78566782    05";

    fn service() -> PropagatorService {
        let dispatcher = Dispatcher::new(
            SatelliteCache::default(),
            DispatchSettings::default(),
            ServiceMetrics::new().unwrap(),
        );
        PropagatorService::new(dispatcher, BuildInfo::current())
    }

    fn sat(l2: &str) -> Option<Satellite> {
        Some(Satellite {
            norad_id: 65271,
            name: "TEST".to_string(),
            tle_ln1: L1.to_string(),
            tle_ln2: l2.to_string(),
        })
    }

    fn scenario_grid() -> EphemTimeGrid {
        EphemTimeGrid {
            // 2025-12-18T00:00:00Z .. 2025-12-28T00:00:00Z
            time_start_utc: Some(prost_types::Timestamp {
                seconds: 1_766_016_000,
                nanos: 0,
            }),
            time_end_utc: Some(prost_types::Timestamp {
                seconds: 1_766_880_000,
                nanos: 0,
            }),
            time_start_ds50: None,
            time_end_ds50: None,
            time_step_type: Some(TimeStepType::KnownTimeStepPeriod("PT8.5M".to_string())),
        }
    }

    #[tokio::test]
    async fn test_info_is_stable() {
        let svc = service();
        let a = svc.info(Request::new(())).await.unwrap().into_inner();
        let b = svc.info(Request::new(())).await.unwrap().into_inner();
        assert_eq!(a.name, SERVICE_NAME);
        assert_eq!((&a.version, &a.commit, &a.build_date), (&b.version, &b.commit, &b.build_date));
        assert!(a.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_prop_ds50() {
        let svc = service();
        let response = svc
            .prop(Request::new(PropRequest {
                req_id: 11,
                time_type: TimeType::TimeDs50 as i32,
                task: Some(PropTask {
                    time: 27744.5,
                    time_utc: None,
                    sat: sat(L2),
                }),
                ephem_type: EphemType::EphemEci as i32,
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.req_id, 11);
        let result = response.result.unwrap();
        assert_eq!(result.ds50_time, 27744.5);
        assert!(result.error.is_none());
        let r = (result.x * result.x + result.y * result.y + result.z * result.z).sqrt();
        assert!(r > 6600.0 && r < 6800.0);
    }

    #[tokio::test]
    async fn test_ephem_scenario_chunks() {
        let svc = service();
        let stream = svc
            .ephem(Request::new(EphemRequest {
                req_id: 42,
                ephem_type: EphemType::EphemJ2k as i32,
                common_time_grid: Some(scenario_grid()),
                tasks: vec![EphemTask {
                    task_id: 7,
                    sat: sat(L2),
                    time_grid: None,
                }],
            }))
            .await
            .unwrap()
            .into_inner();

        let chunks: Vec<EphemResponse> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.len(), 17);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.stream_chunk_id as usize, i);
            assert_eq!(chunk.stream_id, 0);
            assert_eq!(chunk.req_id, 42);
        }
        let counts: Vec<u32> = chunks
            .iter()
            .map(|c| c.result.as_ref().unwrap().ephem_points_count)
            .collect();
        assert_eq!(counts.iter().sum::<u32>(), 1695);
        assert_eq!(counts[16], 95);
        assert!(counts[..16].iter().all(|&n| n == 100));
    }

    #[tokio::test]
    async fn test_ephem_partial_failure() {
        let svc = service();
        let corrupted = L2.replace("48.7951", "48.7952");
        let mut grid = scenario_grid();
        grid.time_end_utc = Some(prost_types::Timestamp {
            seconds: 1_766_016_000 + 3600,
            nanos: 0,
        });

        let stream = svc
            .ephem(Request::new(EphemRequest {
                req_id: 43,
                ephem_type: EphemType::EphemEci as i32,
                common_time_grid: Some(grid),
                tasks: vec![
                    EphemTask {
                        task_id: 1,
                        sat: sat(L2),
                        time_grid: None,
                    },
                    EphemTask {
                        task_id: 2,
                        sat: sat(&corrupted),
                        time_grid: None,
                    },
                ],
            }))
            .await
            .unwrap()
            .into_inner();

        let chunks: Vec<EphemResponse> = stream.map(|c| c.unwrap()).collect().await;
        let good: Vec<_> = chunks
            .iter()
            .filter_map(|c| c.result.as_ref())
            .filter(|r| r.task_id == 1)
            .collect();
        let bad: Vec<_> = chunks
            .iter()
            .filter_map(|c| c.result.as_ref())
            .filter(|r| r.task_id == 2)
            .collect();

        assert_eq!(good.iter().map(|r| r.ephem_points_count).sum::<u32>(), 8);
        assert!(good.iter().all(|r| r.error.is_none()));
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].ephem_points_count, 0);
        assert!(bad[0].error.is_some());
    }

    #[test]
    fn test_reflection_service_builds() {
        assert!(reflection_builder().build_v1().is_ok());
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let dispatcher = Dispatcher::new(
            SatelliteCache::default(),
            DispatchSettings::default(),
            ServiceMetrics::new().unwrap(),
        );
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(
            "127.0.0.1:0".parse().unwrap(),
            dispatcher,
            BuildInfo::current(),
            true,
            async move {
                let _ = rx.await;
            },
        ));
        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_ephem_rejects_empty_tasks() {
        let svc = service();
        let status = svc
            .ephem(Request::new(EphemRequest {
                req_id: 1,
                ephem_type: EphemType::EphemEci as i32,
                common_time_grid: Some(scenario_grid()),
                tasks: vec![],
            }))
            .await
            .err()
            .unwrap();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }
}
