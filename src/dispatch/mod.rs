//! Request dispatch
//!
//! The [`Dispatcher`] validates requests, resolves element sets and time grids
//! and drives propagation. `Prop` runs inline and returns a single point.
//! `Ephem` fans out one blocking worker per task; each worker owns its stream
//! and sends chunks through a bounded channel, and the channels are merged
//! into a single [`EphemStream`]. Dropping the stream cancels every worker of
//! the request.

mod lifecycle;
mod request;

pub use lifecycle::{RequestLifecycle, RequestState};
pub use request::{
    EphemChunk, EphemPoint, EphemRequest, EphemTask, PropRequest, PropResponse, PropTime,
    TaskError,
};

use crate::cache::SatelliteCache;
use crate::error::XpropError;
use crate::frame::{self, Frame};
use crate::grid::{GridPlan, GridSpec, TimeGrid};
use crate::metrics::{Outcome, ServiceMetrics};
use crate::propagation::Propagator;
use crate::stream::{Chunker, DEFAULT_CHUNK_SIZE};
use crate::time::{add_minutes, from_ds50, to_ds50, Epoch};
use crate::tle::{Satellite, TleError};
use crate::Result;
use futures::stream::{SelectAll, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

pub const DEFAULT_DIVERGENCE_BUDGET: usize = 1000;

// Chunks a worker may run ahead of the consumer
const CHUNKS_IN_FLIGHT: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    pub chunk_size: usize,
    /// Tasks of one request propagated concurrently
    pub max_parallel_tasks: usize,
    /// Point-level failures a request may accumulate before it is failed
    pub divergence_budget: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_parallel_tasks: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            divergence_budget: DEFAULT_DIVERGENCE_BUDGET,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    cache: SatelliteCache,
    settings: DispatchSettings,
    metrics: ServiceMetrics,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(cache: SatelliteCache, settings: DispatchSettings, metrics: ServiceMetrics) -> Self {
        Self {
            cache,
            settings,
            metrics,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn cache(&self) -> &SatelliteCache {
        &self.cache
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    /// Cancel all in-flight requests and background work
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Periodically drop idle satellites until shutdown
    pub fn spawn_cache_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let metrics = self.metrics.clone();
        self.cache
            .spawn_sweeper(interval, self.shutdown.child_token(), move |len| {
                metrics.set_cached_satellites(len)
            })
    }

    /// Propagate one satellite to one epoch
    pub fn prop(&self, request: PropRequest) -> Result<PropResponse> {
        let mut lifecycle = RequestLifecycle::new(request.req_id, "prop");
        let result = self.run_prop(&mut lifecycle, &request);

        let outcome = match &result {
            Ok(_) => Outcome::Completed,
            Err(e) => {
                lifecycle.fail(e);
                Outcome::Failed
            }
        };
        self.metrics
            .record_request("prop", outcome, lifecycle.elapsed().as_secs_f64());
        result
    }

    fn run_prop(&self, lifecycle: &mut RequestLifecycle, request: &PropRequest) -> Result<PropResponse> {
        lifecycle.advance(RequestState::Validating)?;
        if request.req_id == 0 {
            return Err(XpropError::MissingRequestId);
        }
        let frame = match request.ephem_type {
            0 => Frame::Teme,
            code => Frame::from_code(code)?,
        };
        let propagator = self.acquire(&request.satellite)?;

        lifecycle.advance(RequestState::Expanding)?;
        let epoch = match request.time {
            PropTime::Mse(minutes) => add_minutes(propagator.epoch(), minutes).ok_or_else(|| {
                XpropError::InvalidTime(format!("{} minutes from the element epoch", minutes))
            })?,
            PropTime::Ds50(days) => from_ds50(days)
                .ok_or_else(|| XpropError::InvalidTime(format!("DS50 {}", days)))?,
            PropTime::Utc(epoch) => epoch,
        };

        lifecycle.advance(RequestState::Propagating)?;
        let point = evaluate(&propagator, epoch, frame);
        record_points(&self.metrics, std::slice::from_ref(&point));

        lifecycle.advance(RequestState::Completed)?;
        info!(
            "Prop request {} for {} completed in {:?}",
            request.req_id,
            request.satellite.norad_id,
            lifecycle.elapsed()
        );

        Ok(PropResponse {
            req_id: request.req_id,
            point,
        })
    }

    /// Start an ephemeris request.
    ///
    /// Request-scoped problems are returned before any work starts. Element
    /// sets that fail to parse only affect their own task.
    pub fn ephem(&self, request: EphemRequest) -> Result<EphemStream> {
        let mut lifecycle = RequestLifecycle::new(request.req_id, "ephem");
        info!(
            "Ephem request {} received with {} tasks",
            request.req_id,
            request.tasks.len()
        );

        match self.prepare_ephem(&mut lifecycle, &request) {
            Ok((frame, tasks)) => Ok(self.launch(lifecycle, frame, tasks)),
            Err(e) => {
                lifecycle.fail(&e);
                self.metrics
                    .record_request("ephem", Outcome::Failed, lifecycle.elapsed().as_secs_f64());
                Err(e)
            }
        }
    }

    fn prepare_ephem(
        &self,
        lifecycle: &mut RequestLifecycle,
        request: &EphemRequest,
    ) -> Result<(Frame, Vec<PreparedTask>)> {
        lifecycle.advance(RequestState::Validating)?;
        if request.req_id == 0 {
            return Err(XpropError::MissingRequestId);
        }
        if request.tasks.is_empty() {
            return Err(XpropError::EmptyTaskList);
        }
        let frame = Frame::from_code(request.ephem_type)?;

        let common = request
            .common_grid
            .as_ref()
            .map(GridSpec::plan)
            .transpose()?;
        let plans = request
            .tasks
            .iter()
            .map(|task| -> Result<GridPlan> {
                match &task.grid {
                    Some(grid) => Ok(grid.plan()?),
                    None => common.clone().ok_or(XpropError::MissingTimeGrid {
                        task_id: task.task_id,
                    }),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let propagators: Vec<_> = request
            .tasks
            .iter()
            .map(|task| self.acquire(&task.satellite))
            .collect();

        lifecycle.advance(RequestState::Expanding)?;
        let mut prepared = Vec::with_capacity(request.tasks.len());
        for (index, ((task, plan), propagator)) in request
            .tasks
            .iter()
            .zip(plans)
            .zip(propagators)
            .enumerate()
        {
            let work = prepare_task(request.req_id, task.task_id, &plan, propagator)?;
            prepared.push(PreparedTask {
                stream_id: index as u32,
                task_id: task.task_id,
                work,
            });
        }

        lifecycle.advance(RequestState::Propagating)?;
        Ok((frame, prepared))
    }

    fn launch(&self, lifecycle: RequestLifecycle, frame: Frame, tasks: Vec<PreparedTask>) -> EphemStream {
        let req_id = lifecycle.req_id();
        let token = self.shutdown.child_token();
        let semaphore = Arc::new(Semaphore::new(self.settings.max_parallel_tasks.max(1)));
        let failures = Arc::new(AtomicUsize::new(0));
        let mut streams = SelectAll::new();

        for task in tasks {
            let (tx, rx) = mpsc::channel(CHUNKS_IN_FLIGHT);
            streams.push(ReceiverStream::new(rx));

            match task.work {
                TaskWork::Rejected(error) => {
                    let chunk = EphemChunk {
                        req_id,
                        stream_id: task.stream_id,
                        task_id: task.task_id,
                        stream_chunk_id: 0,
                        points: Vec::new(),
                        task_error: Some(error),
                    };
                    // Fresh channel, capacity is available
                    let _ = tx.try_send(Ok(chunk));
                }
                TaskWork::Ready { propagator, grid } => {
                    let worker = TaskWorker {
                        req_id,
                        stream_id: task.stream_id,
                        task_id: task.task_id,
                        propagator,
                        grid,
                        frame,
                        chunk_size: self.settings.chunk_size,
                        budget: self.settings.divergence_budget,
                        failures: Arc::clone(&failures),
                        token: token.clone(),
                    };
                    spawn_worker(worker, tx, Arc::clone(&semaphore));
                }
            }
        }

        EphemStream {
            inner: streams,
            lifecycle,
            metrics: self.metrics.clone(),
            token: token.clone(),
            _guard: token.drop_guard(),
            finished: false,
            chunks: 0,
            points: 0,
        }
    }

    fn acquire(&self, satellite: &Satellite) -> std::result::Result<Arc<Propagator>, TleError> {
        let result = self.cache.acquire(satellite);
        self.metrics.set_cached_satellites(self.cache.len());
        result
    }
}

struct PreparedTask {
    stream_id: u32,
    task_id: u64,
    work: TaskWork,
}

enum TaskWork {
    Ready {
        propagator: Arc<Propagator>,
        grid: TimeGrid,
    },
    Rejected(TaskError),
}

/// Resolve one task's propagator and grid. Unusable element sets and orbits
/// without a dynamic step become task markers; other grid errors fail the request.
fn prepare_task(
    req_id: u64,
    task_id: u64,
    plan: &GridPlan,
    propagator: std::result::Result<Arc<Propagator>, TleError>,
) -> Result<TaskWork> {
    let propagator = match propagator {
        Ok(propagator) => propagator,
        Err(e) => {
            warn!(
                "Task {} of request {} has a malformed element set: {}",
                task_id, req_id, e
            );
            return Ok(TaskWork::Rejected(e.into()));
        }
    };

    match plan.build(propagator.period_minutes()) {
        Ok(grid) => {
            debug!(
                "Task {} of request {} expands to {} epochs",
                task_id,
                req_id,
                grid.len()
            );
            Ok(TaskWork::Ready { propagator, grid })
        }
        Err(e) if plan.is_dynamic() => {
            warn!(
                "Task {} of request {} has no usable dynamic step: {}",
                task_id, req_id, e
            );
            Ok(TaskWork::Rejected(e.into()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Propagates one task's grid and emits its chunks in order
struct TaskWorker {
    req_id: u64,
    stream_id: u32,
    task_id: u64,
    propagator: Arc<Propagator>,
    grid: TimeGrid,
    frame: Frame,
    chunk_size: usize,
    budget: usize,
    failures: Arc<AtomicUsize>,
    token: CancellationToken,
}

impl TaskWorker {
    fn run(self, tx: &mpsc::Sender<Result<EphemChunk>>) {
        let token = &self.token;
        let propagator = &self.propagator;
        let frame = self.frame;
        let points = self
            .grid
            .expand()
            .take_while(|_| !token.is_cancelled())
            .map(|epoch| evaluate(propagator, epoch, frame));

        for chunk in Chunker::new(points, self.chunk_size) {
            if token.is_cancelled() {
                debug!(
                    "Stream {} of request {} cancelled at chunk {}",
                    self.stream_id, self.req_id, chunk.stream_chunk_id
                );
                return;
            }

            let errors = chunk.points.iter().filter(|p| p.is_error()).count();
            if errors > 0 {
                let total = self.failures.fetch_add(errors, Ordering::Relaxed) + errors;
                if total > self.budget {
                    warn!(
                        "Request {} exceeded its divergence budget of {}",
                        self.req_id, self.budget
                    );
                    let _ = tx.blocking_send(Err(XpropError::DivergenceBudgetExceeded {
                        req_id: self.req_id,
                        budget: self.budget,
                    }));
                    token.cancel();
                    return;
                }
            }

            let message = EphemChunk {
                req_id: self.req_id,
                stream_id: self.stream_id,
                task_id: self.task_id,
                stream_chunk_id: chunk.stream_chunk_id,
                points: chunk.points,
                task_error: None,
            };
            if tx.blocking_send(Ok(message)).is_err() {
                // Consumer went away
                return;
            }
        }
    }
}

fn spawn_worker(
    worker: TaskWorker,
    tx: mpsc::Sender<Result<EphemChunk>>,
    semaphore: Arc<Semaphore>,
) {
    tokio::spawn(async move {
        let token = worker.token.clone();
        let _permit = tokio::select! {
            _ = token.cancelled() => return,
            permit = semaphore.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let stream_id = worker.stream_id;
        let failure_tx = tx.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || worker.run(&tx)).await {
            let _ = failure_tx
                .send(Err(XpropError::WorkerFailed(format!(
                    "stream {}: {}",
                    stream_id, e
                ))))
                .await;
        }
    });
}

fn evaluate(propagator: &Propagator, epoch: Epoch, frame: Frame) -> EphemPoint {
    EphemPoint {
        epoch,
        ds50: to_ds50(epoch),
        mse: propagator.minutes_since_epoch(epoch),
        state: propagator
            .propagate(epoch)
            .map(|state| frame::convert(&state, frame)),
    }
}

fn record_points(metrics: &ServiceMetrics, points: &[EphemPoint]) {
    let mut computed = 0;
    for point in points {
        match &point.state {
            Ok(_) => computed += 1,
            Err(e) => metrics.record_point_error(e.code()),
        }
    }
    metrics.record_points(computed);
}

/// Merged chunk stream of one `Ephem` request.
///
/// Chunks of one task arrive in order; chunks of different tasks may
/// interleave. The stream ends after an error. Dropping it cancels the request.
pub struct EphemStream {
    inner: SelectAll<ReceiverStream<Result<EphemChunk>>>,
    lifecycle: RequestLifecycle,
    metrics: ServiceMetrics,
    token: CancellationToken,
    _guard: DropGuard,
    finished: bool,
    chunks: usize,
    points: usize,
}

impl EphemStream {
    pub fn req_id(&self) -> u64 {
        self.lifecycle.req_id()
    }

    pub fn state(&self) -> RequestState {
        self.lifecycle.state()
    }

    /// Abandon the request; workers stop before their next point
    pub fn cancel(&self) {
        self.token.cancel();
    }

    fn finish(&mut self, outcome: Outcome, error: Option<&XpropError>) {
        self.finished = true;
        match error {
            Some(e) => self.lifecycle.fail(e),
            None => {
                if self.lifecycle.state() == RequestState::Propagating {
                    let _ = self.lifecycle.advance(RequestState::Streaming);
                }
                let _ = self.lifecycle.advance(RequestState::Completed);
            }
        }
        self.metrics.record_request(
            "ephem",
            outcome,
            self.lifecycle.elapsed().as_secs_f64(),
        );
    }
}

impl Stream for EphemStream {
    type Item = Result<EphemChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                if this.lifecycle.state() == RequestState::Propagating {
                    let _ = this.lifecycle.advance(RequestState::Streaming);
                }
                if chunk.task_error.is_some() {
                    this.metrics.record_task_error();
                }
                record_points(&this.metrics, &chunk.points);
                this.chunks += 1;
                this.points += chunk.points.len();
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish(Outcome::Failed, Some(&e));
                this.token.cancel();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) if this.token.is_cancelled() => {
                let e = XpropError::Cancelled;
                this.finish(Outcome::Cancelled, Some(&e));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(Outcome::Completed, None);
                info!(
                    "Ephem request {} completed: {} chunks, {} points in {:?}",
                    this.lifecycle.req_id(),
                    this.chunks,
                    this.points,
                    this.lifecycle.elapsed()
                );
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for EphemStream {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                "Ephem request {} dropped before completion",
                self.lifecycle.req_id()
            );
            self.finish(Outcome::Cancelled, Some(&XpropError::Cancelled));
        }
    }
}
