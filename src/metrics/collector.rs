use crate::error::{ErrorCode, XpropError};
use crate::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Outcome label for request counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Failed => "failed",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// Prometheus metrics for the propagation service
#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,
    requests: IntCounterVec,
    request_duration: HistogramVec,
    points: IntCounter,
    point_errors: IntCounterVec,
    task_errors: IntCounter,
    cached_satellites: IntGauge,
}

impl ServiceMetrics {
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Result<Self> {
        let requests = IntCounterVec::new(
            Opts::new("xprop_requests_total", "Requests handled by RPC and outcome"),
            &["rpc", "outcome"],
        )
        .map_err(metrics_error)?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new("xprop_request_duration_seconds", "Request processing time")
                .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["rpc"],
        )
        .map_err(metrics_error)?;
        let points = IntCounter::with_opts(Opts::new(
            "xprop_points_total",
            "Ephemeris points computed",
        ))
        .map_err(metrics_error)?;
        let point_errors = IntCounterVec::new(
            Opts::new(
                "xprop_point_errors_total",
                "Ephemeris points replaced by an error marker",
            ),
            &["code"],
        )
        .map_err(metrics_error)?;
        let task_errors = IntCounter::with_opts(Opts::new(
            "xprop_task_errors_total",
            "Tasks rejected because of a malformed element set",
        ))
        .map_err(metrics_error)?;
        let cached_satellites = IntGauge::with_opts(Opts::new(
            "xprop_cached_satellites",
            "Satellites currently held in the propagator cache",
        ))
        .map_err(metrics_error)?;

        registry
            .register(Box::new(requests.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(request_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(points.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(point_errors.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(task_errors.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(cached_satellites.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            requests,
            request_duration,
            points,
            point_errors,
            task_errors,
            cached_satellites,
        })
    }

    pub fn record_request(&self, rpc: &str, outcome: Outcome, duration_secs: f64) {
        self.requests
            .with_label_values(&[rpc, outcome.as_str()])
            .inc();
        self.request_duration
            .with_label_values(&[rpc])
            .observe(duration_secs);
    }

    pub fn record_points(&self, count: usize) {
        self.points.inc_by(count as u64);
    }

    pub fn record_point_error(&self, code: ErrorCode) {
        self.point_errors.with_label_values(&[code.as_str()]).inc();
    }

    pub fn record_task_error(&self) {
        self.task_errors.inc();
    }

    pub fn set_cached_satellites(&self, count: usize) {
        self.cached_satellites.set(count as i64);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current values in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(metrics_error)
    }
}

fn metrics_error(e: impl std::fmt::Display) -> XpropError {
    XpropError::MetricsError(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_values() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.record_request("ephem", Outcome::Completed, 0.25);
        metrics.record_points(1695);
        metrics.record_point_error(ErrorCode::OrbitalDecay);
        metrics.record_task_error();
        metrics.set_cached_satellites(3);

        let text = metrics.render().unwrap();
        let requests = text
            .lines()
            .find(|l| l.starts_with("xprop_requests_total{"))
            .unwrap();
        assert!(requests.contains("rpc=\"ephem\""));
        assert!(requests.contains("outcome=\"completed\""));
        assert!(requests.ends_with(" 1"));
        assert!(text.contains("xprop_points_total 1695"));
        assert!(text.contains("xprop_point_errors_total{code=\"orbital_decay\"} 1"));
        assert!(text.contains("xprop_task_errors_total 1"));
        assert!(text.contains("xprop_cached_satellites 3"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = ServiceMetrics::new().unwrap();
        let b = ServiceMetrics::new().unwrap();
        a.record_points(5);
        assert!(b.render().unwrap().contains("xprop_points_total 0"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        ServiceMetrics::with_registry(registry.clone()).unwrap();
        assert!(matches!(
            ServiceMetrics::with_registry(registry),
            Err(XpropError::MetricsError(_))
        ));
    }
}
