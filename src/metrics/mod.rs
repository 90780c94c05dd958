pub mod collector;
pub mod exporter;

pub use collector::{Outcome, ServiceMetrics};
pub use exporter::PrometheusExporter;
