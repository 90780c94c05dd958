//! Prometheus scrape endpoint served with axum

use crate::metrics::collector::ServiceMetrics;
use crate::Result;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Serves the metrics registry as `GET /metrics`
pub struct PrometheusExporter {
    metrics: ServiceMetrics,
    addr: SocketAddr,
}

impl PrometheusExporter {
    pub fn new(metrics: ServiceMetrics, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(self.metrics.clone())
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(
            "Starting Prometheus exporter on {}",
            listener.local_addr()?
        );
        Ok(listener)
    }

    /// Serve until `shutdown` is cancelled
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;
        info!("Prometheus exporter stopped");
        Ok(())
    }
}

async fn metrics_handler(State(metrics): State<ServiceMetrics>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            warn!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
