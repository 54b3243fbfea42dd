//! The scrape endpoint: installs a process-wide `metrics` recorder backed
//! by `metrics-exporter-prometheus` and serves its rendered text body over
//! `axum`. This is the "external metric-registry library" the core treats
//! as an out-of-scope collaborator (spec §1) — the rest of the crate only
//! ever calls `metrics::gauge!(...)`.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::http::header;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

pub fn install_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus metrics recorder")
}

/// Serve `/metrics` on `addr` until the process exits. Runs as its own
/// task so the scrape listener answers requests concurrently with the
/// scheduler loop (spec §5).
pub async fn serve(handle: PrometheusHandle, addr: SocketAddr) -> Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move {
                let body = handle.render();
                ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {addr}"))?;
    info!(%addr, "exporter listening");
    axum::serve(listener, app.into_make_service())
        .await
        .context("metrics server failed")
}
