//! Prometheus metrics HTTP server.
//!
//! Exposes connection state and publish counters in Prometheus text format,
//! plus a `/health` endpoint that reflects the cluster link.

use std::fmt::Write;
use std::net::SocketAddr;

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use tokio::net::TcpListener;
use tracing::info;

use crate::state::{ConnectionState, StateSnapshot};

/// Start the Prometheus metrics HTTP server.
///
/// Serves `/metrics` and `/health` until the task is dropped.
/// Returns an error if the server fails to bind to the port.
pub async fn start_metrics_server(
    port: u16,
    state: ConnectionState,
) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    info!("Prometheus metrics server listening on http://{}/metrics", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))
}

/// 200 while the cluster link is up, 503 otherwise.
async fn health_handler(State(state): State<ConnectionState>) -> impl IntoResponse {
    health_status(&state.snapshot())
}

fn health_status(snapshot: &StateSnapshot) -> (StatusCode, &'static str) {
    if snapshot.cluster_connected {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "cluster disconnected")
    }
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(state): State<ConnectionState>) -> impl IntoResponse {
    let output = format_prometheus_metrics(&state.snapshot());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}

fn push_metric(
    output: &mut String,
    name: &str,
    kind: &str,
    help: &str,
    value: impl std::fmt::Display,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {kind}");
    let _ = writeln!(output, "{name} {value}");
}

/// Format a snapshot as Prometheus text format.
fn format_prometheus_metrics(snapshot: &StateSnapshot) -> String {
    let mut output = String::with_capacity(2048);

    push_metric(
        &mut output,
        "dxcluster_uptime_seconds",
        "gauge",
        "Time since the bridge started",
        format_args!("{:.3}", snapshot.elapsed_secs),
    );
    push_metric(
        &mut output,
        "dxcluster_cluster_connected",
        "gauge",
        "Whether the DX cluster connection is streaming",
        u8::from(snapshot.cluster_connected),
    );
    push_metric(
        &mut output,
        "dxcluster_mqtt_connected",
        "gauge",
        "Whether the MQTT broker connection is up",
        u8::from(snapshot.mqtt_connected),
    );
    push_metric(
        &mut output,
        "dxcluster_spots_published_total",
        "counter",
        "Spots enqueued for publishing",
        snapshot.spots_published,
    );
    push_metric(
        &mut output,
        "dxcluster_weather_published_total",
        "counter",
        "Weather reports enqueued for publishing",
        snapshot.weather_published,
    );
    push_metric(
        &mut output,
        "dxcluster_lines_received_total",
        "counter",
        "Lines received from the cluster",
        snapshot.lines_received,
    );
    push_metric(
        &mut output,
        "dxcluster_lines_ignored_total",
        "counter",
        "Lines that were neither spots nor weather reports",
        snapshot.lines_ignored,
    );

    // Spots by band, sorted for stable output
    output.push_str("# HELP dxcluster_spots_by_band_total Spots broken down by amateur band\n");
    output.push_str("# TYPE dxcluster_spots_by_band_total counter\n");
    let mut bands: Vec<_> = snapshot.spots_by_band.iter().collect();
    bands.sort();
    for (band, count) in bands {
        let _ = writeln!(
            output,
            "dxcluster_spots_by_band_total{{band=\"{}\"}} {}",
            band, count
        );
    }

    output
}
