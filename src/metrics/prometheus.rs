//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Entity upserts by kind and outcome
    pub static ref ENTITY_UPSERTS: CounterVec = register_counter_vec!(
        "port_k8s_exporter_entity_upserts_total",
        "Total number of entity upserts",
        &["kind", "outcome"]
    ).unwrap();

    /// Entity deletions by kind and outcome
    pub static ref ENTITY_DELETIONS: CounterVec = register_counter_vec!(
        "port_k8s_exporter_entity_deletions_total",
        "Total number of entity deletions",
        &["kind", "outcome"]
    ).unwrap();

    /// Objects whose entities could not be built
    pub static ref MAPPING_FAILURES: CounterVec = register_counter_vec!(
        "port_k8s_exporter_mapping_failures_total",
        "Total number of objects that failed entity mapping",
        &["kind"]
    ).unwrap();

    /// Object event processing duration
    pub static ref SYNC_DURATION: HistogramVec = register_histogram_vec!(
        "port_k8s_exporter_sync_duration_seconds",
        "Duration of object event processing in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Stale entities removed from Port
    pub static ref STALE_ENTITIES_DELETED: Counter = register_counter!(
        "port_k8s_exporter_stale_entities_deleted_total",
        "Total number of stale entities deleted"
    ).unwrap();

    /// Running controllers
    pub static ref CONTROLLERS: Gauge = register_gauge!(
        "port_k8s_exporter_controllers",
        "Number of running controllers"
    ).unwrap();

    /// Configured kinds that could not be resolved
    pub static ref SKIPPED_KINDS: Gauge = register_gauge!(
        "port_k8s_exporter_skipped_kinds",
        "Number of configured kinds skipped because they could not be resolved"
    ).unwrap();

    /// Exporter readiness (1 = caches synced and controllers running)
    pub static ref EXPORTER_READY: Gauge = register_gauge!(
        "port_k8s_exporter_ready",
        "Exporter readiness (1 = ready, 0 = starting)"
    ).unwrap();
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => health_response(),
        "/readyz" | "/ready" => ready_response(),
        _ => not_found_response(),
    };

    Ok(response)
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::new(Bytes::from("Failed to encode metrics")))
            .unwrap();
    }

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", encoder.format_type())
        .body(Full::new(Bytes::from(buffer)))
        .unwrap()
}

/// Health check response
fn health_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .body(Full::new(Bytes::from("ok")))
        .unwrap()
}

/// Readiness check response, ok once the stale entity pass is done
fn ready_response() -> Response<Full<Bytes>> {
    if EXPORTER_READY.get() < 1.0 {
        return Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body(Full::new(Bytes::from("starting")))
            .unwrap();
    }

    Response::builder()
        .status(StatusCode::OK)
        .body(Full::new(Bytes::from("ok")))
        .unwrap()
}

/// Not found response
fn not_found_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::from("Not Found")))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_is_always_ok() {
        assert_eq!(health_response().status(), StatusCode::OK);
    }

    #[test]
    fn test_unknown_path_is_not_found() {
        assert_eq!(not_found_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_metrics_are_exposed() {
        STALE_ENTITIES_DELETED.inc_by(0.0);
        let response = metrics_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
