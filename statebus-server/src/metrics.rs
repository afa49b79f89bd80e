//! Prometheus metrics for statebus.
//!
//! This module provides:
//! - Metrics registry with counters, gauges, and histograms
//! - HTTP server to expose metrics at `/metrics` endpoint

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Pipeline duration histogram buckets (in seconds).
const DURATION_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

/// Prometheus metrics for statebus.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Published events by result (`ok` or an error code).
    pub published_total: CounterVec,
    /// Consumed events by outcome.
    pub consumed_total: CounterVec,
    /// Definition operations by operation and result.
    pub definition_ops_total: CounterVec,
    /// Transient failures by the I/O operation that failed.
    pub transient_errors_total: CounterVec,
    /// Time to process one consumed record, by outcome.
    pub pipeline_duration: HistogramVec,
    /// Compiled transition tables held in memory.
    pub tables_cached: Gauge,
    /// Partitions with a running worker.
    pub partitions_owned: Gauge,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let published_total = CounterVec::new(
            Opts::new("statebus_published_total", "Total events published by result"),
            &["result"],
        )?;
        registry.register(Box::new(published_total.clone()))?;

        let consumed_total = CounterVec::new(
            Opts::new("statebus_consumed_total", "Total events consumed by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(consumed_total.clone()))?;

        let definition_ops_total = CounterVec::new(
            Opts::new(
                "statebus_definition_ops_total",
                "Total definition operations by operation and result",
            ),
            &["operation", "result"],
        )?;
        registry.register(Box::new(definition_ops_total.clone()))?;

        let transient_errors_total = CounterVec::new(
            Opts::new(
                "statebus_transient_errors_total",
                "Total transient store, cache and bus failures by operation",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(transient_errors_total.clone()))?;

        let pipeline_duration = HistogramVec::new(
            HistogramOpts::new(
                "statebus_pipeline_duration_seconds",
                "Time to process one consumed event in seconds by outcome",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["outcome"],
        )?;
        registry.register(Box::new(pipeline_duration.clone()))?;

        let tables_cached = Gauge::with_opts(Opts::new(
            "statebus_tables_cached",
            "Number of compiled transition tables held in memory",
        ))?;
        registry.register(Box::new(tables_cached.clone()))?;

        let partitions_owned = Gauge::with_opts(Opts::new(
            "statebus_partitions_owned",
            "Number of partitions consumed by this process",
        ))?;
        registry.register(Box::new(partitions_owned.clone()))?;

        Ok(Self {
            registry,
            published_total,
            consumed_total,
            definition_ops_total,
            transient_errors_total,
            pipeline_duration,
            tables_cached,
            partitions_owned,
        })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Runs the HTTP metrics server.
///
/// The server listens on the given address and serves metrics at `/metrics`
/// and a liveness probe at `/health`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Handles an HTTP request to the metrics server.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    Ok(route(req.uri().path(), &metrics))
}

fn route(path: &str, metrics: &Metrics) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => {
            let mut response = Response::new(Full::new(Bytes::from(metrics.encode())));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            response
        }
        "/health" | "/healthz" => Response::new(Full::new(Bytes::from("OK"))),
        _ => {
            let mut response = Response::new(Full::new(Bytes::from("Not Found")));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    }
}
