//! Operational HTTP surface: Prometheus metrics, readiness and a default
//! handler, served by a small hand-rolled hyper router.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, HistogramOpts, HistogramVec, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Content type for Prometheus metrics.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// One-way latching readiness signal. Flip it once the controller is wired
/// up; it never goes back.
#[derive(Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    /// A not-yet-ready signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch to ready.
    pub fn set_ready(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether readiness has been latched.
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Process-wide metrics registry plus the ops server's own instrumentation.
pub struct OpsMetrics {
    registry: Registry,
    http_requests: HistogramVec,
}

impl OpsMetrics {
    /// A registry with the standard process collector and the HTTP request
    /// duration histogram registered.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        let http_requests = HistogramVec::new(
            HistogramOpts::new("http_requests_duration_seconds", "request duration")
                .namespace("ops"),
            &["method", "code"],
        )?;
        registry.register(Box::new(http_requests.clone()))?;

        Ok(Self {
            registry,
            http_requests,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            warn!(error = %err, "encoding metrics failed");
        }
        buffer
    }

    fn observe(&self, method: &Method, status: StatusCode, seconds: f64) {
        self.http_requests
            .with_label_values(&[method.as_str(), status.as_str()])
            .observe(seconds);
    }
}

/// The ops HTTP server.
pub struct OpsServer {
    addr: SocketAddr,
    readiness: Readiness,
    metrics: Arc<OpsMetrics>,
}

impl OpsServer {
    /// Serve `/metrics`, `/ready` and a default handler on `addr`.
    pub fn new(addr: SocketAddr, readiness: Readiness, metrics: Arc<OpsMetrics>) -> Self {
        Self {
            addr,
            readiness,
            metrics,
        }
    }

    /// Accept connections until canceled.
    pub async fn run(self, cancel: CancellationToken) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "ops server started");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, remote_addr) = result?;
                    let io = TokioIo::new(stream);
                    let readiness = self.readiness.clone();
                    let metrics = Arc::clone(&self.metrics);

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            route(req, readiness.clone(), Arc::clone(&metrics))
                        });

                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                            if !err.is_incomplete_message() {
                                warn!(remote = %remote_addr, error = %err, "HTTP connection error");
                            }
                        }
                    });
                }

                _ = cancel.cancelled() => {
                    info!("ops server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn route(
    req: Request<Incoming>,
    readiness: Readiness,
    metrics: Arc<OpsMetrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let start = Instant::now();
    let method = req.method().clone();

    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => metrics_response(&metrics),
        (&Method::GET, "/ready") => ready_response(&readiness),
        _ => default_response(),
    };

    metrics.observe(&method, response.status(), start.elapsed().as_secs_f64());
    Ok(response)
}

fn metrics_response(metrics: &OpsMetrics) -> Response<Full<Bytes>> {
    match Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", PROMETHEUS_CONTENT_TYPE)
        .body(Full::new(Bytes::from(metrics.encode())))
    {
        Ok(response) => response,
        Err(_) => plain_response(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed\n"),
    }
}

fn ready_response(readiness: &Readiness) -> Response<Full<Bytes>> {
    if readiness.is_ready() {
        plain_response(StatusCode::OK, "ready\n")
    } else {
        plain_response(StatusCode::SERVICE_UNAVAILABLE, "not ready\n")
    }
}

fn default_response() -> Response<Full<Bytes>> {
    plain_response(StatusCode::OK, "hello, world!\n")
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}
