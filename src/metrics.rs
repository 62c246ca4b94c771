use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, ensure};
use http::StatusCode;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
};

use crate::proxy::request::parse_request_line;
use crate::util::timeout_with_context;

const METRICS_READ_TIMEOUT: Duration = Duration::from_secs(5);
const METRICS_MAX_REQUEST_BYTES: usize = 8 * 1024;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("requests_total", "Total requests by routing outcome");
    let vec = IntCounterVec::new(opts, &["outcome"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register requests_total");
    vec
});

static REQUEST_STATUS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("requests_status_total", "Requests by status class");
    let vec = IntCounterVec::new(opts, &["status_class"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register requests_status_total");
    vec
});

static CACHE_LOOKUP_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_lookup_total", "Cache lookups by result");
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_lookup_total");
    vec
});

static CACHE_STORE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("cache_store_total", "Responses written to the cache")
        .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_store_total");
    counter
});

static CACHE_STORE_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("cache_store_errors_total", "Failed cache writes")
        .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_store_errors_total");
    counter
});

static CACHE_EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("cache_evictions_total", "Cache entries evicted")
        .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_evictions_total");
    counter
});

static CACHE_EVICTED_BYTES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "cache_evicted_bytes_total",
        "Bytes reclaimed by cache eviction",
    )
    .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_evicted_bytes_total");
    counter
});

static UPSTREAM_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("upstream_errors_total", "Origin forwarding errors by kind");
    let vec = IntCounterVec::new(opts, &["kind"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register upstream_errors_total");
    vec
});

fn status_class(code: u16) -> &'static str {
    match code {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

pub fn record_request(outcome: &str, status: StatusCode) {
    let outcome = if outcome.is_empty() { "unknown" } else { outcome };
    REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
    REQUEST_STATUS_TOTAL
        .with_label_values(&[status_class(status.as_u16())])
        .inc();
}

pub fn record_cache_lookup(hit: bool) {
    let label = if hit { "hit" } else { "miss" };
    CACHE_LOOKUP_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_cache_store() {
    CACHE_STORE_TOTAL.inc();
}

pub fn record_cache_store_error() {
    CACHE_STORE_ERRORS_TOTAL.inc();
}

pub fn record_cache_eviction(bytes: u64) {
    CACHE_EVICTIONS_TOTAL.inc();
    if bytes > 0 {
        CACHE_EVICTED_BYTES_TOTAL.inc_by(bytes);
    }
}

pub fn record_upstream_error(kind: &str) {
    UPSTREAM_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn gather() -> Vec<u8> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "failed to encode metrics");
    }
    buffer
}

pub async fn serve(addr: SocketAddr, path: String) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let path = if path.is_empty() {
        "/metrics".to_string()
    } else {
        path
    };
    loop {
        let (stream, _) = listener.accept().await?;
        let path = path.clone();
        tokio::spawn(async move {
            if let Err(err) = answer_scrape(
                stream,
                &path,
                METRICS_READ_TIMEOUT,
                METRICS_MAX_REQUEST_BYTES,
            )
            .await
            {
                tracing::debug!(error = %err, "metrics handler error");
            }
        });
    }
}

/// Answers one scrape per connection. Only the request line is looked at;
/// headers are neither read to the end nor parsed.
async fn answer_scrape<S>(
    mut stream: S,
    path: &str,
    read_timeout: Duration,
    max_bytes: usize,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = read_request_head(&mut stream, read_timeout, max_bytes).await?;
    if head.is_empty() {
        return Ok(());
    }

    let response = match parse_request_line(&head) {
        Ok((method, target, _)) if method == "GET" && target == path => {
            scrape_response(StatusCode::OK, TextEncoder::new().format_type(), gather())
        }
        Ok(_) => scrape_response(StatusCode::NOT_FOUND, "text/plain", b"not found".to_vec()),
        Err(_) => scrape_response(StatusCode::BAD_REQUEST, "text/plain", Vec::new()),
    };

    stream.write_all(&response).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Reads until the first line terminator or EOF, failing once more than
/// `max_bytes` have arrived.
async fn read_request_head<S>(
    stream: &mut S,
    read_timeout: Duration,
    max_bytes: usize,
) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    ensure!(max_bytes > 0, "max_bytes must be greater than zero");
    let mut head = Vec::new();
    let mut chunk = [0u8; 512];
    while !head.windows(2).any(|pair| pair == b"\r\n") {
        let read = timeout_with_context(
            read_timeout,
            stream.read(&mut chunk),
            "reading metrics request",
        )
        .await?;
        if read == 0 {
            break;
        }
        ensure!(
            head.len() + read <= max_bytes,
            "metrics request exceeded allowed size ({max_bytes} bytes)"
        );
        head.extend_from_slice(&chunk[..read]);
    }
    Ok(head)
}

fn scrape_response(status: StatusCode, content_type: &str, body: Vec<u8>) -> Vec<u8> {
    let header = format!(
        "HTTP/1.0 {}\r\nContent-Length: {}\r\nContent-Type: {content_type}\r\n\r\n",
        status,
        body.len()
    );
    let mut response = header.into_bytes();
    response.extend_from_slice(&body);
    response
}
