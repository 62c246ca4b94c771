use std::error::Error as _;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use anyhow::{Context, Result};
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::AppContext;
use super::cache::CacheKey;
use super::forward::{ForwardTimeouts, forward, rewrite_request_line};
use super::request::{ParsedRequest, RequestError, RequestTarget, parse_request};
use super::response::{emitted_status, response_status, status_response};
use super::routing::{Rejection, RoutingOutcome, Upstream, route_request};
use crate::logging::AccessLogBuilder;
use crate::metrics;
use crate::util::maybe_timeout;

/// Lifecycle of a single client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Accepted,
    Reading,
    Parsed,
    Routed,
    Serving,
    Forwarding,
    Closed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Accepted => "accepted",
            Phase::Reading => "reading",
            Phase::Parsed => "parsed",
            Phase::Routed => "routed",
            Phase::Serving => "serving",
            Phase::Forwarding => "forwarding",
            Phase::Closed => "closed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serves exactly one request on `stream` and closes it. The stream is shut
/// down on every path, including failures.
pub async fn handle_connection<S>(stream: S, peer: SocketAddr, app: &AppContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut connection = Connection::new(stream, peer, app);
    let result = connection.serve().await;
    let phase = connection.phase;
    connection.close().await;
    result.with_context(|| format!("connection failed while {phase}"))
}

struct Connection<'a, S> {
    stream: S,
    peer: SocketAddr,
    app: &'a AppContext,
    phase: Phase,
    started: Instant,
    log: Option<AccessLogBuilder>,
    bytes_in: u64,
    bytes_out: u64,
}

impl<'a, S> Connection<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn new(stream: S, peer: SocketAddr, app: &'a AppContext) -> Self {
        Self {
            stream,
            peer,
            app,
            phase: Phase::Accepted,
            started: Instant::now(),
            log: None,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    fn annotate(&mut self, f: impl FnOnce(AccessLogBuilder) -> AccessLogBuilder) {
        self.log = self.log.take().map(f);
    }

    async fn serve(&mut self) -> Result<()> {
        self.phase = Phase::Reading;
        let raw = self.read_request().await?;
        self.bytes_in = raw.len() as u64;

        let request = match parse_request(&raw) {
            Ok(request) => request,
            Err(RequestError::Empty) => {
                debug!(peer = %self.peer, "client closed before sending a request");
                return Ok(());
            }
            Err(err) => {
                warn!(peer = %self.peer, error = %err, "rejecting unparseable request");
                let rejection = Rejection::from(&err);
                self.log = Some(
                    AccessLogBuilder::new(self.peer)
                        .outcome(RoutingOutcome::Reject(rejection).label())
                        .error_reason(err.to_string()),
                );
                return self.reject(rejection).await;
            }
        };
        self.phase = Phase::Parsed;
        info!(peer = %self.peer, request = %request.request_line(), "accepted request");

        let host = match &request.uri {
            RequestTarget::Absolute { host, .. } => host.clone(),
            RequestTarget::Relative { .. } => self.app.routes.origin_host.clone(),
        };
        self.log = Some(
            AccessLogBuilder::new(self.peer)
                .method(&request.method)
                .host(host)
                .path(request.uri.origin_form()),
        );

        let outcome = route_request(&request, &self.app.routes, self.app.cache.as_ref()).await;
        self.phase = Phase::Routed;
        self.annotate(|log| log.outcome(outcome.label()));

        match outcome {
            RoutingOutcome::Reject(rejection) => self.reject(rejection).await,
            RoutingOutcome::ServeFromCache { upstream, key } => {
                self.serve_cached(&raw, &request, &upstream, key).await
            }
            RoutingOutcome::ForwardAndCache { upstream, key } => {
                metrics::record_cache_lookup(false);
                info!(peer = %self.peer, key = %key, "cache miss, forwarding to origin");
                self.annotate(|log| log.cache_lookup("miss"));
                self.relay(&raw, &request, &upstream, Some(key)).await
            }
            RoutingOutcome::ForwardUncached { upstream } => {
                self.annotate(|log| log.cache_lookup("bypass"));
                self.relay(&raw, &request, &upstream, None).await
            }
        }
    }

    async fn read_request(&mut self) -> Result<Vec<u8>> {
        let client_timeout = self.app.settings.client_timeout();
        let mut buf = vec![0u8; self.app.settings.request_buffer_size];
        let read = maybe_timeout(
            client_timeout,
            self.stream.read(&mut buf),
            "reading client request",
        )
        .await?;
        buf.truncate(read);
        Ok(buf)
    }

    async fn serve_cached(
        &mut self,
        raw: &[u8],
        request: &ParsedRequest,
        upstream: &Upstream,
        key: CacheKey,
    ) -> Result<()> {
        self.phase = Phase::Serving;
        metrics::record_cache_lookup(true);
        match self.app.cache.read(key).await {
            Ok(bytes) => {
                info!(peer = %self.peer, key = %key, bytes = bytes.len(), "serving response from cache");
                self.annotate(|log| log.cache_lookup("hit"));
                self.send_relayed(&bytes).await
            }
            Err(err) => {
                warn!(
                    peer = %self.peer,
                    key = %key,
                    error = %err,
                    "cache read failed, forwarding to origin"
                );
                self.annotate(|log| log.cache_lookup("read_error"));
                self.relay(raw, request, upstream, Some(key)).await
            }
        }
    }

    async fn relay(
        &mut self,
        raw: &[u8],
        request: &ParsedRequest,
        upstream: &Upstream,
        key: Option<CacheKey>,
    ) -> Result<()> {
        self.phase = Phase::Forwarding;
        let outbound = rewrite_request_line(
            raw,
            &request.method,
            request.uri.origin_form(),
            &request.version,
        );
        let timeouts = ForwardTimeouts::from_settings(&self.app.settings);
        self.annotate(|log| log.upstream_addr(upstream.to_string()));

        match forward(upstream, &outbound, timeouts).await {
            Ok(response) => {
                if let Some(key) = key {
                    self.store(key, &response).await;
                }
                self.send_relayed(&response).await
            }
            Err(err) => {
                metrics::record_upstream_error(err.kind());
                let cause = err.source().map(ToString::to_string).unwrap_or_default();
                warn!(
                    peer = %self.peer,
                    upstream = %upstream,
                    error = %err,
                    cause = %cause,
                    "upstream request failed"
                );
                self.annotate(|log| log.error_reason(err.kind()));
                self.respond_status(err.status()).await
            }
        }
    }

    async fn store(&mut self, key: CacheKey, response: &[u8]) {
        if response.is_empty() {
            debug!(peer = %self.peer, key = %key, "origin sent no bytes, not caching");
            self.annotate(|log| log.cache_store("skipped_empty"));
            return;
        }
        match self.app.cache.write(key, response).await {
            Ok(stats) => {
                metrics::record_cache_store();
                if stats.removed > 0 {
                    debug!(
                        removed = stats.removed,
                        bytes_reclaimed = stats.bytes_reclaimed,
                        "cache evicted entries after store"
                    );
                }
                self.annotate(|log| log.cache_store("stored"));
            }
            Err(err) => {
                metrics::record_cache_store_error();
                warn!(peer = %self.peer, key = %key, error = %err, "failed to store response in cache");
                self.annotate(|log| log.cache_store("error"));
            }
        }
    }

    async fn reject(&mut self, rejection: Rejection) -> Result<()> {
        debug!(peer = %self.peer, status = rejection.status().as_u16(), "rejecting request");
        self.respond_status(rejection.status()).await
    }

    async fn send_relayed(&mut self, response: &[u8]) -> Result<()> {
        self.phase = Phase::Serving;
        self.write_client(response).await?;
        if let Some(status) = response_status(response) {
            self.annotate(|log| log.status(status));
        }
        Ok(())
    }

    async fn respond_status(&mut self, status: StatusCode) -> Result<()> {
        let status = emitted_status(status);
        self.write_client(status_response(status)).await?;
        self.annotate(|log| log.status(status));
        Ok(())
    }

    async fn write_client(&mut self, bytes: &[u8]) -> Result<()> {
        let client_timeout = self.app.settings.client_timeout();
        maybe_timeout(
            client_timeout,
            self.stream.write_all(bytes),
            "writing response to client",
        )
        .await?;
        self.bytes_out += bytes.len() as u64;
        Ok(())
    }

    async fn close(mut self) {
        let client_timeout = self.app.settings.client_timeout();
        if let Err(err) = maybe_timeout(
            client_timeout,
            self.stream.shutdown(),
            "shutting down client stream",
        )
        .await
        {
            debug!(peer = %self.peer, error = %err, "client stream shutdown failed");
        }
        self.phase = Phase::Closed;
        if let Some(log) = self.log.take() {
            log.bytes(self.bytes_in, self.bytes_out)
                .elapsed(self.started.elapsed())
                .log();
        }
        debug!(peer = %self.peer, phase = %self.phase, "connection closed");
    }
}
