use std::future::Future;
use std::io::{self, ErrorKind};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::request::split_request_line;
use super::routing::Upstream;
use crate::settings::Settings;

const READ_CHUNK: usize = 8192;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("origin {addr} unreachable")]
    OriginUnreachable {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("forwarding to {addr} failed")]
    ForwardingFailed {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl ForwardError {
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::OriginUnreachable { .. } => "origin_unreachable",
            ForwardError::ForwardingFailed { .. } => "forwarding_failed",
        }
    }

    /// Status sent to the client in place of the relayed response.
    pub fn status(&self) -> http::StatusCode {
        match self {
            ForwardError::OriginUnreachable { .. } => http::StatusCode::NOT_FOUND,
            ForwardError::ForwardingFailed { .. } => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardTimeouts {
    pub connect: Option<Duration>,
    /// Applied to each write and each read individually.
    pub io: Option<Duration>,
}

impl ForwardTimeouts {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            connect: settings.upstream_connect_timeout(),
            io: settings.upstream_timeout(),
        }
    }
}

async fn with_deadline<F, T>(duration: Option<Duration>, future: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match duration {
        Some(duration) => timeout(duration, future)
            .await
            .map_err(|_| io::Error::new(ErrorKind::TimedOut, "upstream deadline elapsed"))?,
        None => future.await,
    }
}

/// Replaces the request target with `path` and keeps every byte after the
/// request line untouched.
pub fn rewrite_request_line(raw: &[u8], method: &str, path: &str, version: &str) -> Vec<u8> {
    let (_, rest) = split_request_line(raw);
    let line = format!("{method} {path} {version}");
    let mut rewritten = Vec::with_capacity(line.len() + rest.len());
    rewritten.extend_from_slice(line.as_bytes());
    rewritten.extend_from_slice(rest);
    rewritten
}

/// Sends `request` to `upstream` and buffers the response until the origin
/// closes the connection.
pub async fn forward(
    upstream: &Upstream,
    request: &[u8],
    timeouts: ForwardTimeouts,
) -> Result<Vec<u8>, ForwardError> {
    let addr = upstream.to_string();
    let mut stream = with_deadline(
        timeouts.connect,
        TcpStream::connect((upstream.host.as_str(), upstream.port)),
    )
    .await
    .map_err(|source| ForwardError::OriginUnreachable {
        addr: addr.clone(),
        source,
    })?;
    debug!(upstream = %addr, "connected to upstream");

    let failed = |source: io::Error| ForwardError::ForwardingFailed {
        addr: addr.clone(),
        source,
    };

    with_deadline(timeouts.io, stream.write_all(request))
        .await
        .map_err(failed)?;

    let mut response = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let read = with_deadline(timeouts.io, stream.read(&mut chunk))
            .await
            .map_err(failed)?;
        if read == 0 {
            break;
        }
        response.extend_from_slice(&chunk[..read]);
    }
    debug!(upstream = %addr, bytes = response.len(), "upstream closed response");
    Ok(response)
}
