use std::fmt;

use http::StatusCode;

use super::cache::{CacheKey, CacheStore};
use super::request::{ParsedRequest, RequestError, RequestTarget};
use crate::settings::Settings;

/// The parts of the configuration that decide where a request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    pub origin_host: String,
    pub origin_port: u16,
    pub max_document_size: u32,
}

impl RoutePolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            origin_host: settings.origin_host.clone(),
            origin_port: settings.origin_port,
            max_document_size: settings.max_document_size,
        }
    }

    fn is_origin(&self, host: &str) -> bool {
        host.eq_ignore_ascii_case(&self.origin_host)
    }
}

/// Host and port a request is forwarded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    BadRequest,
    UriTooLong,
    NotImplemented,
}

impl Rejection {
    pub fn status(self) -> StatusCode {
        match self {
            Rejection::BadRequest => StatusCode::BAD_REQUEST,
            Rejection::UriTooLong => StatusCode::URI_TOO_LONG,
            Rejection::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

impl From<&RequestError> for Rejection {
    fn from(err: &RequestError) -> Self {
        match err {
            RequestError::UnsupportedMethod(_) => Rejection::NotImplemented,
            RequestError::Empty
            | RequestError::MalformedRequestLine
            | RequestError::InvalidTarget(_) => Rejection::BadRequest,
        }
    }
}

/// What the handler does with a parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingOutcome {
    ForwardUncached { upstream: Upstream },
    /// The upstream is kept so a failed cache read can still be served.
    ServeFromCache { upstream: Upstream, key: CacheKey },
    ForwardAndCache { upstream: Upstream, key: CacheKey },
    Reject(Rejection),
}

impl RoutingOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RoutingOutcome::ForwardUncached { .. } => "forward_uncached",
            RoutingOutcome::ServeFromCache { .. } => "cache_hit",
            RoutingOutcome::ForwardAndCache { .. } => "cache_miss",
            RoutingOutcome::Reject(Rejection::BadRequest) => "bad_request",
            RoutingOutcome::Reject(Rejection::UriTooLong) => "uri_too_long",
            RoutingOutcome::Reject(Rejection::NotImplemented) => "not_implemented",
        }
    }
}

/// The cache-independent half of a routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Relay,
    Cacheable(CacheKey),
    Reject(Rejection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub upstream: Upstream,
    pub disposition: Disposition,
}

impl Route {
    /// Completes the decision once it is known whether the key is cached.
    pub fn resolve(self, cached: bool) -> RoutingOutcome {
        let upstream = self.upstream;
        match self.disposition {
            Disposition::Relay => RoutingOutcome::ForwardUncached { upstream },
            Disposition::Reject(rejection) => RoutingOutcome::Reject(rejection),
            Disposition::Cacheable(key) if cached => {
                RoutingOutcome::ServeFromCache { upstream, key }
            }
            Disposition::Cacheable(key) => RoutingOutcome::ForwardAndCache { upstream, key },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentSize {
    NotNumeric,
    Within(u32),
    TooLarge,
}

fn document_size(path: &str, max: u32) -> DocumentSize {
    let digits = path.trim_start_matches('/');
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return DocumentSize::NotNumeric;
    }
    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return DocumentSize::Within(0);
    }
    match significant.parse::<u32>() {
        Ok(size) if size <= max => DocumentSize::Within(size),
        _ => DocumentSize::TooLarge,
    }
}

/// Decide the upstream and disposition of a request without touching the
/// cache. Pure, so the same request always plans the same route.
pub fn plan_route(request: &ParsedRequest, policy: &RoutePolicy) -> Route {
    let (upstream, path) = match &request.uri {
        RequestTarget::Absolute { host, port, path } => (
            Upstream {
                host: host.clone(),
                port: *port,
            },
            path.as_str(),
        ),
        RequestTarget::Relative { path } => (
            Upstream {
                host: policy.origin_host.clone(),
                port: policy.origin_port,
            },
            path.as_str(),
        ),
    };

    let disposition = if !policy.is_origin(&upstream.host) || !request.is_get() {
        Disposition::Relay
    } else {
        match document_size(path, policy.max_document_size) {
            DocumentSize::NotNumeric => Disposition::Relay,
            DocumentSize::TooLarge => Disposition::Reject(Rejection::UriTooLong),
            DocumentSize::Within(size) => Disposition::Cacheable(CacheKey::new(size)),
        }
    };

    Route {
        upstream,
        disposition,
    }
}

pub async fn route_request(
    request: &ParsedRequest,
    policy: &RoutePolicy,
    cache: &dyn CacheStore,
) -> RoutingOutcome {
    let route = plan_route(request, policy);
    let cached = match route.disposition {
        Disposition::Cacheable(key) => cache.exists(key).await,
        _ => false,
    };
    route.resolve(cached)
}
