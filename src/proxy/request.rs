use http::Uri;
use thiserror::Error;

const LINE_TERMINATOR: &[u8] = b"\r\n";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("client closed the connection before sending a request")]
    Empty,
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("invalid request target '{0}'")]
    InvalidTarget(String),
    #[error("method '{0}' is not supported by this proxy")]
    UnsupportedMethod(String),
}

/// Where a request is addressed, as written by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    /// `http://host[:port]/path`; the query and fragment are dropped.
    Absolute { host: String, port: u16, path: String },
    /// `/path`, addressed to the configured origin.
    Relative { path: String },
}

impl RequestTarget {
    /// The origin-form path sent upstream in place of the client's target.
    pub fn origin_form(&self) -> &str {
        match self {
            RequestTarget::Absolute { path, .. } | RequestTarget::Relative { path } => path,
        }
    }
}

/// A request after its first line has been split and its target parsed.
/// Headers are never parsed; the raw bytes are kept by the caller for
/// forwarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    pub target: String,
    pub version: String,
    pub uri: RequestTarget,
}

impl ParsedRequest {
    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    pub fn request_line(&self) -> String {
        format!("{} {} {}", self.method, self.target, self.version)
    }
}

/// Splits a raw request at the first line terminator. The second half keeps
/// the terminator so it can be appended to a rewritten request line as is.
pub(crate) fn split_request_line(raw: &[u8]) -> (&[u8], &[u8]) {
    match raw
        .windows(LINE_TERMINATOR.len())
        .position(|window| window == LINE_TERMINATOR)
    {
        Some(idx) => raw.split_at(idx),
        None => (raw, &[]),
    }
}

/// Parse the method, target, and version out of the request line.
pub fn parse_request_line(raw: &[u8]) -> Result<(String, String, String), RequestError> {
    if raw.is_empty() {
        return Err(RequestError::Empty);
    }
    let (line, _) = split_request_line(raw);
    let line = std::str::from_utf8(line).map_err(|_| RequestError::MalformedRequestLine)?;

    let mut parts = line.splitn(3, ' ');
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(RequestError::MalformedRequestLine);
    };
    if method.is_empty() || target.is_empty() || version.is_empty() {
        return Err(RequestError::MalformedRequestLine);
    }
    Ok((method.to_string(), target.to_string(), version.to_string()))
}

/// Parse a request target into absolute-URI or relative-URI form.
pub fn parse_target(target: &str) -> Result<RequestTarget, RequestError> {
    let invalid = || RequestError::InvalidTarget(target.to_string());
    let uri: Uri = target.parse().map_err(|_| invalid())?;

    if uri.scheme().is_some() && uri.authority().is_some() {
        let host = uri
            .host()
            .map(|host| {
                host.trim_start_matches('[')
                    .trim_end_matches(']')
                    .to_ascii_lowercase()
            })
            .filter(|host| !host.is_empty())
            .ok_or_else(invalid)?;
        let port = uri.port_u16().unwrap_or(80);
        // Only the path goes upstream; the query never reaches the origin.
        let path = match uri.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        return Ok(RequestTarget::Absolute { host, port, path });
    }

    if !target.starts_with('/') {
        return Err(invalid());
    }
    Ok(RequestTarget::Relative {
        path: target.to_string(),
    })
}

/// Parse the first line of a raw client request.
pub fn parse_request(raw: &[u8]) -> Result<ParsedRequest, RequestError> {
    let (method, target, version) = parse_request_line(raw)?;
    // Tunnels need an authority-form target and a raw byte splice; neither
    // fits a path-rewriting relay.
    if method == "CONNECT" {
        return Err(RequestError::UnsupportedMethod(method));
    }
    let uri = parse_target(&target)?;
    Ok(ParsedRequest {
        method,
        target,
        version,
        uri,
    })
}
