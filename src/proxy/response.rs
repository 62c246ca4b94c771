use http::StatusCode;

const BAD_REQUEST: &[u8] = b"HTTP/1.0 400 Bad Request\r\nContent-Length: 0\r\n\r\n";
const NOT_FOUND: &[u8] = b"HTTP/1.0 404 Not Found\r\nContent-Length: 0\r\n\r\n";
const URI_TOO_LONG: &[u8] = b"HTTP/1.0 414 Request-URI Too Long\r\nContent-Length: 0\r\n\r\n";
const NOT_IMPLEMENTED: &[u8] = b"HTTP/1.0 501 Not Implemented\r\nContent-Length: 0\r\n\r\n";
const INTERNAL_ERROR: &[u8] =
    b"HTTP/1.0 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n";

/// The status actually emitted for `status`. Codes without a canned
/// response collapse to 500.
pub fn emitted_status(status: StatusCode) -> StatusCode {
    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::NOT_FOUND
        | StatusCode::URI_TOO_LONG
        | StatusCode::NOT_IMPLEMENTED => status,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A complete empty-bodied HTTP/1.0 response for `status`.
pub fn status_response(status: StatusCode) -> &'static [u8] {
    match emitted_status(status) {
        StatusCode::BAD_REQUEST => BAD_REQUEST,
        StatusCode::NOT_FOUND => NOT_FOUND,
        StatusCode::URI_TOO_LONG => URI_TOO_LONG,
        StatusCode::NOT_IMPLEMENTED => NOT_IMPLEMENTED,
        _ => INTERNAL_ERROR,
    }
}

/// Reads the status code from the first line of relayed response bytes.
pub fn response_status(response: &[u8]) -> Option<StatusCode> {
    let line_end = response
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(response.len());
    let line = std::str::from_utf8(&response[..line_end]).ok()?;
    let mut parts = line.split(' ');
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    let code = parts.next()?;
    StatusCode::from_bytes(code.as_bytes()).ok()
}
