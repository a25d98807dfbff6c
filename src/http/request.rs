//! Inbound request parsing.
//!
//! # Responsibilities
//! - Read one request head (and optional fixed-length body) from a pipe
//! - Derive method, target, version, host and port lazily from the first line
//! - Track the `If-Modified-Since` date and allow it to be rewritten
//! - Produce the full and host-stripped wire forms for forwarding
//!
//! # Design Decisions
//! - Unparsable input yields a null request rather than an error; every
//!   accessor then returns `None`
//! - Derived values and serializations are computed once and cached; only
//!   [`Request::set_modified_since`] invalidates the serializations

use std::sync::OnceLock;
use tokio::io::{AsyncBufRead, AsyncReadExt};

use crate::http::date::HttpDate;
use crate::http::headers::{read_raw_line, strip_eol, HeaderLines};
use crate::http::target::{Munge, Target};

const CONTENT_LENGTH: &str = "Content-Length";
const IF_MODIFIED_SINCE: &str = "If-Modified-Since";
const HOST: &str = "Host";
const OPTIONS: &str = "OPTIONS";

#[derive(Debug, Clone)]
struct RequestLine {
    method: String,
    language: Option<String>,
    target: Target,
    /// First line with scheme and authority removed from the target.
    line_without_host: String,
}

#[derive(Debug, Clone)]
struct HostPort {
    host: String,
    port: u16,
}

/// An HTTP request as received from a browser or rebuilt for revalidation.
#[derive(Debug, Clone, Default)]
pub struct Request {
    lines: HeaderLines,
    null: bool,
    content_length: usize,
    body: Option<Vec<u8>>,
    modified_since: Option<HttpDate>,
    request_line: OnceLock<Option<RequestLine>>,
    host_port: OnceLock<Option<HostPort>>,
    wire: OnceLock<Vec<u8>>,
    wire_without_host: OnceLock<Vec<u8>>,
}

impl Request {
    /// Read a request from `reader`.
    ///
    /// Never fails: transport and parse problems produce a null request.
    pub async fn read_from<R>(reader: &mut R) -> Self
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        let mut lines = Vec::new();
        loop {
            match read_raw_line(reader).await {
                Ok(Some(raw)) => {
                    let line = strip_eol(&raw);
                    if line.is_empty() {
                        break;
                    }
                    tracing::trace!(line = %String::from_utf8_lossy(line), "Request line read");
                    lines.push(String::from_utf8_lossy(line).into_owned());
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "Request read failed");
                    return Self::null();
                }
            }
        }
        if lines.is_empty() {
            return Self::null();
        }

        let mut request = Self {
            lines: HeaderLines::new(lines),
            ..Self::default()
        };

        // Scan from the end: only the last Content-Length / If-Modified-Since counts.
        if let Some(value) = request.lines.last_value(CONTENT_LENGTH) {
            match value.parse::<usize>() {
                Ok(n) => request.content_length = n,
                Err(_) => {
                    tracing::debug!(value, "Malformed request Content-Length");
                    return Self::null();
                }
            }
        }
        if let Some(value) = request.lines.last_value(IF_MODIFIED_SINCE) {
            match HttpDate::parse(value) {
                Ok(date) => request.modified_since = Some(date),
                Err(e) => tracing::warn!(error = %e, "Ignoring unparsable If-Modified-Since"),
            }
        }

        if request.content_length > 0 {
            // Grows with what actually arrives; the declared length is untrusted.
            let mut body = Vec::new();
            let limit = u64::try_from(request.content_length).unwrap_or(u64::MAX);
            match (&mut *reader).take(limit).read_to_end(&mut body).await {
                Ok(n) if n == request.content_length => request.body = Some(body),
                Ok(n) => {
                    tracing::debug!(expected = request.content_length, received = n, "Request body truncated");
                    return Self::null();
                }
                Err(e) => {
                    tracing::debug!(error = %e, expected = request.content_length, "Request body read failed");
                    return Self::null();
                }
            }
        }

        request
    }

    fn null() -> Self {
        Self {
            null: true,
            ..Self::default()
        }
    }

    fn request_line(&self) -> Option<&RequestLine> {
        if self.null {
            return None;
        }
        self.request_line
            .get_or_init(|| {
                let first = self.lines.first()?;
                let mut tokens = first.split_whitespace();
                let method = tokens.next()?.to_string();
                let raw_target = tokens.next()?;
                let language = tokens.next().map(str::to_string);
                let target = Target::parse(raw_target);
                let line_without_host = match &language {
                    Some(lang) => format!("{} {} {}", method, target.origin_form, lang),
                    None => format!("{} {}", method, target.origin_form),
                };
                Some(RequestLine {
                    method,
                    language,
                    target,
                    line_without_host,
                })
            })
            .as_ref()
    }

    fn host_port(&self) -> Option<&HostPort> {
        let line = self.request_line()?;
        self.host_port
            .get_or_init(|| {
                if let Some(host) = &line.target.host {
                    return Some(HostPort {
                        host: host.clone(),
                        port: line.target.port_or_default(),
                    });
                }
                // Origin-form target: fall back to the Host header.
                let value = self.lines.last_value(HOST)?;
                let (host, port) = match value.rsplit_once(':') {
                    Some((h, p)) => (h, p.parse().ok()?),
                    None => (value, line.target.port_or_default()),
                };
                Some(HostPort {
                    host: host.to_string(),
                    port,
                })
            })
            .as_ref()
    }

    /// True when nothing usable was read.
    pub fn is_null(&self) -> bool {
        self.request_line().is_none()
    }

    /// True when the proxy should answer with nothing at all (null or OPTIONS).
    pub fn wants_null_response(&self) -> bool {
        match self.request_line() {
            Some(line) => line.method == OPTIONS,
            None => true,
        }
    }

    pub fn method(&self) -> Option<&str> {
        self.request_line().map(|l| l.method.as_str())
    }

    /// Scheme of the target; origin-form targets are assumed to be `http`.
    pub fn scheme(&self) -> Option<&str> {
        self.request_line()
            .map(|l| l.target.scheme.as_deref().unwrap_or("http"))
    }

    /// Store key of the requested resource.
    pub fn path(&self) -> Option<&str> {
        self.request_line().map(|l| l.target.key.as_str())
    }

    /// HTTP version token, e.g. `HTTP/1.1`.
    pub fn language(&self) -> Option<&str> {
        self.request_line().and_then(|l| l.language.as_deref())
    }

    pub fn munge(&self) -> Option<&Munge> {
        self.request_line().and_then(|l| l.target.munge.as_ref())
    }

    pub fn host(&self) -> Option<&str> {
        self.host_port().map(|h| h.host.as_str())
    }

    pub fn port(&self) -> Option<u16> {
        self.host_port().map(|h| h.port)
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn modified_since(&self) -> Option<HttpDate> {
        if self.is_null() {
            return None;
        }
        self.modified_since
    }

    /// GET over plain http: the only requests the cache answers.
    pub fn is_cache_eligible(&self) -> bool {
        self.method() == Some("GET") && self.scheme() == Some("http")
    }

    /// Set `If-Modified-Since`, inserting the header after the request line
    /// or rewriting the existing one.
    pub fn set_modified_since(&mut self, date: HttpDate) {
        if self.is_null() {
            return;
        }
        let value = date.to_http_string();
        if !self.lines.replace(IF_MODIFIED_SINCE, &value) {
            self.lines.insert(1, format!("{}: {}", IF_MODIFIED_SINCE, value));
        }
        self.modified_since = Some(date);
        self.wire = OnceLock::new();
        self.wire_without_host = OnceLock::new();
    }

    /// The request as received (plus any conditional-date rewrite).
    pub fn to_bytes(&self) -> Option<&[u8]> {
        if self.is_null() {
            return None;
        }
        let wire = self.wire.get_or_init(|| {
            let mut out = Vec::new();
            self.lines.write_to(&mut out);
            if let Some(body) = &self.body {
                out.extend_from_slice(body);
            }
            out
        });
        Some(wire.as_slice())
    }

    /// The request with scheme and authority stripped from the target, for
    /// sending straight to the origin.
    pub fn to_bytes_without_host(&self) -> Option<&[u8]> {
        let first = self.request_line()?.line_without_host.as_str();
        let wire = self.wire_without_host.get_or_init(|| {
            let mut out = Vec::new();
            self.lines.write_with_first(first, &mut out);
            if let Some(body) = &self.body {
                out.extend_from_slice(body);
            }
            out
        });
        Some(wire.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(bytes: &[u8]) -> Request {
        let mut reader = bytes;
        Request::read_from(&mut reader).await
    }

    #[tokio::test]
    async fn empty_input_is_null() {
        let req = parse(b"").await;
        assert!(req.is_null());
        assert!(req.wants_null_response());
        assert_eq!(req.method(), None);
        assert_eq!(req.path(), None);
        assert_eq!(req.host(), None);
        assert_eq!(req.port(), None);
        assert_eq!(req.to_bytes(), None);
        assert_eq!(req.to_bytes_without_host(), None);
        assert_eq!(req.modified_since(), None);
    }

    #[tokio::test]
    async fn blank_line_is_null() {
        assert!(parse(b"\r\n").await.is_null());
    }

    #[tokio::test]
    async fn parses_absolute_form() {
        let req = parse(b"GET http://example.com:8080/a/b HTTP/1.1\r\nHost: example.com:8080\r\n\r\n").await;
        assert!(!req.is_null());
        assert_eq!(req.method(), Some("GET"));
        assert_eq!(req.scheme(), Some("http"));
        assert_eq!(req.path(), Some("example.com/a/b"));
        assert_eq!(req.language(), Some("HTTP/1.1"));
        assert_eq!(req.host(), Some("example.com"));
        assert_eq!(req.port(), Some(8080));
        assert!(req.is_cache_eligible());
        assert_eq!(
            req.to_bytes_without_host().unwrap(),
            b"GET /a/b HTTP/1.1\r\nHost: example.com:8080\r\n\r\n"
        );
        assert_eq!(
            req.to_bytes().unwrap(),
            b"GET http://example.com:8080/a/b HTTP/1.1\r\nHost: example.com:8080\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn origin_form_uses_host_header() {
        let req = parse(b"GET /a/b HTTP/1.1\nHost: x\n\n").await;
        assert_eq!(req.path(), Some("a/b"));
        assert_eq!(req.host(), Some("x"));
        assert_eq!(req.port(), Some(80));
    }

    #[tokio::test]
    async fn options_requests_get_null_response() {
        let req = parse(b"OPTIONS * HTTP/1.1\r\n\r\n").await;
        assert!(!req.is_null());
        assert!(req.wants_null_response());
    }

    #[tokio::test]
    async fn reads_fixed_length_body() {
        let req = parse(b"POST http://h/form HTTP/1.0\r\nContent-Length: 5\r\n\r\nhello trailing").await;
        assert_eq!(req.content_length(), 5);
        assert_eq!(req.body(), Some(&b"hello"[..]));
        assert!(!req.is_cache_eligible());
        assert!(req.to_bytes().unwrap().ends_with(b"\r\n\r\nhello"));
    }

    #[tokio::test]
    async fn truncated_body_is_null() {
        assert!(parse(b"POST /x HTTP/1.0\r\nContent-Length: 50\r\n\r\nshort").await.is_null());
    }

    #[tokio::test]
    async fn huge_declared_length_is_null() {
        let req = parse(b"POST http://h/x HTTP/1.0\r\nContent-Length: 100000000000000\r\n\r\nabc").await;
        assert!(req.is_null());
        assert_eq!(req.body(), None);
    }

    #[tokio::test]
    async fn malformed_content_length_is_null() {
        assert!(parse(b"POST /x HTTP/1.0\r\nContent-Length: lots\r\n\r\n").await.is_null());
    }

    #[tokio::test]
    async fn bad_conditional_date_is_not_fatal() {
        let req = parse(b"GET /x HTTP/1.0\r\nIf-Modified-Since: whenever\r\n\r\n").await;
        assert!(!req.is_null());
        assert_eq!(req.modified_since(), None);
    }

    #[tokio::test]
    async fn set_modified_since_inserts_then_rewrites() {
        let mut req = parse(b"GET /x HTTP/1.0\r\nHost: h\r\n\r\n").await;
        let before = req.to_bytes().unwrap().to_vec();

        let t0 = HttpDate::parse("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        req.set_modified_since(t0);
        assert_eq!(req.modified_since(), Some(t0));
        let after = req.to_bytes().unwrap().to_vec();
        assert_ne!(before, after);
        assert_eq!(
            after,
            b"GET /x HTTP/1.0\r\nIf-Modified-Since: Sun, 06 Nov 1994 08:49:37 GMT\r\nHost: h\r\n\r\n"
        );

        let t1 = HttpDate::parse("Mon, 07 Nov 1994 08:49:37 GMT").unwrap();
        req.set_modified_since(t1);
        let rewritten = req.to_bytes().unwrap();
        assert_eq!(
            rewritten,
            b"GET /x HTTP/1.0\r\nIf-Modified-Since: Mon, 07 Nov 1994 08:49:37 GMT\r\nHost: h\r\n\r\n"
        );
        assert!(req
            .to_bytes_without_host()
            .unwrap()
            .starts_with(b"GET /x HTTP/1.0\r\nIf-Modified-Since: Mon"));
    }

    #[tokio::test]
    async fn last_conditional_date_wins() {
        let req = parse(
            b"GET /x HTTP/1.0\r\nIf-Modified-Since: Sun, 06 Nov 1994 08:49:37 GMT\r\nif-modified-since: Mon, 07 Nov 1994 08:49:37 GMT\r\n\r\n",
        )
        .await;
        assert_eq!(
            req.modified_since().unwrap().to_http_string(),
            "Mon, 07 Nov 1994 08:49:37 GMT"
        );
    }

    #[tokio::test]
    async fn munge_is_exposed() {
        let req = parse(b"GET http://h/chan?t=5&d=1 HTTP/1.1\r\n\r\n").await;
        assert_eq!(req.path(), Some("h/chan"));
        assert_eq!(req.munge().unwrap().time, Some(5.0));
    }
}
