//! Origin response parsing and cache-side response synthesis.
//!
//! # Responsibilities
//! - Read a status line and headers, relaying each line to the browser as it
//!   arrives
//! - Infer body framing and read the body, relaying it the same way
//! - Rebuild a header-only response from cached header bytes and either
//!   attach cached content or turn it into `304 Not Modified`
//!
//! # Framing
//! Checked in this order once the header block is in:
//! 1. no (or zero) `Content-Length` and status `200`: raw chunks until EOF
//! 2. `Content-Length` > 0: exactly that many bytes
//! 3. `text/` content type: lines until EOF, one trailing blank line dropped
//!
//! Anything else is header-only. A body shorter than its declared length
//! degrades to header-only instead of failing.
//!
//! # Wire form
//! Header lines joined with CRLF plus the blank line, then the content, then
//! one CRLF. A header-only response serializes to its header block alone.
//! The bytes relayed after the header block always equal the serialized
//! body section.

use std::sync::OnceLock;
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::http::date::HttpDate;
use crate::http::headers::{read_raw_line, strip_eol, HeaderLines, CRLF};

const CONTENT_LENGTH: &str = "Content-Length";
const CONTENT_TYPE: &str = "Content-Type";
const LAST_MODIFIED: &str = "Last-Modified";
const DATE: &str = "Date";
const TEXT_TYPE: &str = "text/";
const ERROR_LINE: &str = "Error";
const NOT_MODIFIED_LINE: &str = "HTTP/1.1 304 Not Modified";
const CHUNK_SIZE: usize = 1024;

/// Downstream copy of everything read.
///
/// A failing downstream (browser hung up) is dropped after the first error so
/// the origin read can still complete and populate the cache.
struct Tee<'a, W: ?Sized> {
    inner: Option<&'a mut W>,
}

impl<'a, W> Tee<'a, W>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    async fn write(&mut self, bytes: &[u8]) {
        if let Some(out) = self.inner.as_mut() {
            if let Err(e) = out.write_all(bytes).await {
                tracing::debug!(error = %e, "Downstream write failed, detaching tee");
                self.inner = None;
            }
        }
    }

    async fn flush(&mut self) {
        if let Some(out) = self.inner.as_mut() {
            if let Err(e) = out.flush().await {
                tracing::debug!(error = %e, "Downstream flush failed");
                self.inner = None;
            }
        }
    }
}

/// An HTTP response read from an origin or rebuilt from the cache.
#[derive(Debug, Clone, Default)]
pub struct Response {
    lines: HeaderLines,
    null: bool,
    header_only: bool,
    is_text: bool,
    content_length: usize,
    last_modified: Option<HttpDate>,
    content: Option<Vec<u8>>,
    body_lines: Vec<Vec<u8>>,
    status_code: OnceLock<Option<String>>,
    header: OnceLock<Vec<u8>>,
    text_body: OnceLock<Vec<u8>>,
    wire: OnceLock<Vec<u8>>,
}

impl Response {
    /// Read a complete response without relaying it anywhere.
    pub async fn read_from<R>(reader: &mut R) -> Self
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        Self::read_inner(reader, Tee::<tokio::io::Sink> { inner: None }, false).await
    }

    /// Read a complete response, writing every byte consumed to `tee`.
    pub async fn read_teed<R, W>(reader: &mut R, tee: &mut W) -> Self
    where
        R: AsyncBufRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        Self::read_inner(reader, Tee { inner: Some(tee) }, false).await
    }

    /// Read only the header block from `reader`; the body is left unread.
    pub async fn read_header_from<R>(reader: &mut R) -> Self
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        Self::read_inner(reader, Tee::<tokio::io::Sink> { inner: None }, true).await
    }

    /// Build a header-only response from stored header bytes.
    pub fn from_header_bytes(bytes: &[u8]) -> Self {
        let lines = bytes
            .split(|b| *b == b'\n')
            .map(strip_eol)
            .take_while(|line| !line.is_empty())
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect();
        Self::from_lines(lines, true)
    }

    async fn read_inner<R, W>(reader: &mut R, mut tee: Tee<'_, W>, header_only: bool) -> Self
    where
        R: AsyncBufRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut lines = Vec::new();
        loop {
            match read_raw_line(reader).await {
                Ok(Some(raw)) => {
                    tee.write(&raw).await;
                    let line = strip_eol(&raw);
                    if line.is_empty() {
                        break;
                    }
                    lines.push(String::from_utf8_lossy(line).into_owned());
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "Response header read failed");
                    tee.flush().await;
                    return Self::null();
                }
            }
        }

        let mut response = Self::from_lines(lines, header_only);
        if !response.null && !header_only {
            if let Err(e) = response.read_body(reader, &mut tee).await {
                tracing::debug!(error = %e, "Response body read failed");
                response = Self::null();
            }
        }
        tee.flush().await;
        response
    }

    fn from_lines(lines: Vec<String>, header_only: bool) -> Self {
        let lines = HeaderLines::new(lines);
        if lines.is_empty() || lines.first() == Some(ERROR_LINE) {
            tracing::debug!("Null response header");
            return Self::null();
        }

        let mut response = Self {
            header_only,
            ..Self::default()
        };
        if let Some(value) = lines.last_value(CONTENT_LENGTH) {
            match value.parse() {
                Ok(n) => response.content_length = n,
                Err(_) => {
                    tracing::debug!(value, "Malformed response Content-Length");
                    return Self::null();
                }
            }
        }
        response.is_text = lines
            .last_value(CONTENT_TYPE)
            .is_some_and(|v| v.contains(TEXT_TYPE));
        if let Some(value) = lines.last_value(LAST_MODIFIED) {
            match HttpDate::parse(value) {
                Ok(date) => response.last_modified = Some(date),
                Err(e) => tracing::debug!(error = %e, "Ignoring unparsable Last-Modified"),
            }
        }
        response.lines = lines;
        response
    }

    async fn read_body<R, W>(&mut self, reader: &mut R, tee: &mut Tee<'_, W>) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        if self.content_length == 0 && self.status_code() == Some("200") {
            // Many origins omit Content-Length; read to EOF.
            let mut content = Vec::new();
            let mut chunk = [0u8; CHUNK_SIZE];
            loop {
                let n = reader.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                tee.write(&chunk[..n]).await;
                content.extend_from_slice(&chunk[..n]);
            }
            tee.write(CRLF).await;
            self.content_length = content.len();
            self.content = Some(content);
        } else if self.content_length > 0 {
            // Grows with what actually arrives; the declared length is untrusted.
            let mut content = Vec::with_capacity(self.content_length.min(CHUNK_SIZE));
            let mut chunk = [0u8; CHUNK_SIZE];
            while content.len() < self.content_length {
                let want = (self.content_length - content.len()).min(CHUNK_SIZE);
                let n = reader.read(&mut chunk[..want]).await?;
                if n == 0 {
                    break;
                }
                tee.write(&chunk[..n]).await;
                content.extend_from_slice(&chunk[..n]);
            }
            if content.len() < self.content_length {
                tracing::debug!(
                    declared = self.content_length,
                    received = content.len(),
                    "Response body shorter than Content-Length, keeping header only"
                );
                self.content_length = 0;
                self.header_only = true;
            } else {
                tee.write(CRLF).await;
                self.content = Some(content);
            }
        } else if self.is_text {
            while let Some(raw) = read_raw_line(reader).await? {
                let line = strip_eol(&raw);
                tee.write(line).await;
                tee.write(CRLF).await;
                self.body_lines.push(line.to_vec());
            }
            // Line-wise EOF detection leaves one blank line behind; it stands
            // in for the final CRLF of the wire form.
            if self.body_lines.last().is_some_and(|l| l.is_empty()) {
                self.body_lines.pop();
            } else {
                tee.write(CRLF).await;
            }
        } else {
            self.header_only = true;
        }
        Ok(())
    }

    fn null() -> Self {
        Self {
            null: true,
            ..Self::default()
        }
    }

    pub fn is_null(&self) -> bool {
        self.null
    }

    pub fn is_header_only(&self) -> bool {
        self.header_only
    }

    pub fn is_text(&self) -> bool {
        self.is_text
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    /// Status code token from the status line, e.g. `"200"`.
    pub fn status_code(&self) -> Option<&str> {
        if self.null {
            return None;
        }
        self.status_code
            .get_or_init(|| {
                self.lines
                    .first()?
                    .split_whitespace()
                    .nth(1)
                    .map(str::to_string)
            })
            .as_deref()
    }

    pub fn last_modified(&self) -> Option<HttpDate> {
        self.last_modified
    }

    /// Value of the last `name` header.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.lines.last_value(name)
    }

    /// The header block in wire form, terminating blank line included.
    pub fn header(&self) -> Option<&[u8]> {
        if self.null {
            return None;
        }
        let header = self.header.get_or_init(|| {
            let mut out = Vec::new();
            self.lines.write_to(&mut out);
            out
        });
        Some(header.as_slice())
    }

    /// Body bytes without the trailing CRLF of the wire form.
    pub fn content(&self) -> Option<&[u8]> {
        if self.null || self.header_only {
            return None;
        }
        if let Some(content) = &self.content {
            return Some(content.as_slice());
        }
        if self.is_text {
            let body = self.text_body.get_or_init(|| {
                let mut out = Vec::new();
                for line in &self.body_lines {
                    out.extend_from_slice(line);
                    out.extend_from_slice(CRLF);
                }
                out
            });
            return Some(body.as_slice());
        }
        None
    }

    /// The whole response in wire form.
    pub fn to_bytes(&self) -> Option<&[u8]> {
        let header = self.header()?;
        if self.header_only {
            return Some(header);
        }
        let wire = self.wire.get_or_init(|| {
            let content = self.content().unwrap_or_default();
            let mut out = Vec::with_capacity(header.len() + content.len() + CRLF.len());
            out.extend_from_slice(header);
            out.extend_from_slice(content);
            out.extend_from_slice(CRLF);
            out
        });
        Some(wire.as_slice())
    }

    /// Turn this response into `304 Not Modified` with a fresh `Date`.
    pub fn set_not_modified(&mut self) {
        if self.null {
            return;
        }
        self.lines.set_first(NOT_MODIFIED_LINE);
        self.lines.remove_all(CONTENT_LENGTH);
        self.lines.remove_all(LAST_MODIFIED);
        self.lines.remove_all(DATE);
        self.lines
            .insert(1, format!("{}: {}", DATE, HttpDate::now().to_http_string()));

        self.header_only = true;
        self.is_text = false;
        self.content_length = 0;
        self.last_modified = None;
        self.content = None;
        self.body_lines.clear();
        self.invalidate();
    }

    /// Attach content to a header-only response.
    pub fn set_content(&mut self, content: Vec<u8>) {
        if self.null {
            return;
        }
        self.content_length = content.len();
        self.content = Some(content);
        self.header_only = false;
        self.is_text = false;
        self.body_lines.clear();
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.status_code = OnceLock::new();
        self.header = OnceLock::new();
        self.text_body = OnceLock::new();
        self.wire = OnceLock::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAST_MOD: &str = "Sun, 06 Nov 1994 08:49:37 GMT";

    async fn read_teed(input: &[u8]) -> (Response, Vec<u8>) {
        let mut reader = input;
        let mut tee = Vec::new();
        let response = Response::read_teed(&mut reader, &mut tee).await;
        (response, tee)
    }

    fn body_section<'a>(response: &'a Response) -> &'a [u8] {
        let header_len = response.header().unwrap().len();
        &response.to_bytes().unwrap()[header_len..]
    }

    fn tee_body<'a>(tee: &'a [u8], input: &[u8]) -> &'a [u8] {
        let header_end = input.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        &tee[header_end..]
    }

    #[tokio::test]
    async fn content_length_framing_round_trips() {
        let input = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nLast-Modified: {}\r\nX-A: 1\r\n\r\nhello",
            LAST_MOD
        );
        let mut reader = input.as_bytes();
        let first = Response::read_from(&mut reader).await;
        assert_eq!(first.status_code(), Some("200"));
        assert_eq!(first.content(), Some(&b"hello"[..]));
        assert_eq!(first.last_modified().unwrap().to_http_string(), LAST_MOD);

        let wire = first.to_bytes().unwrap().to_vec();
        let mut reader = wire.as_slice();
        let second = Response::read_from(&mut reader).await;
        assert_eq!(second.status_code(), first.status_code());
        assert_eq!(second.header(), first.header());
        assert_eq!(second.content(), first.content());
    }

    #[tokio::test]
    async fn tee_matches_body_for_content_length() {
        let input = b"HTTP/1.1 404 Not Found\r\nContent-Length: 4\r\n\r\nnope";
        let (response, tee) = read_teed(input).await;
        assert_eq!(tee_body(&tee, input), body_section(&response));
        assert!(tee.starts_with(b"HTTP/1.1 404 Not Found\r\nContent-Length: 4\r\n\r\n"));
    }

    #[tokio::test]
    async fn eof_binary_framing_without_length() {
        let input = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<html>body</html>";
        let (response, tee) = read_teed(input).await;
        assert_eq!(response.content(), Some(&b"<html>body</html>"[..]));
        assert_eq!(response.content_length(), 17);
        assert_eq!(tee_body(&tee, input), body_section(&response));
    }

    #[tokio::test]
    async fn eof_binary_framing_spans_many_chunks() {
        let body: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let mut input = b"HTTP/1.0 200 OK\r\n\r\n".to_vec();
        input.extend_from_slice(&body);
        let (response, tee) = read_teed(&input).await;
        assert_eq!(response.content(), Some(body.as_slice()));
        assert_eq!(tee_body(&tee, &input), body_section(&response));
    }

    #[tokio::test]
    async fn text_framing_drops_trailing_blank_line() {
        let input = b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\n\r\nline one\r\nline two\r\n\r\n";
        let (response, tee) = read_teed(input).await;
        assert_eq!(response.content(), Some(&b"line one\r\nline two\r\n"[..]));
        assert_eq!(tee_body(&tee, input), body_section(&response));
    }

    #[tokio::test]
    async fn text_framing_without_trailing_blank_line() {
        let input = b"HTTP/1.1 500 Oops\r\nContent-Type: text/plain\r\n\r\nfirst\nsecond";
        let (response, tee) = read_teed(input).await;
        assert_eq!(response.content(), Some(&b"first\r\nsecond\r\n"[..]));
        assert_eq!(tee_body(&tee, input), body_section(&response));
    }

    #[tokio::test]
    async fn short_body_degrades_to_header_only() {
        let input = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nonly this";
        let mut reader = &input[..];
        let response = Response::read_from(&mut reader).await;
        assert!(!response.is_null());
        assert!(response.is_header_only());
        assert_eq!(response.content(), None);
        assert_eq!(response.to_bytes(), response.header());
    }

    #[tokio::test]
    async fn huge_declared_length_degrades_to_header_only() {
        let input = b"HTTP/1.1 200 OK\r\nContent-Length: 100000000000000\r\n\r\nabc";
        let (response, tee) = read_teed(input).await;
        assert!(!response.is_null());
        assert!(response.is_header_only());
        assert_eq!(response.content(), None);
        assert_eq!(tee, input.to_vec());
    }

    #[tokio::test]
    async fn non_200_without_length_or_text_is_header_only() {
        let input = b"HTTP/1.1 302 Found\r\nLocation: /x\r\n\r\n";
        let mut reader = &input[..];
        let response = Response::read_from(&mut reader).await;
        assert!(response.is_header_only());
        assert_eq!(response.to_bytes().unwrap(), &input[..]);
    }

    #[tokio::test]
    async fn blank_line_response_is_null() {
        let mut reader = &b"\r\n"[..];
        let response = Response::read_from(&mut reader).await;
        assert!(response.is_null());
        assert_eq!(response.status_code(), None);
        assert_eq!(response.header(), None);
        assert_eq!(response.content(), None);
        assert_eq!(response.to_bytes(), None);
        assert_eq!(response.last_modified(), None);
    }

    #[tokio::test]
    async fn error_sentinel_is_null() {
        let mut reader = &b"Error\r\n\r\n"[..];
        assert!(Response::read_from(&mut reader).await.is_null());
    }

    #[tokio::test]
    async fn header_only_read_leaves_body() {
        let input = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc";
        let mut reader = &input[..];
        let response = Response::read_header_from(&mut reader).await;
        assert!(response.is_header_only());
        assert_eq!(reader, b"abc");
    }

    #[test]
    fn not_modified_transition() {
        let header = format!(
            "HTTP/1.1 200 OK\r\nDate: {d}\r\nContent-Length: 5\r\nLast-Modified: {d}\r\nServer: x\r\n\r\n",
            d = LAST_MOD
        );
        let mut response = Response::from_header_bytes(header.as_bytes());
        response.set_content(b"hello".to_vec());
        assert_eq!(response.content(), Some(&b"hello"[..]));

        response.set_not_modified();
        let once: Vec<String> = response.lines.iter().map(|l| l.split(':').next().unwrap().to_string()).collect();
        response.set_not_modified();
        let twice: Vec<String> = response.lines.iter().map(|l| l.split(':').next().unwrap().to_string()).collect();
        assert_eq!(once, twice);

        assert_eq!(response.status_code(), Some("304"));
        assert_eq!(response.content(), None);
        assert_eq!(response.header_value("Content-Length"), None);
        assert_eq!(response.header_value("Last-Modified"), None);
        assert!(response.header_value("Date").is_some());
        assert_ne!(response.header_value("Date"), Some(LAST_MOD));
        assert!(response.header_value("Server").is_some());
        let wire = String::from_utf8(response.to_bytes().unwrap().to_vec()).unwrap();
        assert!(wire.starts_with("HTTP/1.1 304 Not Modified\r\nDate: "));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn set_content_on_cached_header() {
        let mut response = Response::from_header_bytes(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\n");
        assert!(response.is_header_only());
        assert_eq!(response.content(), None);
        response.set_content(b"abc".to_vec());
        assert_eq!(
            response.to_bytes().unwrap(),
            b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc\r\n"
        );
    }

    #[test]
    fn empty_cached_header_is_null() {
        assert!(Response::from_header_bytes(b"").is_null());
    }
}
