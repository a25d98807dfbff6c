//! Ordered header lines and line-oriented wire reading.
//!
//! Requests and responses keep their header block as the list of lines that
//! arrived on the wire (first line included, terminating blank line
//! excluded). Lookups follow last-wins semantics; mutations touch exactly the
//! lines they name so everything else is forwarded verbatim.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Wire line terminator.
pub const CRLF: &[u8] = b"\r\n";

/// Read one line including its terminator. `None` at end of stream.
pub async fn read_raw_line<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(buf))
}

/// Strip a trailing `\n` or `\r\n`. A bare LF is tolerated.
pub fn strip_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Return the value of `line` if it is a `name:` header, case-insensitively.
pub fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (head, value) = line.split_once(':')?;
    head.trim().eq_ignore_ascii_case(name).then(|| value.trim())
}

/// The header block of a message, first line included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderLines {
    lines: Vec<String>,
}

impl HeaderLines {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The request line or status line.
    pub fn first(&self) -> Option<&str> {
        self.lines.first().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Value of the last occurrence of `name`.
    pub fn last_value(&self, name: &str) -> Option<&str> {
        self.lines
            .iter()
            .skip(1)
            .rev()
            .find_map(|line| header_value(line, name))
    }

    /// Replace the first line.
    pub fn set_first(&mut self, line: impl Into<String>) {
        match self.lines.first_mut() {
            Some(first) => *first = line.into(),
            None => self.lines.push(line.into()),
        }
    }

    /// Insert a line at `index`, clamped to the end.
    pub fn insert(&mut self, index: usize, line: impl Into<String>) {
        let index = index.min(self.lines.len());
        self.lines.insert(index, line.into());
    }

    /// Rewrite the last `name` header in place. Returns false if absent.
    pub fn replace(&mut self, name: &str, value: &str) -> bool {
        let found = self
            .lines
            .iter_mut()
            .skip(1)
            .rev()
            .find(|line| header_value(line, name).is_some());
        match found {
            Some(line) => {
                *line = format!("{}: {}", name, value);
                true
            }
            None => false,
        }
    }

    /// Remove every `name` header. The first line is never removed.
    pub fn remove_all(&mut self, name: &str) {
        let mut index = 0;
        self.lines.retain(|line| {
            let keep = index == 0 || header_value(line, name).is_none();
            index += 1;
            keep
        });
    }

    /// Append every line with CRLF, then the terminating blank line.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        for line in &self.lines {
            out.extend_from_slice(line.as_bytes());
            out.extend_from_slice(CRLF);
        }
        out.extend_from_slice(CRLF);
    }

    /// Like [`write_to`](Self::write_to) with the first line substituted.
    pub fn write_with_first(&self, first: &str, out: &mut Vec<u8>) {
        out.extend_from_slice(first.as_bytes());
        out.extend_from_slice(CRLF);
        for line in self.lines.iter().skip(1) {
            out.extend_from_slice(line.as_bytes());
            out.extend_from_slice(CRLF);
        }
        out.extend_from_slice(CRLF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HeaderLines {
        HeaderLines::new(vec![
            "HTTP/1.1 200 OK".into(),
            "Content-Length: 3".into(),
            "content-length: 5".into(),
            "Date: Sun, 06 Nov 1994 08:49:37 GMT".into(),
        ])
    }

    #[test]
    fn last_occurrence_wins() {
        assert_eq!(sample().last_value("Content-Length"), Some("5"));
        assert_eq!(sample().last_value("X-Missing"), None);
    }

    #[test]
    fn first_line_is_not_a_header() {
        let h = HeaderLines::new(vec!["Host: not-a-header".into()]);
        assert_eq!(h.last_value("Host"), None);
    }

    #[test]
    fn remove_all_keeps_first_line() {
        let mut h = sample();
        h.remove_all("content-length");
        assert_eq!(h.len(), 2);
        assert_eq!(h.first(), Some("HTTP/1.1 200 OK"));
    }

    #[test]
    fn replace_rewrites_in_place() {
        let mut h = sample();
        assert!(h.replace("Date", "Mon, 07 Nov 1994 08:49:37 GMT"));
        assert_eq!(h.iter().nth(3), Some("Date: Mon, 07 Nov 1994 08:49:37 GMT"));
        assert!(!h.replace("X-Missing", "1"));
    }

    #[test]
    fn serializes_with_crlf_and_blank_line() {
        let h = HeaderLines::new(vec!["GET / HTTP/1.0".into(), "Host: x".into()]);
        let mut out = Vec::new();
        h.write_to(&mut out);
        assert_eq!(out, b"GET / HTTP/1.0\r\nHost: x\r\n\r\n");
    }

    #[test]
    fn strips_both_terminators() {
        assert_eq!(strip_eol(b"abc\r\n"), b"abc");
        assert_eq!(strip_eol(b"abc\n"), b"abc");
        assert_eq!(strip_eol(b"abc"), b"abc");
    }

    #[tokio::test]
    async fn reads_lines_until_eof() {
        let mut input: &[u8] = b"one\r\ntwo\nthree";
        assert_eq!(read_raw_line(&mut input).await.unwrap().unwrap(), b"one\r\n");
        assert_eq!(read_raw_line(&mut input).await.unwrap().unwrap(), b"two\n");
        assert_eq!(read_raw_line(&mut input).await.unwrap().unwrap(), b"three");
        assert!(read_raw_line(&mut input).await.unwrap().is_none());
    }
}
