//! HTTP timestamp parsing, formatting and ordering.
//!
//! # Responsibilities
//! - Parse the three date formats HTTP/1.1 requires recipients to accept
//!   (RFC 1123, RFC 850, asctime)
//! - Format dates in the preferred RFC 1123 form
//! - Order dates at one-second resolution
//!
//! # Design Decisions
//! - Sub-second precision is discarded on construction so that a date parsed
//!   back from its own formatted string compares equal to the original

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use std::fmt;
use std::str::FromStr;

const RFC1123: &str = "%a, %d %b %Y %H:%M:%S GMT";
const RFC850: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME: &str = "%a %b %d %H:%M:%S %Y";

/// Error returned when a header value is not a recognizable HTTP date.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized HTTP date: {0:?}")]
pub struct DateParseError(pub String);

/// A timestamp as carried in `Date`, `Last-Modified` and
/// `If-Modified-Since` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HttpDate(DateTime<Utc>);

impl HttpDate {
    /// The current wall-clock time.
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Parse any of the accepted HTTP date formats.
    ///
    /// Old browsers append `; length=N` to `If-Modified-Since`; anything
    /// after a `;` is ignored.
    pub fn parse(value: &str) -> Result<Self, DateParseError> {
        let trimmed = value.split(';').next().unwrap_or_default().trim();

        if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
            return Ok(Self::from(dt.with_timezone(&Utc)));
        }

        let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
        [RFC1123, RFC850, ASCTIME]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(&collapsed, fmt).ok())
            .map(|naive| Self::from(naive.and_utc()))
            .ok_or_else(|| DateParseError(value.to_string()))
    }

    /// RFC 1123 representation, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
    pub fn to_http_string(&self) -> String {
        self.0.format(RFC1123).to_string()
    }

    /// True when `self` is strictly after `other`.
    pub fn later_than(&self, other: &HttpDate) -> bool {
        self > other
    }

    /// Seconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.0.timestamp()
    }
}

impl From<DateTime<Utc>> for HttpDate {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.trunc_subsecs(0))
    }
}

impl FromStr for HttpDate {
    type Err = DateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for HttpDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_http_string())
    }
}
