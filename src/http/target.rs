//! Request-target decomposition.
//!
//! Splits the target of a request line into the pieces the proxy needs:
//! scheme and authority for reaching the origin, the origin-form path for
//! forwarding, the store key, and any munge parameters that ask the store
//! for a historical range instead of the current copy.
//!
//! Munge parameters may follow either `?` or `@`:
//!
//! ```text
//! http://host/chan/data?t=1000&d=10&r=absolute
//! http://host/chan/data@t=1000&d=10&r=absolute
//! ```
//!
//! Parameters that are not munge keys stay part of the store key so that
//! distinct query strings are cached separately.

use url::Url;

/// Port used when the target carries no explicit one.
pub const DEFAULT_PORT: u16 = 80;

/// Anchor of a historical store request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reference {
    #[default]
    Newest,
    Oldest,
    Absolute,
}

impl Reference {
    /// Match on the leading letter, as in `n`, `newest`, `o`, `abs`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.chars().next()?.to_ascii_lowercase() {
            'n' => Some(Self::Newest),
            'o' => Some(Self::Oldest),
            'a' => Some(Self::Absolute),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::Oldest => "oldest",
            Self::Absolute => "absolute",
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Munge parameters found on a request target.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Munge {
    /// Start time in seconds (`t` / `time`).
    pub time: Option<f64>,
    /// Duration in seconds (`d` / `duration`).
    pub duration: Option<f64>,
    /// Raw reference string (`r` / `reference`).
    pub reference: Option<String>,
}

impl Munge {
    fn is_munge_key(key: &str) -> bool {
        matches!(
            key.to_ascii_lowercase().as_str(),
            "t" | "time" | "d" | "duration" | "r" | "reference"
        )
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key.to_ascii_lowercase().as_str() {
            "t" | "time" => self.time = value.trim().parse().ok(),
            "d" | "duration" => self.duration = value.trim().parse().ok(),
            _ => self.reference = Some(value.trim().to_string()),
        }
    }

    /// Newest-anchored request for zero duration, i.e. "whatever is current".
    pub fn is_newest_zero_duration(&self) -> bool {
        let newest = self
            .reference
            .as_deref()
            .is_some_and(|r| r.starts_with('n') || r.starts_with('N'));
        newest && self.duration.unwrap_or(0.0) == 0.0
    }

    pub fn start(&self) -> f64 {
        self.time.unwrap_or(0.0)
    }

    pub fn span(&self) -> f64 {
        self.duration.unwrap_or(0.0)
    }

    pub fn anchor(&self) -> Reference {
        self.reference
            .as_deref()
            .and_then(Reference::parse)
            .unwrap_or_default()
    }
}

/// A decomposed request target.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Target {
    /// Lower-case scheme of an absolute-form target.
    pub scheme: Option<String>,
    /// Host of an absolute-form target.
    pub host: Option<String>,
    /// Explicit port of an absolute-form target.
    pub port: Option<u16>,
    /// Path and query exactly as they should be sent to an origin.
    pub origin_form: String,
    /// Store key: host, path and non-munge query, without a leading `/`.
    pub key: String,
    /// Munge parameters, if any were present.
    pub munge: Option<Munge>,
}

impl Target {
    pub fn parse(raw: &str) -> Self {
        if raw.contains("://") {
            if let Ok(url) = Url::parse(raw) {
                return Self::from_absolute(raw, &url);
            }
        }
        let (path, munge, query) = split_munge(raw);
        Self {
            origin_form: raw.to_string(),
            key: build_key("", path, &query),
            munge,
            ..Self::default()
        }
    }

    fn from_absolute(raw: &str, url: &Url) -> Self {
        // Path and query are taken from the raw text so nothing gets
        // re-encoded on the way to the origin.
        let after_scheme = raw.split_once("://").map(|(_, rest)| rest).unwrap_or(raw);
        let origin_form = match after_scheme.find(['/', '?']) {
            Some(idx) if after_scheme[idx..].starts_with('/') => after_scheme[idx..].to_string(),
            Some(idx) => format!("/{}", &after_scheme[idx..]),
            None => "/".to_string(),
        };
        let host = url.host_str().map(str::to_string);
        let (path, munge, query) = split_munge(&origin_form);
        Self {
            scheme: Some(url.scheme().to_ascii_lowercase()),
            key: build_key(host.as_deref().unwrap_or(""), path, &query),
            host,
            port: url.port(),
            origin_form,
            munge,
        }
    }

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

/// Separate munge parameters from the rest of the target.
///
/// Returns the bare path, the munge (if any munge key appeared) and the
/// remaining query pairs in their original encoding.
fn split_munge(target: &str) -> (&str, Option<Munge>, Vec<String>) {
    let (path, params) = match target.find(['?', '@']) {
        Some(idx) => (&target[..idx], &target[idx + 1..]),
        None => (target, ""),
    };

    let mut munge: Option<Munge> = None;
    let mut rest = Vec::new();
    for pair in params.split(['&', '?', '@']).filter(|p| !p.is_empty()) {
        let decoded = url::form_urlencoded::parse(pair.as_bytes()).next();
        match decoded {
            Some((key, value)) if Munge::is_munge_key(&key) => {
                munge.get_or_insert_with(Munge::default).apply(&key, &value);
            }
            _ => rest.push(pair.to_string()),
        }
    }
    (path, munge, rest)
}

fn build_key(host: &str, path: &str, query: &[String]) -> String {
    let mut key = String::with_capacity(host.len() + path.len() + 1);
    key.push_str(host);
    if host.is_empty() {
        key.push_str(path.trim_start_matches('/'));
    } else {
        key.push_str(path);
    }
    if !query.is_empty() {
        key.push('?');
        key.push_str(&query.join("&"));
    }
    key
}
