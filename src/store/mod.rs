//! Cache store subsystem.
//!
//! # Data Flow
//! ```text
//! ConnectionHandler
//!     → CacheStore::get_header / get_data   (cache path, munge path)
//!     → CacheStore::put_data                (after a 200 from the origin)
//!
//! MemoryStore
//!     → per-resource ring of timestamped frames
//!     → optional JSON archive: loaded at startup, written at shutdown
//! ```
//!
//! # Design Decisions
//! - The store is a trait object so handlers never see the backend
//! - Every resource has one header and a time series of content frames
//! - Store errors are never fatal to a connection; callers treat them as misses

pub mod memory;

use crate::http::target::Reference;

pub use memory::MemoryStore;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store is closed")]
    Closed,

    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Time-indexed storage of response headers and bodies, keyed by resource path.
pub trait CacheStore: Send + Sync {
    /// Most recent response header stored for `path`.
    fn get_header(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Content frames of `path` in the requested time range, concatenated.
    ///
    /// `start` and `duration` are seconds. How `start` is interpreted
    /// depends on `reference`; a zero `duration` selects the single latest
    /// frame at or before the anchor.
    fn get_data(
        &self,
        path: &str,
        start: f64,
        duration: f64,
        reference: Reference,
    ) -> Result<Option<Vec<u8>>, StoreError>;

    /// Append a header and body for `path` as a new frame.
    /// Empty headers or bodies are ignored.
    fn put_data(&self, path: &str, header: &[u8], content: &[u8]) -> Result<(), StoreError>;

    /// Latest content of `path`.
    fn get_latest(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.get_data(path, 0.0, 0.0, Reference::Newest)
    }
}

/// Canonical form of a store key: one trailing `/` is dropped.
pub fn normalize_key(path: &str) -> &str {
    path.strip_suffix('/').unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_dropped_once() {
        assert_eq!(normalize_key("example.com/a/"), "example.com/a");
        assert_eq!(normalize_key("example.com/a"), "example.com/a");
        assert_eq!(normalize_key("example.com//"), "example.com/");
        assert_eq!(normalize_key(""), "");
    }
}
