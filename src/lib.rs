//! Caching HTTP proxy backed by a time-indexed store.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod store;

pub use config::schema::ProxyConfig;
pub use lifecycle::{Server, Shutdown};
pub use store::{CacheStore, MemoryStore, StoreError};
