//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the cache.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the caching proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Optional forwarding proxy between the cache and origins.
    pub upstream: UpstreamConfig,

    /// Cache store sizing and persistence.
    pub store: StoreConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Socket adapter tuning.
    pub adapter: AdapterConfig,

    /// Cache policy knobs.
    pub cache: CachePolicyConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:6677").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:6677".to_string(),
        }
    }
}

/// Upstream forwarding proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Forwarding proxy as `host:port`. Requests go straight to origins when unset.
    pub proxy: Option<String>,
}

impl UpstreamConfig {
    /// Split `proxy` into host and port.
    pub fn proxy_addr(&self) -> Option<(String, u16)> {
        let (host, port) = self.proxy.as_deref()?.rsplit_once(':')?;
        Some((host.to_string(), port.parse().ok()?))
    }
}

/// Cache store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Address of an external store server. The in-memory store ignores it.
    pub address: String,

    /// Frames kept in memory per resource.
    pub cache_frames: usize,

    /// Frames written to the archive per resource (defaults to `cache_frames`).
    pub archive_frames: Option<usize>,

    /// Start with an empty archive instead of loading the existing one.
    pub new_archive: bool,

    /// Archive snapshot file. No archive when unset.
    pub archive_path: Option<String>,
}

impl StoreConfig {
    pub fn archive_frames(&self) -> usize {
        self.archive_frames.unwrap_or(self.cache_frames)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: "localhost:3333".to_string(),
            cache_frames: 1000,
            archive_frames: None,
            new_archive: false,
            archive_path: None,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Origin connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// How long shutdown waits for in-flight connections, in seconds.
    pub shutdown_grace_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            shutdown_grace_secs: 10,
        }
    }
}

/// Socket adapter tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Maximum bytes per socket read.
    pub chunk_size: usize,

    /// Capacity of the in-process pipe between adapter and parser.
    pub pipe_capacity: usize,

    /// Socket read poll timeout in milliseconds.
    pub read_timeout_ms: u64,
}

impl AdapterConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            pipe_capacity: 64 * 1024,
            read_timeout_ms: 100,
        }
    }
}

/// Policy for munge (historical range) requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CachePolicyConfig {
    /// Munge requests for times this close to now are handled as ordinary
    /// requests; the store cannot have them yet.
    pub munge_recent_window_secs: f64,

    /// Handle "newest, zero duration" munges as ordinary requests.
    pub ignore_newest_zero_duration: bool,
}

impl Default for CachePolicyConfig {
    fn default() -> Self {
        Self {
            munge_recent_window_secs: 1.0,
            ignore_newest_zero_duration: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:6677");
        assert_eq!(config.store.cache_frames, 1000);
        assert_eq!(config.store.archive_frames(), 1000);
        assert!(config.upstream.proxy_addr().is_none());
        assert_eq!(config.cache.munge_recent_window_secs, 1.0);
    }

    #[test]
    fn partial_sections() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [upstream]
            proxy = "proxy.local:3128"

            [store]
            cache_frames = 10
            archive_frames = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.upstream.proxy_addr(), Some(("proxy.local".to_string(), 3128)));
        assert_eq!(config.store.archive_frames(), 50);
        assert_eq!(config.adapter.chunk_size, 4096);
    }
}
