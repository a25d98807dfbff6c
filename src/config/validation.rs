//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes > 0, addresses and ports parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }

    if let Some(proxy) = &config.upstream.proxy {
        if config.upstream.proxy_addr().is_none() {
            errors.push(ValidationError::new(
                "upstream.proxy",
                format!("expected host:port, got {}", proxy),
            ));
        }
    }

    if config.store.cache_frames == 0 {
        errors.push(ValidationError::new("store.cache_frames", "must be > 0"));
    }
    if config.store.archive_frames == Some(0) {
        errors.push(ValidationError::new("store.archive_frames", "must be > 0 when set"));
    }

    if config.adapter.chunk_size == 0 {
        errors.push(ValidationError::new("adapter.chunk_size", "must be > 0"));
    }
    if config.adapter.pipe_capacity < config.adapter.chunk_size {
        errors.push(ValidationError::new(
            "adapter.pipe_capacity",
            "must be at least adapter.chunk_size",
        ));
    }
    if config.adapter.read_timeout_ms == 0 {
        errors.push(ValidationError::new("adapter.read_timeout_ms", "must be > 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be > 0"));
    }

    if config.cache.munge_recent_window_secs < 0.0 {
        errors.push(ValidationError::new(
            "cache.munge_recent_window_secs",
            "must not be negative",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
