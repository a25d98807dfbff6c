//! Command-line arguments and how they override the config file.

use clap::Parser;
use std::path::PathBuf;

use crate::config::schema::ProxyConfig;
use crate::observability::logging;

#[derive(Debug, Parser)]
#[command(name = "web-cache")]
#[command(about = "Caching HTTP proxy with a time-indexed store", long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port to accept browser connections on
    #[arg(short = 's', long)]
    pub port: Option<u16>,

    /// Forward all origin traffic through this proxy (host:port)
    #[arg(short, long)]
    pub proxy: Option<String>,

    /// Store server address (host:port)
    #[arg(short = 'r', long = "store")]
    pub store: Option<String>,

    /// Frames kept in memory per resource
    #[arg(long)]
    pub cache_frames: Option<usize>,

    /// Frames archived per resource
    #[arg(short = 'a', long)]
    pub archive_frames: Option<usize>,

    /// Start a new archive instead of loading the existing one
    #[arg(short, long)]
    pub new_archive: bool,

    /// Debug level (1 = debug, 2+ = trace)
    #[arg(short, long, default_value_t = 0)]
    pub debug: u8,
}

impl Cli {
    /// Apply every flag that was given on top of `config`.
    pub fn apply(&self, config: &mut ProxyConfig) {
        if let Some(port) = self.port {
            config.listener.bind_address = with_port(&config.listener.bind_address, port);
        }
        if let Some(proxy) = &self.proxy {
            config.upstream.proxy = Some(proxy.clone());
        }
        if let Some(store) = &self.store {
            config.store.address = store.clone();
        }
        if let Some(frames) = self.cache_frames {
            config.store.cache_frames = frames;
        }
        if let Some(frames) = self.archive_frames {
            config.store.archive_frames = Some(frames);
        }
        if self.new_archive {
            config.store.new_archive = true;
        }
        if let Some(level) = logging::level_for_debug(self.debug) {
            config.observability.log_level = level.to_string();
        }
    }
}

/// Replace the port of a `host:port` bind address.
fn with_port(bind_address: &str, port: u16) -> String {
    let host = bind_address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or("0.0.0.0");
    format!("{}:{}", host, port)
}
