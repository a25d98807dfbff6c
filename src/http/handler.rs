//! Per-connection request handling.
//!
//! # Responsibilities
//! - Read one request from a browser (or take a saved one for revalidation)
//! - Answer it from the cache, from the store's history, or from the origin
//! - Write cacheable origin responses back to the store
//! - Tear every socket and adapter down in a fixed order
//!
//! # State machine
//! ```text
//! read request ─┬─ null / OPTIONS ───────────────────────────────▶ close
//!               ├─ background ──────────────────▶ origin ─▶ store ─▶ close
//!               ├─ munge (old enough) ──▶ history ─▶ browser ─────▶ close
//!               ├─ GET http, header cached ─▶ 304 or content ─▶ browser
//!               │                              └─▶ spawn background revalidation
//!               └─ otherwise ─▶ origin ─(tee)─▶ browser, 200 GET ─▶ store
//! ```
//!
//! # Design Decisions
//! - Every handler runs in its own task with a tracked guard and a span
//!   carrying its connection ID
//! - The browser gets origin bytes as they arrive; the store gets the
//!   parsed response afterwards
//! - Store failures degrade to a miss, never to a failed connection
//! - A cached header without content is a miss

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::schema::{AdapterConfig, CachePolicyConfig, ProxyConfig};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::target::{Munge, DEFAULT_PORT};
use crate::net::adapter::StreamAdapter;
use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::observability::metrics;
use crate::store::CacheStore;

/// Error type for a failed connection.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("request names no host to connect to")]
    NoHost,

    #[error("connecting to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("connecting to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase} failed: {source}")]
    Io {
        phase: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl HandlerError {
    fn io(phase: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Self::Io { phase, source }
    }
}

/// How a connection ended. Used as a metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Null or OPTIONS request, nothing written.
    Ignored,
    /// Answered from store history.
    Munge,
    /// Cached content served.
    CacheHit,
    /// Cached copy is as old as the browser's; 304 served.
    NotModified,
    /// Fetched from the origin for a browser.
    Origin,
    /// Background fetch refreshing the cache.
    Revalidated,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Munge => "munge",
            Self::CacheHit => "hit",
            Self::NotModified => "not_modified",
            Self::Origin => "origin",
            Self::Revalidated => "revalidated",
        }
    }
}

/// Shared state every handler needs.
pub struct HandlerContext {
    pub store: Arc<dyn CacheStore>,
    /// Forwarding proxy; origins are contacted directly when unset.
    pub upstream: Option<(String, u16)>,
    pub adapter: AdapterConfig,
    pub policy: CachePolicyConfig,
    pub connect_timeout: Duration,
    pub tracker: ConnectionTracker,
}

impl HandlerContext {
    pub fn new(config: &ProxyConfig, store: Arc<dyn CacheStore>, tracker: ConnectionTracker) -> Self {
        Self {
            store,
            upstream: config.upstream.proxy_addr(),
            adapter: config.adapter.clone(),
            policy: config.cache.clone(),
            connect_timeout: config.timeouts.connect(),
            tracker,
        }
    }
}

enum Source {
    Browser(TcpStream),
    Background(Request),
}

/// Sockets and adapters owned by one handler, closed in a fixed order.
#[derive(Default)]
struct Streams {
    browser_out: Option<OwnedWriteHalf>,
    browser_in: Option<StreamAdapter>,
    origin_out: Option<OwnedWriteHalf>,
    origin_in: Option<StreamAdapter>,
}

impl Streams {
    /// Browser output, browser input, origin output, origin input.
    async fn close(&mut self) {
        if let Some(mut out) = self.browser_out.take() {
            if let Err(e) = out.shutdown().await {
                tracing::trace!(error = %e, "Browser shutdown failed");
            }
        }
        if let Some(adapter) = self.browser_in.take() {
            adapter.close();
        }
        if let Some(mut out) = self.origin_out.take() {
            if let Err(e) = out.shutdown().await {
                tracing::trace!(error = %e, "Origin shutdown failed");
            }
        }
        if let Some(adapter) = self.origin_in.take() {
            adapter.close();
        }
    }
}

/// Serves exactly one request.
pub struct ConnectionHandler {
    ctx: Arc<HandlerContext>,
    source: Source,
}

impl ConnectionHandler {
    /// Handler for a freshly accepted browser connection.
    pub fn for_browser(ctx: Arc<HandlerContext>, stream: TcpStream) -> Self {
        Self {
            ctx,
            source: Source::Browser(stream),
        }
    }

    /// Handler that re-fetches `request` from the origin to refresh the cache.
    pub fn for_revalidation(ctx: Arc<HandlerContext>, request: Request) -> Self {
        Self {
            ctx,
            source: Source::Background(request),
        }
    }

    /// Run the handler in its own task. It counts as in flight from this call on.
    pub fn spawn(self) -> JoinHandle<()> {
        let guard = self.ctx.tracker.track();
        tokio::spawn(self.run_tracked(guard))
    }

    /// Serve the request and tear everything down.
    pub async fn run(self) {
        let guard = self.ctx.tracker.track();
        self.run_tracked(guard).await
    }

    async fn run_tracked(self, guard: ConnectionGuard) {
        let background = matches!(self.source, Source::Background(_));
        let span = tracing::info_span!(
            "connection",
            id = %guard.id(),
            background,
            path = tracing::field::Empty,
        );

        async move {
            let start = Instant::now();
            let mut streams = Streams::default();

            match self.serve(&mut streams).await {
                Ok(outcome) => {
                    tracing::debug!(outcome = outcome.as_str(), "Request served");
                    metrics::record_request(outcome.as_str(), start);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Request failed");
                    metrics::record_origin_error();
                    metrics::record_request("error", start);
                }
            }

            streams.close().await;
            drop(guard);
        }
        .instrument(span)
        .await
    }

    async fn serve(self, streams: &mut Streams) -> Result<Outcome, HandlerError> {
        let (mut request, background) = match self.source {
            Source::Browser(stream) => {
                let (read_half, write_half) = stream.into_split();
                let (adapter, mut pipe) = StreamAdapter::spawn(read_half, "browser", &self.ctx.adapter);
                streams.browser_out = Some(write_half);
                streams.browser_in = Some(adapter);
                (Request::read_from(&mut pipe).await, false)
            }
            Source::Background(request) => (request, true),
        };

        if request.wants_null_response() {
            tracing::debug!(method = request.method(), "Nothing to answer");
            return Ok(Outcome::Ignored);
        }

        let path = request.path().unwrap_or_default().to_string();
        tracing::Span::current().record("path", path.as_str());
        tracing::debug!(method = request.method(), "Request read");

        if background {
            fetch_from_origin(&self.ctx, &request, &path, streams).await?;
            return Ok(Outcome::Revalidated);
        }

        if request.is_cache_eligible() {
            if let Some(munge) = request.munge() {
                if munge_applies(&self.ctx.policy, munge, now_secs()) {
                    return serve_munge(&self.ctx, munge, &path, streams).await;
                }
            }

            if let Some(outcome) = serve_from_cache(&self.ctx, &mut request, &path, streams).await? {
                ConnectionHandler::for_revalidation(Arc::clone(&self.ctx), request).spawn();
                return Ok(outcome);
            }
        }

        fetch_from_origin(&self.ctx, &request, &path, streams).await?;
        Ok(Outcome::Origin)
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// True when a munge request should be answered from store history.
///
/// Munges for "whatever is newest" or for times within the recent window
/// are treated as ordinary requests.
fn munge_applies(policy: &CachePolicyConfig, munge: &Munge, now: f64) -> bool {
    if policy.ignore_newest_zero_duration && munge.is_newest_zero_duration() {
        return false;
    }
    match munge.time {
        Some(t) => now - t >= policy.munge_recent_window_secs,
        None => true,
    }
}

fn log_store_error(operation: &'static str, e: &crate::store::StoreError) {
    tracing::warn!(operation, error = %e, "Store failed, treating as a miss");
    metrics::record_store_error(operation);
}

async fn write_to_browser(streams: &mut Streams, bytes: &[u8]) -> Result<(), HandlerError> {
    if let Some(out) = streams.browser_out.as_mut() {
        out.write_all(bytes).await.map_err(HandlerError::io("browser write"))?;
        out.flush().await.map_err(HandlerError::io("browser flush"))?;
    }
    Ok(())
}

async fn serve_munge(
    ctx: &HandlerContext,
    munge: &Munge,
    path: &str,
    streams: &mut Streams,
) -> Result<Outcome, HandlerError> {
    let header = match ctx.store.get_header(path) {
        Ok(header) => header,
        Err(e) => {
            log_store_error("get_header", &e);
            None
        }
    };
    let Some(header) = header else {
        tracing::debug!("No history for munge request");
        return Ok(Outcome::Munge);
    };

    let mut response = Response::from_header_bytes(&header);
    let data = ctx
        .store
        .get_data(path, munge.start(), munge.span(), munge.anchor())
        .unwrap_or_else(|e| {
            log_store_error("get_data", &e);
            None
        });
    match data {
        Some(content) => response.set_content(content),
        None => response.set_not_modified(),
    }

    tracing::debug!(
        start = munge.start(),
        duration = munge.span(),
        reference = %munge.anchor(),
        status = response.status_code(),
        "Serving from history"
    );
    if let Some(bytes) = response.to_bytes() {
        write_to_browser(streams, bytes).await?;
    }
    Ok(Outcome::Munge)
}

/// Answer from the cache. `None` means a miss.
///
/// On a hit the request's `If-Modified-Since` is set to the cached
/// `Last-Modified` (unless the browser sent an older date) so the background
/// revalidation is conditional.
async fn serve_from_cache(
    ctx: &HandlerContext,
    request: &mut Request,
    path: &str,
    streams: &mut Streams,
) -> Result<Option<Outcome>, HandlerError> {
    let header = match ctx.store.get_header(path) {
        Ok(Some(header)) => header,
        Ok(None) => {
            tracing::debug!("Cache miss");
            return Ok(None);
        }
        Err(e) => {
            log_store_error("get_header", &e);
            return Ok(None);
        }
    };

    let mut response = Response::from_header_bytes(&header);
    if response.is_null() {
        tracing::debug!("Cached header unusable");
        return Ok(None);
    }

    let cached = response.last_modified();
    let client = request.modified_since();
    let fresh = match (cached, client) {
        (Some(cached), Some(client)) => !cached.later_than(&client),
        _ => false,
    };

    let outcome = if fresh {
        response.set_not_modified();
        Outcome::NotModified
    } else {
        let content = match ctx.store.get_latest(path) {
            Ok(Some(content)) => content,
            Ok(None) => {
                tracing::debug!("Cached header has no content");
                return Ok(None);
            }
            Err(e) => {
                log_store_error("get_data", &e);
                return Ok(None);
            }
        };
        response.set_content(content);
        Outcome::CacheHit
    };

    if let Some(cached) = cached {
        if fresh || client.is_none() {
            request.set_modified_since(cached);
        }
    }

    tracing::debug!(outcome = outcome.as_str(), "Cache hit");
    if let Some(bytes) = response.to_bytes() {
        write_to_browser(streams, bytes).await?;
    }

    // Browser is done; release it before revalidation starts.
    if let Some(mut out) = streams.browser_out.take() {
        if let Err(e) = out.shutdown().await {
            tracing::trace!(error = %e, "Browser shutdown failed");
        }
    }
    if let Some(adapter) = streams.browser_in.take() {
        adapter.close();
    }
    Ok(Some(outcome))
}

/// Forward `request` to the origin (or upstream proxy), relay the response to
/// the browser if there is one, and store a cacheable 200.
async fn fetch_from_origin(
    ctx: &HandlerContext,
    request: &Request,
    path: &str,
    streams: &mut Streams,
) -> Result<(), HandlerError> {
    let (host, port, wire) = match &ctx.upstream {
        Some((host, port)) => (host.clone(), *port, request.to_bytes()),
        None => {
            let host = request.host().ok_or(HandlerError::NoHost)?.to_string();
            let port = request.port().unwrap_or(DEFAULT_PORT);
            (host, port, request.to_bytes_without_host())
        }
    };
    let addr = format!("{}:{}", host, port);

    let stream = tokio::time::timeout(ctx.connect_timeout, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| HandlerError::ConnectTimeout { addr: addr.clone() })?
        .map_err(|source| HandlerError::Connect {
            addr: addr.clone(),
            source,
        })?;
    tracing::debug!(origin = %addr, "Connected to origin");

    let (read_half, write_half) = stream.into_split();
    let (adapter, mut pipe) = StreamAdapter::spawn(read_half, format!("origin {}", addr), &ctx.adapter);
    streams.origin_in = Some(adapter);
    let origin_out = streams.origin_out.insert(write_half);

    origin_out
        .write_all(wire.unwrap_or_default())
        .await
        .map_err(HandlerError::io("origin write"))?;
    origin_out.flush().await.map_err(HandlerError::io("origin flush"))?;

    let response = match streams.browser_out.as_mut() {
        Some(browser) => {
            let response = Response::read_teed(&mut pipe, browser).await;
            if let Err(e) = browser.flush().await {
                tracing::debug!(error = %e, "Browser flush failed");
            }
            response
        }
        None => Response::read_from(&mut pipe).await,
    };

    if response.is_null() {
        tracing::warn!(origin = %addr, "Origin sent no usable response");
        metrics::record_origin_error();
        return Ok(());
    }

    let status = response.status_code();
    tracing::debug!(origin = %addr, status, "Origin responded");

    if !request.is_cache_eligible() || status != Some("200") {
        return Ok(());
    }
    match (response.header(), response.content()) {
        (Some(header), Some(content)) if !content.is_empty() => {
            match ctx.store.put_data(path, header, content) {
                Ok(()) => {
                    tracing::info!(bytes = content.len(), "Cached response");
                    metrics::record_cache_write();
                }
                Err(e) => log_store_error("put_data", &e),
            }
        }
        _ => tracing::debug!("Response has no content to cache"),
    }
    Ok(())
}
