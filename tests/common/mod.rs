//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use web_cache::http::handler::HandlerContext;
use web_cache::http::target::Reference;
use web_cache::net::connection::ConnectionTracker;
use web_cache::net::listener::Listener;
use web_cache::{CacheStore, MemoryStore, ProxyConfig, Server, Shutdown, StoreError};

/// A fake origin that records every request head it receives.
pub struct MockOrigin {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockOrigin {
    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start an origin that answers each request with `respond(request_head, hit_index)`
/// and then closes the connection.
pub async fn start_origin<F>(respond: F) -> MockOrigin
where
    F: Fn(&str, usize) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let seen = Arc::clone(&requests);
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let respond = Arc::clone(&respond);
                    let seen = Arc::clone(&seen);
                    tokio::spawn(async move {
                        let head = read_head(&mut socket).await;
                        let index = {
                            let mut seen = seen.lock().unwrap();
                            seen.push(head.clone());
                            seen.len() - 1
                        };
                        let response = respond(&head, index);
                        let _ = socket.write_all(&response).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockOrigin { addr, requests }
}

async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match socket.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => break,
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// `200 OK` with a Content-Length body and a Last-Modified date.
pub fn ok_response(body: &str, last_modified: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nLast-Modified: {}\r\n\r\n{}",
        body.len(),
        last_modified,
        body
    )
    .into_bytes()
}

/// A running cache bound to an ephemeral port.
pub struct TestCache {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub shutdown: Shutdown,
    pub task: JoinHandle<Result<(), web_cache::lifecycle::StartupError>>,
}

pub async fn start_cache(configure: impl FnOnce(&mut ProxyConfig)) -> TestCache {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.adapter.read_timeout_ms = 20;
    config.timeouts.connect_secs = 2;
    config.timeouts.shutdown_grace_secs = 2;
    configure(&mut config);

    let server = Server::build(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let store = server.store();
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(server.run());

    TestCache {
        addr,
        store,
        shutdown,
        task,
    }
}

/// Send raw request bytes and read everything the cache writes back.
pub async fn send(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("cache did not close the connection")
        .unwrap();
    out
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

pub fn get(origin: SocketAddr, path: &str, extra_headers: &str) -> Vec<u8> {
    format!(
        "GET http://127.0.0.1:{port}{path} HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\n{extra}\r\n",
        port = origin.port(),
        path = path,
        extra = extra_headers
    )
    .into_bytes()
}

/// A store whose every operation fails, counting the calls it refused.
#[derive(Default)]
pub struct BrokenStore {
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl CacheStore for BrokenStore {
    fn get_header(&self, _path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Closed)
    }

    fn get_data(
        &self,
        _path: &str,
        _start: f64,
        _duration: f64,
        _reference: Reference,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Closed)
    }

    fn put_data(&self, _path: &str, _header: &[u8], _content: &[u8]) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Closed)
    }
}

/// A bare listener serving handlers backed by `store`.
pub async fn start_listener(store: Arc<dyn CacheStore>) -> (SocketAddr, Shutdown, JoinHandle<()>) {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.adapter.read_timeout_ms = 20;
    config.timeouts.connect_secs = 2;

    let ctx = Arc::new(HandlerContext::new(&config, store, ConnectionTracker::new()));
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let task = tokio::spawn(listener.run(ctx, shutdown.subscribe()));
    (addr, shutdown, task)
}
