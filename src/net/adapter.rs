//! Socket-to-pipe adapter.
//!
//! # Responsibilities
//! - Drain one readable socket half in a background task
//! - Forward every non-empty read into an in-process bounded pipe
//! - Shut the pipe down on EOF, error, or an explicit close
//!
//! # Design Decisions
//! - Reads are bounded by a short timeout; a timeout simply re-polls so the
//!   task notices a close request promptly even when the peer is silent
//! - Closing is a watch-channel flag: idempotent, non-blocking, safe while
//!   the task is mid-read or blocked on a full pipe
//! - Dropping the adapter closes it as well
//!
//! ```text
//! socket read half ──read(timeout)──▶ pump task ──write+flush──▶ duplex pipe ──▶ parser
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::AdapterConfig;

/// Consumer end of an adapter's pipe.
pub type PipeReader = BufReader<DuplexStream>;

/// Background reader feeding a socket's bytes into a pipe.
#[derive(Debug)]
pub struct StreamAdapter {
    label: String,
    close_tx: watch::Sender<bool>,
    finished: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl StreamAdapter {
    /// Start draining `source`. Returns the adapter and the pipe to parse from.
    pub fn spawn<R>(source: R, label: impl Into<String>, config: &AdapterConfig) -> (Self, PipeReader)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let label = label.into();
        let (pipe_tx, pipe_rx) = tokio::io::duplex(config.pipe_capacity);
        let (close_tx, close_rx) = watch::channel(false);
        let finished = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(pump(
            source,
            pipe_tx,
            close_rx,
            Arc::clone(&finished),
            label.clone(),
            config.clone(),
        ));

        let adapter = Self {
            label,
            close_tx,
            finished,
            task: Some(task),
        };
        (adapter, BufReader::new(pipe_rx))
    }

    /// Ask the pump to stop. Idempotent.
    pub fn close(&self) {
        if !self.close_tx.send_replace(true) {
            tracing::trace!(adapter = %self.label, "Adapter close requested");
        }
    }

    /// True once the source reached EOF or failed.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Close and wait for the pump task to exit.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(adapter = %self.label, error = %e, "Adapter task panicked");
            }
        }
    }
}

async fn pump<R>(
    mut source: R,
    mut pipe: DuplexStream,
    mut close_rx: watch::Receiver<bool>,
    finished: Arc<AtomicBool>,
    label: String,
    config: AdapterConfig,
) where
    R: AsyncRead + Unpin,
{
    let read_timeout = config.read_timeout();
    let mut buf = vec![0u8; config.chunk_size.max(1)];

    loop {
        if *close_rx.borrow() {
            break;
        }

        let read = tokio::select! {
            _ = close_rx.changed() => break,
            r = tokio::time::timeout(read_timeout, source.read(&mut buf)) => r,
        };
        let n = match read {
            Err(_elapsed) => continue,
            Ok(Ok(0)) => {
                tracing::trace!(adapter = %label, "Source reached EOF");
                finished.store(true, Ordering::Release);
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::debug!(adapter = %label, error = %e, "Source read failed");
                finished.store(true, Ordering::Release);
                break;
            }
        };

        let forwarded = tokio::select! {
            _ = close_rx.changed() => break,
            r = async {
                pipe.write_all(&buf[..n]).await?;
                pipe.flush().await
            } => r,
        };
        if let Err(e) = forwarded {
            tracing::debug!(adapter = %label, error = %e, "Pipe consumer went away");
            finished.store(true, Ordering::Release);
            break;
        }
    }

    if let Err(e) = pipe.shutdown().await {
        tracing::debug!(adapter = %label, error = %e, "Pipe shutdown failed");
    }
    drop(source);
    tracing::trace!(adapter = %label, "Adapter stopped");
}

impl Drop for StreamAdapter {
    fn drop(&mut self) {
        self.close_tx.send_replace(true);
    }
}
