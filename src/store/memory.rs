//! In-memory time-series store with an optional JSON archive.
//!
//! Each resource path maps to a channel: the latest response header plus a
//! bounded ring of `(timestamp, content)` frames, oldest first. Timestamps
//! are wall-clock seconds and never decrease within a channel.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{normalize_key, CacheStore, StoreError};
use crate::config::schema::StoreConfig;
use crate::http::target::Reference;
use crate::observability::metrics;

/// Smallest step between two frames of one channel.
const FRAME_EPSILON: f64 = 1e-6;

const ARCHIVE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Frame {
    time: f64,
    data: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Channel {
    header: Vec<u8>,
    frames: VecDeque<Frame>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Archive {
    version: u32,
    channels: HashMap<String, Channel>,
}

/// Concurrent in-memory [`CacheStore`].
#[derive(Debug)]
pub struct MemoryStore {
    channels: DashMap<String, Channel>,
    cache_frames: usize,
    archive_frames: usize,
    archive_path: Option<PathBuf>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Empty store without an archive.
    pub fn new(cache_frames: usize, archive_frames: usize) -> Self {
        Self {
            channels: DashMap::new(),
            cache_frames,
            archive_frames,
            archive_path: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Build a store from configuration, loading the archive unless a new one was asked for.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let mut store = Self::new(config.cache_frames, config.archive_frames());
        if let Some(path) = &config.archive_path {
            let path = PathBuf::from(path);
            if config.new_archive {
                tracing::info!(archive = %path.display(), "Starting a new archive");
            } else if path.exists() {
                store.load_archive(&path)?;
            }
            store.archive_path = Some(path);
        }
        tracing::info!(
            cache_frames = store.cache_frames,
            archive_frames = store.archive_frames,
            resources = store.channels.len(),
            "Cache store ready"
        );
        Ok(store)
    }

    fn capacity(&self) -> usize {
        self.cache_frames.max(self.archive_frames).max(1)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn load_archive(&self, path: &Path) -> Result<(), StoreError> {
        let file = File::open(path)?;
        let archive: Archive = serde_json::from_reader(BufReader::new(file))?;
        if archive.version != ARCHIVE_VERSION {
            tracing::warn!(version = archive.version, "Unknown archive version, loading anyway");
        }
        for (key, mut channel) in archive.channels {
            while channel.frames.len() > self.capacity() {
                channel.frames.pop_front();
            }
            self.channels.insert(key, channel);
        }
        metrics::record_cache_size(self.channels.len());
        tracing::info!(
            archive = %path.display(),
            resources = self.channels.len(),
            "Loaded archive"
        );
        Ok(())
    }

    /// Write the newest `archive_frames` frames of every resource to the archive file.
    pub fn save_archive(&self) -> Result<(), StoreError> {
        let Some(path) = &self.archive_path else {
            return Ok(());
        };

        let channels: HashMap<String, Channel> = self
            .channels
            .iter()
            .map(|entry| {
                let channel = entry.value();
                let skip = channel.frames.len().saturating_sub(self.archive_frames);
                let kept = Channel {
                    header: channel.header.clone(),
                    frames: channel.frames.iter().skip(skip).cloned().collect(),
                };
                (entry.key().clone(), kept)
            })
            .collect();
        let resources = channels.len();

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(
            &mut writer,
            &Archive {
                version: ARCHIVE_VERSION,
                channels,
            },
        )?;
        writer.flush()?;

        tracing::info!(archive = %path.display(), resources, "Saved archive");
        Ok(())
    }

    /// Refuse all further operations.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Number of distinct resources stored.
    pub fn resource_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames held for `path`.
    pub fn frame_count(&self, path: &str) -> usize {
        self.channels
            .get(normalize_key(path))
            .map(|c| c.frames.len())
            .unwrap_or(0)
    }

    /// Append a frame stamped with `time` (seconds since the epoch).
    ///
    /// A time earlier than the channel's newest frame is moved just past it.
    pub fn put_data_at(
        &self,
        path: &str,
        header: &[u8],
        content: &[u8],
        time: f64,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        if header.is_empty() || content.is_empty() {
            tracing::debug!(path, "Ignoring empty put");
            return Ok(());
        }

        let capacity = self.capacity();
        {
            let mut channel = self.channels.entry(normalize_key(path).to_string()).or_default();
            let time = match channel.frames.back() {
                Some(last) if last.time >= time => last.time + FRAME_EPSILON,
                _ => time,
            };
            channel.header = header.to_vec();
            channel.frames.push_back(Frame {
                time,
                data: content.to_vec(),
            });
            while channel.frames.len() > capacity {
                channel.frames.pop_front();
            }
        }

        metrics::record_cache_size(self.channels.len());
        Ok(())
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Frames of a channel that fall into the requested range.
///
/// - newest:   `(newest - start - duration, newest - start]`
/// - oldest:   `[oldest + start, oldest + start + duration)`
/// - absolute: `[start, start + duration)`
///
/// A zero duration picks the latest frame at or before the anchor.
fn select(frames: &VecDeque<Frame>, start: f64, duration: f64, reference: Reference) -> Vec<&Frame> {
    let (Some(oldest), Some(newest)) = (frames.front(), frames.back()) else {
        return Vec::new();
    };

    let (lo, hi) = match reference {
        Reference::Newest => {
            let end = newest.time - start;
            (end - duration, end)
        }
        Reference::Oldest => {
            let begin = oldest.time + start;
            (begin, begin + duration)
        }
        Reference::Absolute => (start, start + duration),
    };

    if duration <= 0.0 {
        let anchor = if reference == Reference::Newest { hi } else { lo };
        return frames.iter().rev().find(|f| f.time <= anchor).into_iter().collect();
    }

    frames
        .iter()
        .filter(|f| match reference {
            Reference::Newest => f.time > lo && f.time <= hi,
            _ => f.time >= lo && f.time < hi,
        })
        .collect()
}

impl CacheStore for MemoryStore {
    fn get_header(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .channels
            .get(normalize_key(path))
            .map(|c| c.header.clone()))
    }

    fn get_data(
        &self,
        path: &str,
        start: f64,
        duration: f64,
        reference: Reference,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_open()?;
        let Some(channel) = self.channels.get(normalize_key(path)) else {
            return Ok(None);
        };

        let frames = select(&channel.frames, start, duration, reference);
        if frames.is_empty() {
            return Ok(None);
        }
        Ok(Some(frames.iter().flat_map(|f| f.data.iter().copied()).collect()))
    }

    fn put_data(&self, path: &str, header: &[u8], content: &[u8]) -> Result<(), StoreError> {
        self.put_data_at(path, header, content, now_secs())
    }
}
