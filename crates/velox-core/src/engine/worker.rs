//! Segment worker — downloads one byte range to its own temp file.
//!
//! Each worker is independent and only ever appends to its own temp file.
//! Progress and the segment's upper bound live behind atomics so the
//! controller's monitor loop can read them, and — the one piece of shared
//! mutable state outside the atomics — shrink the upper bound out from
//! under a running worker when splitting it for dynamic re-segmentation.

use crate::error::VeloxError;
use crate::http;
use futures::StreamExt;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Sentinel stored in the atomic `end` field meaning "open-ended" — not
/// exposed outside this module. `velox_types::Segment::end` stays an
/// `Option<u64>` at every public boundary.
const OPEN_ENDED: u64 = u64::MAX;

/// Shared, concurrently-readable/writable state for one segment.
///
/// `end` is the one field both the owning worker and the controller's
/// split logic touch: the controller shrinks it to carve off a new segment
/// while the worker is mid-stream, and the worker must re-read it on every
/// chunk rather than trust the value it started with.
pub struct SegmentHandle {
    pub index: u32,
    pub start: u64,
    end: AtomicU64,
    downloaded: AtomicU64,
    is_finished: AtomicBool,
    is_stopped: AtomicBool,
    pub temp_path: PathBuf,
}

impl SegmentHandle {
    pub fn new(index: u32, start: u64, end: Option<u64>, downloaded: u64, temp_path: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            index,
            start,
            end: AtomicU64::new(end.unwrap_or(OPEN_ENDED)),
            downloaded: AtomicU64::new(downloaded),
            is_finished: AtomicBool::new(false),
            is_stopped: AtomicBool::new(false),
            temp_path,
        })
    }

    pub fn end(&self) -> Option<u64> {
        match self.end.load(Ordering::Acquire) {
            OPEN_ENDED => None,
            e => Some(e),
        }
    }

    pub fn set_end(&self, end: Option<u64>) {
        self.end.store(end.unwrap_or(OPEN_ENDED), Ordering::Release);
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    fn add_downloaded(&self, n: u64) -> u64 {
        self.downloaded.fetch_add(n, Ordering::AcqRel) + n
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished.load(Ordering::Acquire)
    }

    pub fn set_finished(&self, value: bool) {
        self.is_finished.store(value, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.is_stopped.load(Ordering::Acquire)
    }

    pub fn set_stopped(&self, value: bool) {
        self.is_stopped.store(value, Ordering::Release);
    }

    /// Bytes left to fetch, or `None` if still open-ended.
    pub fn remaining(&self) -> Option<u64> {
        self.end()
            .map(|end| (end + 1).saturating_sub(self.start).saturating_sub(self.downloaded()))
    }

    pub fn snapshot(&self) -> velox_types::Segment {
        velox_types::Segment {
            index: self.index,
            start: self.start,
            end: self.end(),
            downloaded: self.downloaded(),
            is_finished: self.is_finished(),
            is_stopped: self.is_stopped(),
            temp_path: self.temp_path.clone(),
        }
    }
}

/// Downloads one segment's byte range into its temp file, honoring
/// pause/cancel signals and a shrinking `end` from dynamic re-segmentation.
pub struct SegmentWorker {
    handle: Arc<SegmentHandle>,
    url: String,
    client: Client,
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

/// Outcome of running a worker to completion.
pub struct SegmentOutcome {
    /// Total size discovered during this run, if the segment was
    /// open-ended and the server disclosed a length.
    pub discovered_size: Option<u64>,
}

impl SegmentWorker {
    pub fn new(
        handle: Arc<SegmentHandle>,
        url: String,
        client: Client,
        paused: Arc<AtomicBool>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            handle,
            url,
            client,
            paused,
            cancelled,
        }
    }

    pub async fn run(self) -> Result<SegmentOutcome, VeloxError> {
        let index = self.handle.index;
        info!(
            "segment {index} starting at byte {} (end {:?})",
            self.handle.start + self.handle.downloaded(),
            self.handle.end()
        );

        if self.handle.is_finished() {
            return Ok(SegmentOutcome { discovered_size: None });
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(&self.handle.temp_path)
            .await?;

        let existing = file.metadata().await?.len();
        if existing > 0 && existing > self.handle.downloaded() {
            debug!("segment {index} resuming from existing temp file of {existing} bytes");
            self.handle.downloaded.store(existing, Ordering::Release);
            file.seek(std::io::SeekFrom::Start(existing)).await?;
        }

        let start_byte = self.handle.start + self.handle.downloaded();

        if let Some(end) = self.handle.end() {
            if start_byte > end {
                self.handle.set_finished(true);
                return Ok(SegmentOutcome { discovered_size: None });
            }
        }

        let response = http::open_ranged_stream(&self.client, &self.url, start_byte, self.handle.end()).await?;

        let mut discovered_size = None;
        if self.handle.end().is_none() {
            if let Some(total) = discover_total_size(&response, start_byte) {
                self.handle.set_end(Some(total.saturating_sub(1)));
                discovered_size = Some(total);
                info!("segment {index} discovered total size: {total} bytes");
            }
        }

        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            if self.cancelled.load(Ordering::Acquire) {
                file.flush().await?;
                return Err(VeloxError::Cancelled);
            }
            if self.paused.load(Ordering::Acquire) {
                file.flush().await?;
                return Err(VeloxError::Paused);
            }

            let mut chunk = chunk_result?;

            // Re-check the boundary every chunk: a concurrent dynamic split
            // may have shrunk `end` since we opened the stream, and the
            // in-flight response can still deliver bytes past the new
            // boundary because its Range header was fixed at request time.
            if let Some(remaining) = self.handle.remaining() {
                if remaining == 0 {
                    break;
                }
                if (chunk.len() as u64) > remaining {
                    chunk = chunk.slice(0..remaining as usize);
                }
            }

            let n = chunk.len() as u64;
            file.write_all(&chunk).await?;
            self.handle.add_downloaded(n);

            if let Some(remaining) = self.handle.remaining() {
                if remaining == 0 {
                    break;
                }
            }
        }

        file.flush().await?;
        file.sync_all().await?;

        // Only a known-end segment that actually received every byte up to
        // `end` counts as finished; open-ended segments have no other
        // completion signal than the body closing cleanly. A known-end
        // segment whose body closed short (server cut the 206 response off
        // early) is not finished — it gave up, same as any other worker
        // error, so the controller doesn't merge a truncated part.
        let finished = match self.handle.end() {
            Some(end) => self.handle.downloaded() >= end + 1 - self.handle.start,
            None => true,
        };

        if finished {
            self.handle.set_finished(true);
            info!("segment {index} finished ({} bytes)", self.handle.downloaded());
        } else {
            self.handle.set_stopped(true);
            warn!(
                "segment {index} body ended early at {} bytes (end {:?})",
                self.handle.downloaded(),
                self.handle.end()
            );
        }

        Ok(SegmentOutcome { discovered_size })
    }
}

fn discover_total_size(response: &reqwest::Response, start_byte: u64) -> Option<u64> {
    if let Some(content_range) = response.headers().get(reqwest::header::CONTENT_RANGE) {
        if let Ok(s) = content_range.to_str() {
            if let Some(total) = s.rsplit('/').next() {
                if total != "*" {
                    if let Ok(total) = total.parse::<u64>() {
                        return Some(total);
                    }
                }
            }
        }
    }
    let content_length = response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())?;
    Some(start_byte + content_length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_round_trips_open_ended_sentinel() {
        let handle = SegmentHandle::new(0, 0, None, 0, PathBuf::from("x"));
        assert_eq!(handle.end(), None);
        handle.set_end(Some(99));
        assert_eq!(handle.end(), Some(99));
        assert_eq!(handle.remaining(), Some(100));
    }

    #[test]
    fn handle_remaining_shrinks_after_split() {
        let handle = SegmentHandle::new(0, 100, Some(199), 20, PathBuf::from("x"));
        assert_eq!(handle.remaining(), Some(80));
        handle.set_end(Some(149));
        assert_eq!(handle.remaining(), Some(30));
    }
}
