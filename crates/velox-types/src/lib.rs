//! Shared types for velox.
//!
//! This crate holds the data-model types shared between the engine core and
//! the CLI: the public task snapshot the supervisor hands back to callers,
//! the segment record that backs a single worker's byte range, and the small
//! configuration value the settings collaborator is expected to supply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

// ============================================================================
// Task types
// ============================================================================

/// Status of a task. Closed set, per the public task handle contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Scheduled,
    Downloading,
    Paused,
    Completed,
    Error,
    Cancelled,
}

/// What kind of task this is. `Segmented` is the engine implemented here;
/// `Opaque` is the video-site hand-off boundary (yt-dlp-style extractor) —
/// its internals are out of scope, it just needs to conform to the same
/// observable contract so the supervisor can hold both kinds uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Segmented,
    Opaque,
}

/// A single download task, as observed from outside the controller — a
/// point-in-time snapshot, not the live synchronized state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub url: String,
    pub final_url: Option<String>,
    pub file_name: String,
    pub destination: PathBuf,
    /// `None` when the server did not disclose a size.
    pub total_size: Option<u64>,
    pub downloaded: u64,
    pub status: TaskStatus,
    pub kind: TaskKind,
    pub segments: Vec<Segment>,
    pub error: Option<String>,
    /// Recorded only; the core never consults this to throttle a worker.
    pub speed_limit_kbps: Option<u64>,
    /// Windowed average, updated once per monitor tick (~1 Hz). `0.0` before
    /// the first tick or once the task reaches a terminal state.
    #[serde(default)]
    pub speed_kbps: f64,
    /// Seconds remaining at the current speed, or `None` when size is
    /// unknown or speed is zero — the public handle renders this as "N/A".
    #[serde(default)]
    pub eta_secs: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub schedule_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
}

impl Task {
    pub fn new(url: String, destination: PathBuf, kind: TaskKind) -> Self {
        let file_name = file_name_from_url(&url);
        Self {
            id: Uuid::new_v4(),
            url,
            final_url: None,
            file_name,
            destination,
            total_size: None,
            downloaded: 0,
            status: TaskStatus::Queued,
            kind,
            segments: Vec::new(),
            error: None,
            speed_limit_kbps: None,
            speed_kbps: 0.0,
            eta_secs: None,
            created_at: Utc::now(),
            completed_at: None,
            schedule_time: None,
            retry_count: 0,
        }
    }

    pub fn progress_percent(&self) -> f64 {
        match self.total_size {
            Some(size) if size > 0 => (self.downloaded as f64 / size as f64) * 100.0,
            _ => 0.0,
        }
    }

    /// `HH:MM:SS`, or `"N/A"` when size is unknown or speed is zero.
    pub fn eta(&self) -> String {
        format_eta(self.eta_secs)
    }
}

/// Renders an optional ETA in seconds as `HH:MM:SS`, or `"N/A"` when absent.
pub fn format_eta(eta_secs: Option<u64>) -> String {
    match eta_secs {
        Some(secs) => {
            let hours = secs / 3600;
            let minutes = (secs % 3600) / 60;
            let seconds = secs % 60;
            format!("{hours:02}:{minutes:02}:{seconds:02}")
        }
        None => "N/A".to_string(),
    }
}

/// Derive a default file name from a URL's last path segment.
pub fn file_name_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.path_segments().and_then(|mut s| s.next_back().map(str::to_string)))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "download".to_string())
}

// ============================================================================
// Segment type
// ============================================================================

/// A contiguous byte range assigned to one worker.
///
/// `end: None` means open-ended — the server did not disclose a length when
/// the segment was planned, so the worker streams until the connection
/// closes. This is the idiomatic-Rust encoding of "unknown upper bound";
/// the `u64::MAX` sentinel some download managers use internally is not
/// exposed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub index: u32,
    pub start: u64,
    pub end: Option<u64>,
    pub downloaded: u64,
    pub is_finished: bool,
    pub is_stopped: bool,
    pub temp_path: PathBuf,
}

impl Segment {
    pub fn new(index: u32, start: u64, end: Option<u64>, temp_path: PathBuf) -> Self {
        Self {
            index,
            start,
            end,
            downloaded: 0,
            is_finished: false,
            is_stopped: false,
            temp_path,
        }
    }

    /// Total size of this segment in bytes, or `None` if open-ended.
    pub fn size(&self) -> Option<u64> {
        self.end.map(|end| end + 1 - self.start)
    }

    /// Bytes remaining in this segment, or `None` if open-ended.
    pub fn remaining(&self) -> Option<u64> {
        self.size().map(|size| size.saturating_sub(self.downloaded))
    }

    pub fn progress_percent(&self) -> f64 {
        match self.size() {
            Some(size) if size > 0 => (self.downloaded as f64 / size as f64) * 100.0,
            _ => 0.0,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration the settings collaborator supplies to the engine.
/// Persisting these values across restarts is out of scope; the engine only
/// consumes them for the lifetime of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub default_download_directory: PathBuf,
    /// Injected into HEAD/GET requests when non-empty.
    pub user_agent: String,
    /// Default number of segments for a new task when the caller doesn't
    /// specify one.
    pub default_segment_count: u32,
    /// Recorded only; never consulted by a worker (no enforced throttling).
    pub global_speed_limit_kbps: Option<u64>,
    /// Bounded per-segment retry count. `0` disables retrying — a stopped
    /// segment fails the task, matching the original's behavior.
    pub max_segment_retries: u32,
    pub segment_retry_delay_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_download_directory: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            user_agent: String::new(),
            default_segment_count: 4,
            global_speed_limit_kbps: None,
            max_segment_retries: 0,
            segment_retry_delay_secs: 5,
        }
    }
}

// ============================================================================
// API types
// ============================================================================

/// Result of probing a URL (HEAD, with partial-GET fallback).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeInfo {
    pub url: String,
    pub final_url: Option<String>,
    pub file_name: String,
    pub total_size: Option<u64>,
    pub supports_range: bool,
    pub content_type: Option<String>,
}

/// Parameters accepted by `TaskSupervisor::add`.
#[derive(Debug, Clone, Default)]
pub struct NewTaskRequest {
    pub destination_directory: Option<PathBuf>,
    pub file_name: Option<String>,
    pub segment_count: Option<u32>,
    pub schedule_time: Option<DateTime<Utc>>,
}

/// Events emitted by the engine for a listening UI/CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TaskEvent {
    Progress {
        id: Uuid,
        downloaded: u64,
        total: Option<u64>,
        speed_kbps: f64,
        eta_secs: Option<u64>,
    },
    SegmentSplit {
        id: Uuid,
        from_index: u32,
        new_index: u32,
        split_at: u64,
    },
    StatusChanged {
        id: Uuid,
        status: TaskStatus,
        error: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_defaults_to_download_when_path_empty() {
        assert_eq!(file_name_from_url("https://example.com/"), "download");
    }

    #[test]
    fn file_name_from_url_basename() {
        assert_eq!(
            file_name_from_url("https://example.com/files/archive.tar.gz"),
            "archive.tar.gz"
        );
    }

    #[test]
    fn segment_size_and_remaining_known_length() {
        let seg = Segment::new(0, 0, Some(99), PathBuf::from("x"));
        assert_eq!(seg.size(), Some(100));
        assert_eq!(seg.remaining(), Some(100));
    }

    #[test]
    fn segment_size_and_remaining_open_ended() {
        let seg = Segment::new(0, 0, None, PathBuf::from("x"));
        assert_eq!(seg.size(), None);
        assert_eq!(seg.remaining(), None);
    }

    #[test]
    fn segment_remaining_accounts_for_downloaded() {
        let mut seg = Segment::new(0, 0, Some(99), PathBuf::from("x"));
        seg.downloaded = 40;
        assert_eq!(seg.remaining(), Some(60));
    }

    #[test]
    fn eta_formats_as_hh_mm_ss() {
        assert_eq!(format_eta(Some(3661)), "01:01:01");
        assert_eq!(format_eta(Some(5)), "00:00:05");
    }

    #[test]
    fn eta_is_na_when_unknown() {
        assert_eq!(format_eta(None), "N/A");
    }
}
