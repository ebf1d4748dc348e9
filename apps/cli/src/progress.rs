//! Progress bar utilities for CLI downloads

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use velox_types::{Task, TaskEvent, TaskStatus};

/// Manages progress bars for one or more tasks.
pub struct DownloadProgress {
    multi: MultiProgress,
    bars: Arc<RwLock<HashMap<Uuid, ProgressBar>>>,
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a progress bar for a task.
    pub async fn add_task(&self, task: &Task) -> ProgressBar {
        let total = task.total_size.unwrap_or(0);
        let pb = self.multi.add(ProgressBar::new(total));

        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                .unwrap()
                .progress_chars("█▓▒░  "),
        );

        pb.set_message(task.file_name.clone());
        pb.set_position(task.downloaded);

        self.bars.write().await.insert(task.id, pb.clone());
        pb
    }

    /// Update a progress bar from an event. Returns `true` if the event
    /// marked the task's bar as finished (completed, failed, or cancelled).
    pub async fn handle_event(&self, event: &TaskEvent) -> bool {
        match event {
            TaskEvent::Progress {
                id,
                downloaded,
                total,
                ..
            } => {
                let bars = self.bars.read().await;
                if let Some(pb) = bars.get(id) {
                    if let Some(total) = total {
                        pb.set_length(*total);
                    }
                    pb.set_position(*downloaded);
                }
                false
            }

            TaskEvent::StatusChanged { id, status, error } => {
                let bars = self.bars.read().await;
                let Some(pb) = bars.get(id) else {
                    return false;
                };
                match status {
                    TaskStatus::Completed => {
                        pb.finish_with_message(format!(
                            "{} Download complete",
                            style("✓").green().bold()
                        ));
                        true
                    }
                    TaskStatus::Error => {
                        pb.abandon_with_message(format!(
                            "{} Failed: {}",
                            style("✗").red().bold(),
                            error.as_deref().unwrap_or("unknown error")
                        ));
                        true
                    }
                    TaskStatus::Paused => {
                        pb.set_message(format!("{} Paused", style("⏸").yellow()));
                        true
                    }
                    TaskStatus::Cancelled => {
                        pb.abandon_with_message(format!("{} Cancelled", style("○").dim()));
                        true
                    }
                    _ => false,
                }
            }

            TaskEvent::SegmentSplit { .. } => false,
        }
    }

    pub async fn remove(&self, id: Uuid) {
        if let Some(pb) = self.bars.write().await.remove(&id) {
            pb.finish_and_clear();
        }
    }
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}
