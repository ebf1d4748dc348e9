//! Task supervisor — owns every task the engine knows about.

use crate::engine::controller::DownloadController;
use crate::error::VeloxError;
use crate::http;
use chrono::Utc;
use reqwest::Client;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use uuid::Uuid;
use velox_types::{EngineConfig, NewTaskRequest, Task, TaskEvent, TaskKind, TaskStatus};

struct RunningTask {
    task: Arc<RwLock<Task>>,
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    join_handle: tokio::task::JoinHandle<()>,
}

/// Owns every task added to the engine: starts, pauses, resumes, cancels,
/// removes, and ticks tasks whose start was deferred to a schedule time.
///
/// No concurrency cap across tasks (out of scope, same as the spec).
pub struct TaskSupervisor {
    tasks: Arc<RwLock<HashMap<Uuid, RunningTask>>>,
    client: Client,
    config: EngineConfig,
    temp_dir: PathBuf,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskSupervisor {
    pub fn new(config: EngineConfig, temp_dir: PathBuf) -> Result<Self, VeloxError> {
        let client = http::build_client(&config.user_agent)?;
        let (events, _) = broadcast::channel(1024);
        Ok(Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            client,
            config,
            temp_dir,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Probe a URL without creating a task, for the CLI's `probe` command.
    pub async fn probe(&self, url: &str) -> Result<velox_types::ProbeInfo, VeloxError> {
        http::probe_size(&self.client, url).await
    }

    /// Register a new task. If `request.schedule_time` is in the future,
    /// the task is created in `Scheduled` state and only starts once
    /// `tick_scheduler` observes the time has passed; otherwise it starts
    /// immediately.
    pub async fn add(&self, url: String, request: NewTaskRequest) -> Result<Uuid, VeloxError> {
        url::Url::parse(&url).map_err(|_| VeloxError::InvalidUrl(url.clone()))?;

        let destination = request
            .destination_directory
            .unwrap_or_else(|| self.config.default_download_directory.clone());
        tokio::fs::create_dir_all(&destination).await?;

        let mut task = Task::new(url, destination, TaskKind::Segmented);
        if let Some(name) = request.file_name {
            task.file_name = name;
        }
        task.schedule_time = request.schedule_time;

        let segment_count = request.segment_count.unwrap_or(self.config.default_segment_count);
        let deferred = task.schedule_time.map(|t| t > Utc::now()).unwrap_or(false);

        let id = task.id;
        if deferred {
            task.status = TaskStatus::Scheduled;
            self.tasks.write().await.insert(
                id,
                RunningTask {
                    task: Arc::new(RwLock::new(task)),
                    paused: Arc::new(AtomicBool::new(false)),
                    cancelled: Arc::new(AtomicBool::new(false)),
                    join_handle: tokio::spawn(async {}),
                },
            );
            info!("task {id} scheduled");
        } else {
            self.spawn(task, segment_count).await;
        }

        Ok(id)
    }

    async fn spawn(&self, mut task: Task, segment_count: u32) {
        let id = task.id;
        task.status = TaskStatus::Downloading;
        let dest_path = task.destination.join(&task.file_name);
        let url = task.url.clone();
        let shared_task = Arc::new(RwLock::new(task));

        let paused = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(AtomicBool::new(false));

        let client = self.client.clone();
        let config = self.config.clone();
        let temp_dir = self.temp_dir.clone();
        let events = self.events.clone();

        let paused_for_task = paused.clone();
        let cancelled_for_task = cancelled.clone();
        let shared_task_for_run = shared_task.clone();

        let join_handle = tokio::spawn(async move {
            let controller = DownloadController::new(
                id,
                url,
                dest_path,
                temp_dir,
                client,
                config,
                segment_count,
                paused_for_task,
                cancelled_for_task,
                events.clone(),
                shared_task_for_run.clone(),
            );

            let result = controller.run().await;

            let mut task = shared_task_for_run.write().await;
            match result {
                Ok(total) => {
                    task.status = TaskStatus::Completed;
                    task.downloaded = total;
                    task.total_size = Some(total);
                    task.completed_at = Some(Utc::now());
                    info!("task {id} completed ({total} bytes)");
                }
                Err(VeloxError::Cancelled) => {
                    task.status = TaskStatus::Cancelled;
                    info!("task {id} cancelled");
                }
                Err(VeloxError::Paused) => {
                    task.status = TaskStatus::Paused;
                    info!("task {id} paused");
                }
                Err(e) => {
                    task.status = TaskStatus::Error;
                    task.error = Some(e.to_string());
                    warn!("task {id} failed: {e}");
                }
            }
        });

        self.tasks.write().await.insert(
            id,
            RunningTask {
                task: shared_task,
                paused,
                cancelled,
                join_handle,
            },
        );
    }

    pub async fn list(&self) -> Vec<Task> {
        let mut out = Vec::new();
        for running in self.tasks.read().await.values() {
            out.push(running.task.read().await.clone());
        }
        out
    }

    pub async fn get(&self, id: Uuid) -> Result<Task, VeloxError> {
        let tasks = self.tasks.read().await;
        let running = tasks.get(&id).ok_or(VeloxError::NotFound(id))?;
        Ok(running.task.read().await.clone())
    }

    pub async fn pause(&self, id: Uuid) -> Result<(), VeloxError> {
        let tasks = self.tasks.read().await;
        let running = tasks.get(&id).ok_or(VeloxError::NotFound(id))?;
        running.paused.store(true, Ordering::Release);
        info!("task {id} pause requested");
        Ok(())
    }

    /// Resume a paused task. If it is still winding down (its worker
    /// hasn't observed the pause yet), this just clears the flag; if it
    /// has already exited, a fresh controller is spawned, reusing whatever
    /// bytes already sit in each segment's temp file.
    pub async fn resume(&self, id: Uuid) -> Result<(), VeloxError> {
        {
            let tasks = self.tasks.read().await;
            let running = tasks.get(&id).ok_or(VeloxError::NotFound(id))?;
            if !running.join_handle.is_finished() {
                running.paused.store(false, Ordering::Release);
                info!("task {id} resumed in place");
                return Ok(());
            }
        }

        let task = {
            let mut tasks = self.tasks.write().await;
            let running = tasks.remove(&id).ok_or(VeloxError::NotFound(id))?;
            match Arc::try_unwrap(running.task) {
                Ok(lock) => lock.into_inner(),
                Err(arc) => arc.read().await.clone(),
            }
        };

        if task.status != TaskStatus::Paused {
            return Err(VeloxError::InvalidOperation(format!(
                "task {id} is not paused (status: {:?})",
                task.status
            )));
        }

        let segment_count = task.segments.len().max(1) as u32;
        self.spawn(task, segment_count).await;
        Ok(())
    }

    pub async fn stop(&self, id: Uuid) -> Result<(), VeloxError> {
        let tasks = self.tasks.read().await;
        let running = tasks.get(&id).ok_or(VeloxError::NotFound(id))?;
        running.cancelled.store(true, Ordering::Release);
        info!("task {id} cancel requested");
        Ok(())
    }

    pub async fn stop_all(&self) {
        for (id, running) in self.tasks.read().await.iter() {
            running.cancelled.store(true, Ordering::Release);
            info!("task {id} cancelled (stop_all)");
        }
    }

    /// Remove a task's bookkeeping, optionally deleting the output file.
    /// Does not remove stray temp files from old segments — those only
    /// exist if the task never merged, and a fresh `add()` never looks for
    /// them (no cross-restart resume).
    pub async fn remove(&self, id: Uuid, delete_file: bool) -> Result<(), VeloxError> {
        self.stop(id).await.ok();

        let task_arc = {
            let mut tasks = self.tasks.write().await;
            tasks.remove(&id).map(|r| r.task)
        }
        .ok_or(VeloxError::NotFound(id))?;
        let task = match Arc::try_unwrap(task_arc) {
            Ok(lock) => lock.into_inner(),
            Err(arc) => arc.read().await.clone(),
        };

        if delete_file && task.status == TaskStatus::Completed {
            let path = task.destination.join(&task.file_name);
            if path.exists() {
                tokio::fs::remove_file(path).await?;
            }
        }

        Ok(())
    }

    /// Check every `Scheduled` task and start whichever ones have reached
    /// their `schedule_time`. Intended to be called periodically by the
    /// host process (e.g. every few seconds) — there is no background
    /// ticking thread of its own, matching the spec's "deferred-invocation
    /// check" rather than the teacher's day-of-week `QueueScheduler`.
    pub async fn tick_scheduler(&self) {
        let due: Vec<Task> = {
            let tasks = self.tasks.read().await;
            let mut due = Vec::new();
            for running in tasks.values() {
                let task = running.task.read().await;
                if task.status == TaskStatus::Scheduled {
                    if let Some(when) = task.schedule_time {
                        if when <= Utc::now() {
                            due.push(task.clone());
                        }
                    }
                }
            }
            due
        };

        for task in due {
            info!("task {} reached its scheduled time, starting", task.id);
            self.tasks.write().await.remove(&task.id);
            let segment_count = self.config.default_segment_count;
            self.spawn(task, segment_count).await;
        }
    }
}
