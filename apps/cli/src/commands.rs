//! CLI command implementations

use crate::output::{format_bytes, format_speed};
use crate::progress::DownloadProgress;
use crate::OutputFormat;
use anyhow::{anyhow, Result};
use console::style;
use std::path::PathBuf;
use uuid::Uuid;
use velox_core::TaskSupervisor;
use velox_types::{NewTaskRequest, Task, TaskEvent, TaskStatus};

/// Splits a user-supplied `-o/--output` path into a destination directory
/// and, if the path doesn't already name an existing directory, a file name
/// override.
fn split_output(output: Option<PathBuf>) -> (Option<PathBuf>, Option<String>) {
    match output {
        None => (None, None),
        Some(path) => {
            if path.is_dir() {
                (Some(path), None)
            } else {
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(PathBuf::from);
                let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
                (dir, name)
            }
        }
    }
}

// ============================================================================
// Download Commands
// ============================================================================

pub async fn add_download(
    supervisor: &TaskSupervisor,
    url: &str,
    output: Option<PathBuf>,
    segments: Option<u32>,
    at: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let (destination_directory, file_name) = split_output(output);

    let schedule_time = at
        .map(|s| {
            chrono::DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|e| anyhow!("invalid --at timestamp {s:?}: {e}"))
        })
        .transpose()?;

    let request = NewTaskRequest {
        destination_directory,
        file_name,
        segment_count: segments,
        schedule_time,
    };

    let mut events = supervisor.subscribe();
    let id = supervisor.add(url.to_string(), request).await?;
    let task = supervisor.get(id).await?;

    if task.status == TaskStatus::Scheduled {
        println!(
            "{} Task scheduled: {} (starts {})",
            style("✓").green().bold(),
            style(&task.file_name).cyan(),
            task.schedule_time.map(|t| t.to_rfc3339()).unwrap_or_default()
        );
        return Ok(());
    }

    if !matches!(format, OutputFormat::Json) {
        println!(
            "{} Downloading {} -> {}",
            style("↓").cyan(),
            style(&task.file_name).bold(),
            task.destination.join(&task.file_name).display()
        );
    }

    let progress = DownloadProgress::new();
    if !matches!(format, OutputFormat::Json) {
        progress.add_task(&task).await;
    }

    loop {
        match events.recv().await {
            Ok(event) => {
                if event_task_id(&event) != Some(id) {
                    continue;
                }
                if !matches!(format, OutputFormat::Json) {
                    let finished = progress.handle_event(&event).await;
                    if finished {
                        break;
                    }
                } else if let TaskEvent::StatusChanged { status, .. } = &event {
                    if matches!(
                        status,
                        TaskStatus::Completed | TaskStatus::Error | TaskStatus::Cancelled
                    ) {
                        break;
                    }
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    let task = supervisor.get(id).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&task)?),
        _ => print_task_summary(&task, true),
    }

    Ok(())
}

fn event_task_id(event: &TaskEvent) -> Option<Uuid> {
    match event {
        TaskEvent::Progress { id, .. } => Some(*id),
        TaskEvent::SegmentSplit { id, .. } => Some(*id),
        TaskEvent::StatusChanged { id, .. } => Some(*id),
    }
}

pub async fn list_tasks(supervisor: &TaskSupervisor, show_all: bool, format: OutputFormat) -> Result<()> {
    let tasks = supervisor.list().await;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct TaskRow {
                id: String,
                file: String,
                size: String,
                progress: String,
                status: String,
            }

            let rows: Vec<TaskRow> = tasks
                .iter()
                .map(|t| TaskRow {
                    id: t.id.to_string()[..8].to_string(),
                    file: if t.file_name.len() > 30 {
                        format!("{}...", &t.file_name[..27])
                    } else {
                        t.file_name.clone()
                    },
                    size: t
                        .total_size
                        .map(format_bytes)
                        .unwrap_or_else(|| "?".to_string()),
                    progress: format!("{:.1}%", t.progress_percent()),
                    status: format!("{:?}", t.status),
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            if tasks.is_empty() {
                println!("{}", style("No tasks").dim());
                return Ok(());
            }

            for task in &tasks {
                print_task_summary(task, show_all);
            }
            println!();
            println!("{} task(s) total", style(tasks.len()).bold());
        }
    }

    Ok(())
}

fn print_task_summary(task: &Task, detailed: bool) {
    let status_icon = match task.status {
        TaskStatus::Completed => style("✓").green(),
        TaskStatus::Downloading => style("↓").cyan(),
        TaskStatus::Paused => style("⏸").yellow(),
        TaskStatus::Error => style("✗").red(),
        TaskStatus::Cancelled => style("○").dim(),
        _ => style("·").dim(),
    };

    let progress = format!("{:.1}%", task.progress_percent());

    println!(
        "{} {} {} [{}]",
        status_icon,
        style(&task.file_name).bold(),
        style(&progress).dim(),
        style(format!("{:?}", task.status)).dim()
    );

    if detailed {
        println!("    ID: {}", task.id);
        println!("    URL: {}", task.url);
        if let Some(size) = task.total_size {
            println!(
                "    Size: {} / {}",
                format_bytes(task.downloaded),
                format_bytes(size)
            );
        }
        if task.status == TaskStatus::Downloading {
            println!(
                "    Speed: {}    ETA: {}",
                format_speed(task.speed_kbps as u64),
                task.eta()
            );
        }
        if let Some(ref error) = task.error {
            println!("    Error: {}", style(error).red());
        }
        println!();
    }
}

pub async fn show_info(supervisor: &TaskSupervisor, id: &str, format: OutputFormat) -> Result<()> {
    let uuid = Uuid::parse_str(id)?;
    let task = supervisor.get(uuid).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&task)?),
        _ => print_task_summary(&task, true),
    }

    Ok(())
}

pub async fn pause_task(supervisor: &TaskSupervisor, id: &str) -> Result<()> {
    let uuid = Uuid::parse_str(id)?;
    supervisor.pause(uuid).await?;
    println!("{} Task pause requested", style("✓").green().bold());
    Ok(())
}

pub async fn resume_task(supervisor: &TaskSupervisor, id: &str) -> Result<()> {
    let uuid = Uuid::parse_str(id)?;
    supervisor.resume(uuid).await?;
    println!("{} Task resumed", style("✓").green().bold());
    Ok(())
}

pub async fn cancel_task(supervisor: &TaskSupervisor, id: &str) -> Result<()> {
    let uuid = Uuid::parse_str(id)?;
    supervisor.stop(uuid).await?;
    println!("{} Task cancel requested", style("✓").green().bold());
    Ok(())
}

pub async fn remove_task(supervisor: &TaskSupervisor, id: &str, with_file: bool) -> Result<()> {
    let uuid = Uuid::parse_str(id)?;
    supervisor.remove(uuid, with_file).await?;
    println!("{} Task removed", style("✓").green().bold());
    Ok(())
}

// ============================================================================
// Probe Command
// ============================================================================

pub async fn probe_urls(supervisor: &TaskSupervisor, urls: Vec<String>, format: OutputFormat) -> Result<()> {
    let mut results = Vec::new();
    for url in &urls {
        match supervisor.probe(url).await {
            Ok(info) => results.push(info),
            Err(e) => {
                if !matches!(format, OutputFormat::Json) {
                    println!("{} {}: {}", style("✗").red(), url, style(e.to_string()).red());
                }
            }
        }
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct LinkRow {
                file: String,
                size: String,
                resumable: String,
            }

            let rows: Vec<LinkRow> = results
                .iter()
                .map(|info| LinkRow {
                    file: if info.file_name.len() > 40 {
                        format!("{}...", &info.file_name[..37])
                    } else {
                        info.file_name.clone()
                    },
                    size: info
                        .total_size
                        .map(format_bytes)
                        .unwrap_or_else(|| "?".to_string()),
                    resumable: if info.supports_range { "Yes" } else { "No" }.to_string(),
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            for info in &results {
                println!("{} {}", style("✓").green(), info.file_name);
                if let Some(size) = info.total_size {
                    println!("    Size: {}", format_bytes(size));
                }
                if let Some(ref ct) = info.content_type {
                    println!("    Type: {}", ct);
                }
                println!(
                    "    Resumable: {}",
                    if info.supports_range {
                        style("Yes").green()
                    } else {
                        style("No").yellow()
                    }
                );
            }
        }
    }

    Ok(())
}
