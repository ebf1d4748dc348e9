//! Integration tests: a local HTTP server with Range support, driven end to
//! end through `TaskSupervisor`. Covers the S1-style "multi-segment
//! completes and matches" scenario plus the HEAD-blocked and
//! no-range-support fallback paths.

mod common;

use std::time::Duration;
use tempfile::tempdir;
use velox_core::{EngineConfig, NewTaskRequest, TaskStatus, TaskSupervisor};

async fn wait_for_terminal(supervisor: &TaskSupervisor, id: uuid::Uuid) -> velox_types::Task {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let task = supervisor.get(id).await.expect("task exists");
            if matches!(
                task.status,
                TaskStatus::Completed | TaskStatus::Error | TaskStatus::Cancelled | TaskStatus::Paused
            ) {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("task reached a terminal state before timeout")
}

#[tokio::test]
async fn multi_segment_download_completes_and_file_matches() {
    let body: Vec<u8> = (0u8..100).cycle().take(2 * 1024 * 1024).collect();
    let url = common::range_server::start(body.clone());

    let download_dir = tempdir().unwrap();
    let temp_dir = tempdir().unwrap();
    let supervisor = TaskSupervisor::new(EngineConfig::default(), temp_dir.path().to_path_buf()).unwrap();

    let request = NewTaskRequest {
        destination_directory: Some(download_dir.path().to_path_buf()),
        segment_count: Some(4),
        ..Default::default()
    };
    let id = supervisor.add(url, request).await.unwrap();

    let task = wait_for_terminal(&supervisor, id).await;
    assert_eq!(task.status, TaskStatus::Completed, "error: {:?}", task.error);
    assert_eq!(task.segments.len(), 4);

    let final_path = task.destination.join(&task.file_name);
    let content = std::fs::read(&final_path).unwrap();
    assert_eq!(content.len(), body.len());
    assert_eq!(content, body);
}

#[tokio::test]
async fn head_blocked_falls_back_to_range_probe_and_completes() {
    let body: Vec<u8> = (0u8..100).cycle().take(64 * 1024).collect();
    let url = common::range_server::start_with_options(
        body.clone(),
        common::range_server::RangeServerOptions {
            head_allowed: false,
            support_ranges: true,
            advertise_ranges: true,
            ..Default::default()
        },
    );

    let download_dir = tempdir().unwrap();
    let temp_dir = tempdir().unwrap();
    let supervisor = TaskSupervisor::new(EngineConfig::default(), temp_dir.path().to_path_buf()).unwrap();

    let request = NewTaskRequest {
        destination_directory: Some(download_dir.path().to_path_buf()),
        segment_count: Some(3),
        ..Default::default()
    };
    let id = supervisor.add(url, request).await.unwrap();

    let task = wait_for_terminal(&supervisor, id).await;
    assert_eq!(task.status, TaskStatus::Completed, "error: {:?}", task.error);

    let content = std::fs::read(task.destination.join(&task.file_name)).unwrap();
    assert_eq!(content, body);
}

#[tokio::test]
async fn no_range_server_falls_back_to_single_stream_get() {
    let body: Vec<u8> = (0u8..100).cycle().take(64 * 1024).collect();
    let url = common::range_server::start_with_options(
        body.clone(),
        common::range_server::RangeServerOptions {
            head_allowed: true,
            support_ranges: false,
            advertise_ranges: false,
            ..Default::default()
        },
    );

    let download_dir = tempdir().unwrap();
    let temp_dir = tempdir().unwrap();
    let supervisor = TaskSupervisor::new(EngineConfig::default(), temp_dir.path().to_path_buf()).unwrap();

    let request = NewTaskRequest {
        destination_directory: Some(download_dir.path().to_path_buf()),
        segment_count: Some(4),
        ..Default::default()
    };
    let id = supervisor.add(url, request).await.unwrap();

    let task = wait_for_terminal(&supervisor, id).await;
    assert_eq!(task.status, TaskStatus::Completed, "error: {:?}", task.error);
    assert_eq!(task.segments.len(), 1, "no-range servers must fall back to a single segment");

    let content = std::fs::read(task.destination.join(&task.file_name)).unwrap();
    assert_eq!(content, body);
}

#[tokio::test]
async fn pause_then_resume_completes() {
    let body: Vec<u8> = (0u8..100).cycle().take(512 * 1024).collect();
    let url = common::range_server::start_with_options(
        body.clone(),
        common::range_server::RangeServerOptions {
            chunk_delay: Duration::from_millis(2),
            ..Default::default()
        },
    );

    let download_dir = tempdir().unwrap();
    let temp_dir = tempdir().unwrap();
    let supervisor = TaskSupervisor::new(EngineConfig::default(), temp_dir.path().to_path_buf()).unwrap();

    let request = NewTaskRequest {
        destination_directory: Some(download_dir.path().to_path_buf()),
        segment_count: Some(4),
        ..Default::default()
    };
    let id = supervisor.add(url, request).await.unwrap();

    supervisor.pause(id).await.unwrap();
    let paused = wait_for_terminal(&supervisor, id).await;
    assert_eq!(paused.status, TaskStatus::Paused);

    supervisor.resume(id).await.unwrap();
    let task = wait_for_terminal(&supervisor, id).await;
    assert_eq!(task.status, TaskStatus::Completed, "error: {:?}", task.error);

    let content = std::fs::read(task.destination.join(&task.file_name)).unwrap();
    assert_eq!(content, body);
}

#[tokio::test]
async fn cancel_stops_the_task() {
    let body: Vec<u8> = (0u8..100).cycle().take(512 * 1024).collect();
    let url = common::range_server::start_with_options(
        body,
        common::range_server::RangeServerOptions {
            chunk_delay: Duration::from_millis(2),
            ..Default::default()
        },
    );

    let download_dir = tempdir().unwrap();
    let temp_dir = tempdir().unwrap();
    let supervisor = TaskSupervisor::new(EngineConfig::default(), temp_dir.path().to_path_buf()).unwrap();

    let request = NewTaskRequest {
        destination_directory: Some(download_dir.path().to_path_buf()),
        segment_count: Some(2),
        ..Default::default()
    };
    let id = supervisor.add(url, request).await.unwrap();

    supervisor.stop(id).await.unwrap();
    let task = wait_for_terminal(&supervisor, id).await;
    assert_eq!(task.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn polling_the_task_handle_observes_live_progress() {
    let body: Vec<u8> = (0u8..100).cycle().take(512 * 1024).collect();
    let url = common::range_server::start_with_options(
        body.clone(),
        common::range_server::RangeServerOptions {
            chunk_delay: Duration::from_millis(2),
            ..Default::default()
        },
    );

    let download_dir = tempdir().unwrap();
    let temp_dir = tempdir().unwrap();
    let supervisor = TaskSupervisor::new(EngineConfig::default(), temp_dir.path().to_path_buf()).unwrap();

    let request = NewTaskRequest {
        destination_directory: Some(download_dir.path().to_path_buf()),
        segment_count: Some(2),
        ..Default::default()
    };
    let id = supervisor.add(url, request).await.unwrap();

    // Poll via the public handle alone (no event subscription) until it
    // shows real in-flight progress, the way a UI shell would.
    let saw_progress = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let task = supervisor.get(id).await.expect("task exists");
            if task.downloaded > 0 && task.status == TaskStatus::Downloading {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("task handle never showed live progress");
    assert!(saw_progress.downloaded > 0);
    assert!(saw_progress.downloaded < body.len() as u64);

    let task = wait_for_terminal(&supervisor, id).await;
    assert_eq!(task.status, TaskStatus::Completed, "error: {:?}", task.error);
    assert_eq!(task.downloaded, body.len() as u64);
}

#[tokio::test]
async fn probe_reports_size_and_range_support() {
    let body = vec![0u8; 4096];
    let url = common::range_server::start(body);

    let temp_dir = tempdir().unwrap();
    let supervisor = TaskSupervisor::new(EngineConfig::default(), temp_dir.path().to_path_buf()).unwrap();

    let info = supervisor.probe(&url).await.unwrap();
    assert_eq!(info.total_size, Some(4096));
    assert!(info.supports_range);
}
