//! Segmented download engine.
//!
//! - [`worker`] — downloads one byte range to a temp file.
//! - [`controller`] — plans, fans out workers, re-segments dynamically,
//!   merges.
//! - [`supervisor`] — owns every active task, exposes add/pause/resume/
//!   stop/remove, and ticks deferred-start tasks.

pub mod controller;
pub mod supervisor;
pub mod worker;

pub use controller::DownloadController;
pub use supervisor::TaskSupervisor;
pub use worker::{SegmentHandle, SegmentWorker};
