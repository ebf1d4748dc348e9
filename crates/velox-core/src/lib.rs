//! Velox Core - Segmented Download Engine
//!
//! Probes a URL, splits it into byte-range segments, downloads each
//! concurrently with dynamic re-segmentation of the slowest segment, and
//! merges the results into the destination file. [`engine::TaskSupervisor`]
//! is the top-level entry point; everything else hangs off it.

pub mod engine;
pub mod error;
pub mod http;
pub mod logging;

pub use engine::TaskSupervisor;
pub use error::VeloxError;
pub use logging::{LogSink, SinkLayer, StderrSink};

pub use velox_types::{
    EngineConfig, NewTaskRequest, ProbeInfo, Segment, Task, TaskEvent, TaskKind, TaskStatus,
};
