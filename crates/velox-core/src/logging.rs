//! Logging sink bridge.
//!
//! The engine instruments itself with `tracing` at the same call sites the
//! teacher crate does (task/segment lifecycle transitions, merge,
//! re-segmentation). Callers that want those messages funneled somewhere
//! other than a `tracing` subscriber — a UI console pane, a file the CLI
//! doesn't otherwise touch — can install a `LogSink` instead of configuring
//! `tracing-subscriber` themselves.

use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::{Context, Layer};

/// A minimal sink for forwarded log lines. One operation: take a rendered
/// message and do something with it.
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str);
}

/// A sink that writes to stderr, for CLI use without a subscriber installed.
pub struct StderrSink;

impl LogSink for StderrSink {
    fn log(&self, message: &str) {
        eprintln!("{message}");
    }
}

/// A `tracing_subscriber::Layer` that forwards every formatted event to a
/// `LogSink`, so the engine's internal `tracing` instrumentation and an
/// injected sink coexist: install this layer on top of whatever subscriber
/// the host process already runs.
pub struct SinkLayer {
    sink: Arc<dyn LogSink>,
}

impl SinkLayer {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SinkLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let level = event.metadata().level();
        let target = event.metadata().target();
        self.sink
            .log(&format!("[{level}] {target}: {}", visitor.message));
    }

    fn on_new_span(&self, _attrs: &span::Attributes<'_>, _id: &span::Id, _ctx: Context<'_, S>) {}
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else if !self.message.is_empty() {
            self.message.push_str(&format!(" {}={value:?}", field.name()));
        }
    }
}
