//! Outbound trace-event surface.
//!
//! The engine never performs I/O itself: every `Profile` / `ProfileChunk`
//! event is handed to a [`TraceSink`], whose contract is non-blocking and
//! best-effort. [`MemorySink`] buffers events in memory; [`JsonLinesSink`]
//! writes one Trace-Event-Format JSON object per line.

use std::io;
use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use log::warn;
use serde_json::json;
use thiserror::Error;

mod events;

pub use events::{CallFrame, ChunkNode, ProfileChunk, ProfileEventData};

/// Category all profiler trace events are tagged with.
pub const TRACE_CATEGORY: &str = "disabled-by-default-v8.cpu_profiler";

pub const PROFILE_EVENT: &str = "Profile";
pub const PROFILE_CHUNK_EVENT: &str = "ProfileChunk";

/// One sample-with-id trace event: the owning profile's numeric identity
/// keys all of its events together on the consumer side.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    pub category: &'static str,
    pub name: &'static str,
    pub id: u64,
    pub data: ProfileEventData,
}

/// Receives trace events. Implementations must not block the profiling
/// path; anything slow belongs behind a queue.
pub trait TraceSink: Send {
    fn emit(&mut self, event: TraceEvent);
}

/// How the engine holds its sink: shared with whoever drains it.
pub type SharedSink = Arc<Mutex<dyn TraceSink>>;

/// Buffers every event in memory. Used by tests and by embedders that
/// post-process a finished stream in one go.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub events: Vec<TraceEvent>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }
}

impl TraceSink for MemorySink {
    fn emit(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to serialize trace event")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write trace event")]
    Io(#[from] io::Error),
}

/// Writes newline-delimited Trace-Event-Format JSON. Write failures are
/// logged and the event dropped; the profiling path never sees the error.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> JsonLinesSink<W> {
        JsonLinesSink { writer }
    }

    fn try_emit(&mut self, event: &TraceEvent) -> Result<(), SinkError> {
        let line = json!({
            "cat": event.category,
            "name": event.name,
            "ph": "P",
            "id": format!("{:#x}", event.id),
            "args": { "data": event.data },
        });
        serde_json::to_writer(&mut self.writer, &line)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.writer.flush().context("failed to flush trace stream")?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> TraceSink for JsonLinesSink<W> {
    fn emit(&mut self, event: TraceEvent) {
        if let Err(e) = self.try_emit(&event) {
            warn!("dropping {} trace event: {}", event.name, e);
        }
    }
}
