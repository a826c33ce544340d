//! Fixtures shared by tests across the crate.

use std::sync::{Arc, Mutex};

use crate::core::code_entry::{CodeEntry, CodeTag};
use crate::trace::{MemorySink, TraceEvent};

/// A plain function entry with no source metadata.
pub fn function_entry(name: &str) -> Arc<CodeEntry> {
    Arc::new(CodeEntry::new(CodeTag::Function, name))
}

/// Takes everything the sink captured so far, leaving it empty.
pub fn drain_events(sink: &Arc<Mutex<MemorySink>>) -> Vec<TraceEvent> {
    std::mem::take(&mut sink.lock().unwrap().events)
}
