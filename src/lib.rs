//! Aggregation core for a sampling CPU profiler embedded in a language
//! runtime.
//!
//! The runtime's code-event listener keeps a [`CodeMap`] current as code is
//! emitted, moved, and replaced. A sampler delivers [`TickSample`]s to a
//! [`ProfileGenerator`], which resolves raw addresses into [`CodeEntry`]s
//! and broadcasts the symbolized path into every running session of a
//! [`CpuProfilesCollection`]. Each [`CpuProfile`] aggregates paths into a
//! calling-context tree and streams incremental `Profile` / `ProfileChunk`
//! trace events to a [`TraceSink`].
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use tickprof::{
//!     CodeEntry, CodeTag, CpuProfilesCollection, MemorySink, ProfileGenerator, TickSample,
//!     VmState,
//! };
//!
//! let sink = Arc::new(Mutex::new(MemorySink::new()));
//! let profiles = Arc::new(CpuProfilesCollection::new(sink));
//! let mut generator = ProfileGenerator::new(profiles.clone());
//!
//! // The runtime reports a code object, the sampler reports a tick in it.
//! let entry = Arc::new(CodeEntry::new(CodeTag::Function, "work").with_instruction_start(0x1000));
//! generator.code_created(0x1000, entry, 0x100);
//!
//! profiles.start_profiling("session", true);
//! generator.record_tick_sample(&TickSample {
//!     pc: Some(0x1010),
//!     state: VmState::Js,
//!     timestamp: Some(125),
//!     ..Default::default()
//! });
//!
//! let profile = profiles.stop_profiling("session").unwrap();
//! assert_eq!(profile.samples().len(), 1);
//! ```

pub mod core;
pub mod generator;
pub mod profile;
pub mod test_utils;
pub mod trace;

pub use crate::core::code_entry::{CodeEntry, CodeTag, DeoptFrame, DeoptInfo, SyntheticEntries};
pub use crate::core::code_map::CodeMap;
pub use crate::core::source_position::SourcePositionTable;
pub use crate::core::tree::{LineTick, NodeId, ProfileNode, ProfileTree, TreeVisitor};
pub use crate::core::types::{
    Address, BuiltinId, Clock, FunctionMetadata, Micros, MonotonicClock, TickSample, VmState,
};
pub use crate::generator::{Config, ProfileGenerator};
pub use crate::profile::{CpuProfile, CpuProfilesCollection, MAX_SIMULTANEOUS_PROFILES};
pub use crate::trace::{
    JsonLinesSink, MemorySink, SharedSink, TraceEvent, TraceSink, TRACE_CATEGORY,
};
