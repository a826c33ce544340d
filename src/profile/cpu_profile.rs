use log::warn;

use crate::core::code_entry::CodeEntry;
use crate::core::tree::{NodeId, ProfileTree};
use crate::core::types::Micros;
use crate::trace::{
    ChunkNode, ProfileChunk, ProfileEventData, SharedSink, TraceEvent, PROFILE_CHUNK_EVENT,
    PROFILE_EVENT, TRACE_CATEGORY,
};
use std::io;
use std::io::Write;
use std::sync::Arc;

/// Stream a chunk once this many samples are waiting...
const SAMPLES_FLUSH_COUNT: usize = 100;
/// ...or once this many tree nodes were created since the last chunk.
const NODES_FLUSH_COUNT: usize = 10;

/// One profiling session: a calling-context tree, the recorded sample log,
/// and a cursor tracking how much of both has been streamed out.
///
/// Chunks are emitted incrementally while the session runs, so a consumer
/// that dies mid-profile still has a usable prefix.
pub struct CpuProfile {
    id: u64,
    title: String,
    record_samples: bool,
    start_time: Micros,
    end_time: Option<Micros>,
    top_down: ProfileTree,
    timestamps: Vec<Micros>,
    samples: Vec<NodeId>,
    streaming_next_sample: usize,
    sink: SharedSink,
}

impl CpuProfile {
    pub(crate) fn new(
        id: u64,
        title: &str,
        record_samples: bool,
        start_time: Micros,
        sink: SharedSink,
    ) -> CpuProfile {
        let profile = CpuProfile {
            id,
            title: title.to_string(),
            record_samples,
            start_time,
            end_time: None,
            top_down: ProfileTree::new(),
            timestamps: Vec::new(),
            samples: Vec::new(),
            streaming_next_sample: 0,
            sink,
        };
        profile.emit(
            PROFILE_EVENT,
            ProfileEventData {
                start_time: Some(profile.start_time),
                ..Default::default()
            },
        );
        profile
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn start_time(&self) -> Micros {
        self.start_time
    }

    /// Set once the profile is stopped.
    pub fn end_time(&self) -> Option<Micros> {
        self.end_time
    }

    pub fn top_down(&self) -> &ProfileTree {
        &self.top_down
    }

    /// Terminal node of each recorded sample, parallel to `timestamps`.
    pub fn samples(&self) -> &[NodeId] {
        &self.samples
    }

    pub fn timestamps(&self) -> &[Micros] {
        &self.timestamps
    }

    /// Folds one symbolized stack into the tree, logs the sample when the
    /// session records samples, and streams a chunk when enough state has
    /// accumulated.
    pub(crate) fn add_path(
        &mut self,
        timestamp: Option<Micros>,
        path: &[Option<Arc<CodeEntry>>],
        src_line: u32,
        update_stats: bool,
    ) {
        let top_frame = self.top_down.add_path_from_end(path, src_line, update_stats);
        if self.record_samples {
            if let Some(timestamp) = timestamp {
                self.timestamps.push(timestamp);
                self.samples.push(top_frame);
            }
        }
        if self.samples.len() - self.streaming_next_sample >= SAMPLES_FLUSH_COUNT
            || self.top_down.pending_nodes_count() >= NODES_FLUSH_COUNT
        {
            self.stream_pending_trace_events();
        }
    }

    /// Emits one `ProfileChunk` carrying everything not yet streamed: tree
    /// nodes in creation order (so `parent` references always resolve) and
    /// the unsent samples with their time deltas. Emits nothing when there
    /// is nothing to say.
    fn stream_pending_trace_events(&mut self) {
        debug_assert_eq!(self.samples.len(), self.timestamps.len());
        let pending_nodes = self.top_down.take_pending_nodes();
        let unsent_samples = self.streaming_next_sample < self.samples.len();
        if pending_nodes.is_empty() && !unsent_samples {
            return;
        }

        let mut chunk = ProfileChunk::default();
        if !pending_nodes.is_empty() {
            chunk.nodes = Some(
                pending_nodes
                    .iter()
                    .map(|&id| ChunkNode::from_node(self.top_down.node(id)))
                    .collect(),
            );
        }

        let mut data = ProfileEventData::default();
        if unsent_samples {
            chunk.samples = Some(self.samples[self.streaming_next_sample..].to_vec());

            let mut last_timestamp = if self.streaming_next_sample > 0 {
                self.timestamps[self.streaming_next_sample - 1]
            } else {
                self.start_time
            };
            let mut deltas = Vec::with_capacity(self.timestamps.len() - self.streaming_next_sample);
            for &timestamp in &self.timestamps[self.streaming_next_sample..] {
                deltas.push(timestamp as i64 - last_timestamp as i64);
                last_timestamp = timestamp;
            }
            data.time_deltas = Some(deltas);
            self.streaming_next_sample = self.samples.len();
        }
        data.cpu_profile = Some(chunk);

        self.emit(PROFILE_CHUNK_EVENT, data);
    }

    /// Stamps the end time, flushes outstanding state, and closes the
    /// stream with a final `endTime` chunk.
    pub(crate) fn finish(&mut self, end_time: Micros) {
        self.end_time = Some(end_time);
        self.stream_pending_trace_events();
        self.emit(
            PROFILE_CHUNK_EVENT,
            ProfileEventData {
                end_time: Some(end_time),
                ..Default::default()
            },
        );
    }

    /// Dumps the aggregated tree for debugging.
    pub fn write_summary(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "[Top down]:")?;
        self.top_down.write(w)
    }

    fn emit(&self, name: &'static str, data: ProfileEventData) {
        match self.sink.lock() {
            Ok(mut sink) => sink.emit(TraceEvent {
                category: TRACE_CATEGORY,
                name,
                id: self.id,
                data,
            }),
            Err(_) => warn!("trace sink poisoned; dropping {} event", name),
        }
    }
}
