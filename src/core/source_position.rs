use std::collections::BTreeMap;

/// Maps a pc offset within one code object to the 1-based source line the
/// compiler attributed it to.
///
/// Offsets are inserted in whatever order the compiler emits position
/// records; lookups resolve to the line of the greatest recorded offset at
/// or below the query, so a query that lands between two records gets the
/// line of the instruction run it falls into.
#[derive(Debug, Default)]
pub struct SourcePositionTable {
    pc_offset_map: BTreeMap<u32, u32>,
}

impl SourcePositionTable {
    pub fn new() -> SourcePositionTable {
        SourcePositionTable::default()
    }

    /// Records that the instructions starting at `pc_offset` belong to
    /// `line`. Re-recording an offset with the line a lookup already yields
    /// is a no-op; recording a conflicting line for a known offset is a bug
    /// in the caller.
    pub fn set_position(&mut self, pc_offset: u32, line: u32) {
        debug_assert!(line > 0, "source lines are 1-based");
        if self.lookup(pc_offset) == Some(line) {
            return;
        }
        let previous = self.pc_offset_map.insert(pc_offset, line);
        debug_assert!(
            previous.is_none(),
            "pc offset {} already recorded with line {:?}",
            pc_offset,
            previous
        );
    }

    /// Line for the greatest recorded offset at or below `pc_offset`. An
    /// offset below every record resolves to the first record; an empty
    /// table has nothing to say.
    pub fn lookup(&self, pc_offset: u32) -> Option<u32> {
        if let Some((_, &line)) = self.pc_offset_map.range(..=pc_offset).next_back() {
            return Some(line);
        }
        self.pc_offset_map.values().next().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.pc_offset_map.is_empty()
    }
}
