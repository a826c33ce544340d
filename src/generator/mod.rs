//! Turns raw tick samples into symbolized stack paths.
//!
//! This is where the attribution policy lives: which code entry a pc
//! belongs to, what to do about trampoline builtins and external callbacks,
//! how inlined frames unfold, and which source line a sample is charged to.

use std::sync::Arc;

use crate::core::code_entry::{CodeEntry, DeoptFrame, SyntheticEntries};
use crate::core::code_map::CodeMap;
use crate::core::types::{Address, BuiltinId, TickSample, VmState, NO_LINE_NUMBER_INFO};
use crate::profile::CpuProfilesCollection;

/// Configuration for the tick-processing pipeline.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// When a sample resolves to no known code at all, attribute it to a
    /// VM-state bucket (`(program)`, `(idle)`, `(garbage collector)`)
    /// instead of dropping every frame. Default: `false`.
    pub browser_mode: bool,
}

/// Consumes `TickSample`s and code events, and feeds symbolized paths into
/// every running profile.
pub struct ProfileGenerator {
    profiles: Arc<CpuProfilesCollection>,
    code_map: CodeMap,
    synthetic_entries: SyntheticEntries,
    config: Config,
}

impl ProfileGenerator {
    pub fn new(profiles: Arc<CpuProfilesCollection>) -> ProfileGenerator {
        ProfileGenerator::with_config(profiles, Config::default())
    }

    pub fn with_config(profiles: Arc<CpuProfilesCollection>, config: Config) -> ProfileGenerator {
        ProfileGenerator {
            profiles,
            code_map: CodeMap::new(),
            synthetic_entries: SyntheticEntries::new(),
            config,
        }
    }

    pub fn code_map(&self) -> &CodeMap {
        &self.code_map
    }

    pub fn synthetic_entries(&self) -> &SyntheticEntries {
        &self.synthetic_entries
    }

    /// The runtime emitted a new code object.
    pub fn code_created(&mut self, addr: Address, entry: Arc<CodeEntry>, size: u32) {
        self.code_map.add_code(addr, entry, size);
    }

    /// The runtime relocated a code object.
    pub fn code_moved(&mut self, from: Address, to: Address) {
        self.code_map.move_code(from, to);
    }

    /// The compiler refused to optimize a function.
    pub fn code_disable_opt(&self, entry: &CodeEntry, reason: &str) {
        entry.set_bailout_reason(reason);
    }

    /// Optimized code was abandoned. The annotation sticks to the entry
    /// until the next sample through it collects the record.
    pub fn code_deopt(
        &self,
        entry: &CodeEntry,
        deopt_id: i32,
        reason: &str,
        inlined_frames: Option<Vec<DeoptFrame>>,
    ) {
        entry.set_deopt_reason(reason);
        entry.set_deopt_id(deopt_id);
        if let Some(frames) = inlined_frames {
            entry.add_deopt_inlined_frames(deopt_id, frames);
        }
    }

    pub fn find_entry(&self, addr: Address) -> Option<Arc<CodeEntry>> {
        self.code_map.find_entry(addr)
    }

    /// Symbolizes one sample and broadcasts the resulting path.
    pub fn record_tick_sample(&self, sample: &TickSample) {
        // Frames plus pc entry, a possible trampoline caller, and a possible
        // VM-state bucket; inlined frames can still grow it.
        let mut entries: Vec<Option<Arc<CodeEntry>>> = Vec::with_capacity(sample.stack.len() + 3);

        // A sample is charged to the source line of the topmost frame that
        // resolves to line information; the entry's own declaration line is
        // the fallback when the code object carries no position table.
        let mut src_line = NO_LINE_NUMBER_INFO;
        let mut src_line_not_found = true;

        if let Some(pc) = sample.pc {
            if sample.has_external_callback && sample.state == VmState::External {
                // The pc points into the callback's own code; using it would
                // make the callback look like it calls itself.
                entries.push(self.code_map.find_entry(sample.external_callback_entry));
            } else {
                let mut pc_entry = self.code_map.find_entry(pc);
                if pc_entry.is_none() && !sample.has_external_callback {
                    // The pc missed every known range, but a callee that has
                    // not set up its frame yet leaves its entry on top of
                    // the stack.
                    pc_entry = self.code_map.find_entry(sample.tos);
                }
                if let Some(pc_entry) = pc_entry {
                    // A tos-resolved entry can start above the pc; the wrap
                    // then lands past every recorded position, like the
                    // original's signed offset.
                    let pc_offset = pc.wrapping_sub(pc_entry.instruction_start()) as u32;
                    src_line = pc_entry.source_line(pc_offset);
                    if src_line == NO_LINE_NUMBER_INFO {
                        src_line = pc_entry.line_number();
                    }
                    src_line_not_found = false;

                    let at_trampoline = matches!(
                        pc_entry.builtin_id(),
                        Some(BuiltinId::FunctionPrototypeApply)
                            | Some(BuiltinId::FunctionPrototypeCall)
                    );
                    entries.push(Some(pc_entry));
                    if at_trampoline && !sample.has_external_callback {
                        // Inside apply/call the walked caller frame may be an
                        // internal frame rather than the real caller; report
                        // it as unresolved instead of guessing.
                        entries.push(Some(self.synthetic_entries.unresolved().clone()));
                    }
                }
            }

            for &stack_pos in &sample.stack {
                let entry = self.code_map.find_entry(stack_pos);
                if let Some(ref entry) = entry {
                    let pc_offset = (stack_pos - entry.instruction_start()) as u32;
                    if let Some(inline_stack) = entry.inline_stack(pc_offset) {
                        // Deepest inlinee first; the leaf-first path order
                        // puts the callsite closer to the root.
                        entries.extend(inline_stack.iter().rev().cloned().map(Some));
                    }
                    if src_line_not_found {
                        src_line = entry.source_line(pc_offset);
                        if src_line == NO_LINE_NUMBER_INFO {
                            src_line = entry.line_number();
                        }
                        src_line_not_found = false;
                    }
                }
                entries.push(entry);
            }
        }

        if self.config.browser_mode {
            let no_symbolized_entries = entries.iter().all(|entry| entry.is_none());
            if no_symbolized_entries {
                entries.push(Some(self.entry_for_vm_state(sample.state)));
            }
        }

        self.profiles.add_path_to_current_profiles(
            sample.timestamp,
            &entries,
            src_line,
            sample.update_stats,
        );
    }

    fn entry_for_vm_state(&self, state: VmState) -> Arc<CodeEntry> {
        match state {
            VmState::GarbageCollector => self.synthetic_entries.gc().clone(),
            VmState::Idle => self.synthetic_entries.idle().clone(),
            VmState::Js
            | VmState::Parser
            | VmState::Compiler
            | VmState::BytecodeCompiler
            | VmState::Other
            | VmState::External => self.synthetic_entries.program().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::core::code_entry::{CodeTag, UNRESOLVED_FUNCTION_NAME};
    use crate::core::source_position::SourcePositionTable;
    use crate::core::tree::{LineTick, ProfileTree};
    use crate::core::types::ManualClock;
    use crate::profile::CpuProfile;
    use crate::trace::MemorySink;

    fn generator(config: Config) -> ProfileGenerator {
        let sink = Arc::new(Mutex::new(MemorySink::new()));
        let clock = Arc::new(ManualClock::new(0));
        let profiles = Arc::new(CpuProfilesCollection::with_clock(sink, clock));
        assert!(profiles.start_profiling("p", true));
        ProfileGenerator::with_config(profiles, config)
    }

    fn stop(generator: &ProfileGenerator) -> Arc<CpuProfile> {
        generator.profiles.stop_profiling("p").expect("profile")
    }

    /// Names of the chain of only-children starting at the root.
    fn spine(tree: &ProfileTree) -> Vec<String> {
        let mut names = Vec::new();
        let mut node = tree.root();
        while let Some(&child) = node.children().first() {
            node = tree.node(child);
            names.push(node.entry().name().to_string());
        }
        names
    }

    #[test]
    fn leaf_sample_lands_under_root_with_line_ticks() {
        let mut generator = generator(Config::default());
        let a = Arc::new(
            CodeEntry::new(CodeTag::Function, "a")
                .with_source_position(7, 0)
                .with_instruction_start(0x1000),
        );
        generator.code_created(0x1000, a, 0x10);

        generator.record_tick_sample(&TickSample {
            pc: Some(0x1004),
            state: VmState::Js,
            timestamp: Some(100),
            ..Default::default()
        });

        let profile = stop(&generator);
        let tree = profile.top_down();
        assert_eq!(spine(tree), vec!["a"]);
        let leaf = tree.node(tree.root().children()[0]);
        assert_eq!(leaf.self_ticks(), 1);
        let mut ticks = [LineTick::default(); 1];
        assert!(leaf.line_ticks(&mut ticks));
        assert_eq!(ticks[0], LineTick { line: 7, hit_count: 1 });
        assert_eq!(profile.samples().len(), 1);
    }

    #[test]
    fn inline_stack_unfolds_with_callsite_closer_to_root() {
        let mut generator = generator(Config::default());
        let i1 = Arc::new(CodeEntry::new(CodeTag::Function, "i1"));
        let i2 = Arc::new(CodeEntry::new(CodeTag::Function, "i2"));
        let mut a = CodeEntry::new(CodeTag::Function, "a").with_instruction_start(0x1000);
        a.add_inline_stack(0x10, vec![i1, i2]);
        generator.code_created(0x1000, Arc::new(a), 0x100);

        generator.record_tick_sample(&TickSample {
            pc: Some(0x1020),
            state: VmState::Js,
            timestamp: Some(100),
            stack: vec![0x1010],
            ..Default::default()
        });

        let profile = stop(&generator);
        assert_eq!(spine(profile.top_down()), vec!["a", "i1", "i2", "a"]);
        let tree = profile.top_down();
        let terminal = tree.node(profile.samples()[0]);
        assert_eq!(terminal.entry().name(), "a");
        assert_eq!(terminal.self_ticks(), 1);
    }

    #[test]
    fn apply_trampoline_gets_an_unresolved_caller() {
        let mut generator = generator(Config::default());
        let mut apply = CodeEntry::new(CodeTag::Stub, "apply").with_instruction_start(0x1000);
        apply.set_builtin_id(BuiltinId::FunctionPrototypeApply);
        generator.code_created(0x1000, Arc::new(apply), 0x10);
        let b = Arc::new(CodeEntry::new(CodeTag::Function, "b").with_instruction_start(0x2000));
        generator.code_created(0x2000, b, 0x10);

        generator.record_tick_sample(&TickSample {
            pc: Some(0x1004),
            state: VmState::Js,
            timestamp: Some(100),
            stack: vec![0x2004],
            ..Default::default()
        });

        let profile = stop(&generator);
        assert_eq!(
            spine(profile.top_down()),
            vec!["b", UNRESOLVED_FUNCTION_NAME, "apply"]
        );
    }

    #[test]
    fn external_callback_overrides_the_pc() {
        let mut generator = generator(Config::default());
        let c = Arc::new(CodeEntry::new(CodeTag::Callback, "cb").with_instruction_start(0x2000));
        generator.code_created(0x2000, c, 0x10);
        let mut table = SourcePositionTable::new();
        table.set_position(0, 3);
        let caller = Arc::new(
            CodeEntry::new(CodeTag::Function, "caller")
                .with_instruction_start(0x3000)
                .with_line_info(table),
        );
        generator.code_created(0x3000, caller, 0x10);

        generator.record_tick_sample(&TickSample {
            // Unmapped pc; must not be consulted.
            pc: Some(0x9999),
            external_callback_entry: 0x2000,
            has_external_callback: true,
            state: VmState::External,
            timestamp: Some(100),
            stack: vec![0x3004],
            ..Default::default()
        });

        let profile = stop(&generator);
        assert_eq!(spine(profile.top_down()), vec!["caller", "cb"]);
        // Source line comes from the first resolved stack frame.
        let tree = profile.top_down();
        let terminal = tree.node(profile.samples()[0]);
        let mut ticks = [LineTick::default(); 1];
        assert!(terminal.line_ticks(&mut ticks));
        assert_eq!(ticks[0].line, 3);
    }

    #[test]
    fn frameless_invocation_falls_back_to_top_of_stack() {
        let mut generator = generator(Config::default());
        let f = Arc::new(CodeEntry::new(CodeTag::Function, "f").with_instruction_start(0x1000));
        generator.code_created(0x1000, f, 0x10);

        generator.record_tick_sample(&TickSample {
            pc: Some(0x9999),
            tos: 0x1008,
            state: VmState::Js,
            timestamp: Some(100),
            ..Default::default()
        });

        let profile = stop(&generator);
        assert_eq!(spine(profile.top_down()), vec!["f"]);
    }

    #[test]
    fn moved_code_resolves_only_at_the_new_address() {
        let mut generator = generator(Config::default());
        let e = Arc::new(CodeEntry::new(CodeTag::Function, "e").with_instruction_start(0x3000));
        generator.code_created(0x3000, e.clone(), 0x20);
        generator.code_moved(0x3000, 0x4000);

        assert!(generator.find_entry(0x3010).is_none());
        assert!(Arc::ptr_eq(&generator.find_entry(0x4010).unwrap(), &e));
    }

    #[test]
    fn unsymbolized_sample_terminates_at_root_without_browser_mode() {
        let generator = generator(Config::default());
        generator.record_tick_sample(&TickSample {
            pc: Some(0x9999),
            state: VmState::Js,
            timestamp: Some(100),
            stack: vec![0x8888],
            ..Default::default()
        });

        let profile = stop(&generator);
        let tree = profile.top_down();
        assert!(tree.root().children().is_empty());
        assert_eq!(tree.root().self_ticks(), 1);
        assert_eq!(profile.samples(), &[ProfileTree::ROOT_ID]);
    }

    #[test]
    fn browser_mode_buckets_unsymbolized_samples_by_vm_state() {
        let generator = generator(Config { browser_mode: true });
        for state in [VmState::GarbageCollector, VmState::Idle, VmState::Compiler] {
            generator.record_tick_sample(&TickSample {
                pc: Some(0x9999),
                state,
                timestamp: Some(100),
                ..Default::default()
            });
        }

        let profile = stop(&generator);
        let tree = profile.top_down();
        let names: Vec<_> = tree
            .root()
            .children()
            .iter()
            .map(|&id| tree.node(id).entry().name().to_string())
            .collect();
        assert_eq!(names, vec!["(garbage collector)", "(idle)", "(program)"]);
    }

    #[test]
    fn browser_mode_stays_quiet_when_any_frame_resolved() {
        let mut generator = generator(Config { browser_mode: true });
        let f = Arc::new(CodeEntry::new(CodeTag::Function, "f").with_instruction_start(0x1000));
        generator.code_created(0x1000, f, 0x10);

        // Top of stack resolves, every walked frame misses: no VM-state
        // bucket is added.
        generator.record_tick_sample(&TickSample {
            pc: Some(0x1004),
            state: VmState::Js,
            timestamp: Some(100),
            stack: vec![0x8888, 0x7777],
            ..Default::default()
        });

        let profile = stop(&generator);
        assert_eq!(spine(profile.top_down()), vec!["f"]);
    }

    #[test]
    fn pc_less_sample_records_an_empty_path() {
        let generator = generator(Config::default());
        generator.record_tick_sample(&TickSample {
            timestamp: Some(100),
            ..Default::default()
        });

        let profile = stop(&generator);
        assert_eq!(profile.samples(), &[ProfileTree::ROOT_ID]);
    }

    #[test]
    fn deopt_event_annotates_the_next_sample() {
        let mut generator = generator(Config::default());
        let f = Arc::new(
            CodeEntry::new(CodeTag::Function, "f")
                .with_script(4, 20)
                .with_instruction_start(0x1000),
        );
        generator.code_created(0x1000, f.clone(), 0x10);
        generator.code_deopt(&f, 7, "not a Smi", None);

        generator.record_tick_sample(&TickSample {
            pc: Some(0x1004),
            state: VmState::Js,
            timestamp: Some(100),
            ..Default::default()
        });

        let profile = stop(&generator);
        let tree = profile.top_down();
        let leaf = tree.node(tree.root().children()[0]);
        assert_eq!(leaf.deopt_infos().len(), 1);
        assert_eq!(leaf.deopt_infos()[0].deopt_reason, "not a Smi");
        assert_eq!(
            leaf.deopt_infos()[0].stack,
            vec![DeoptFrame {
                script_id: 4,
                position: 20
            }]
        );
        assert!(!f.has_deopt_info());
    }

    #[test]
    fn disable_opt_event_becomes_a_streamed_deopt_reason() {
        let mut generator = generator(Config::default());
        let f = Arc::new(CodeEntry::new(CodeTag::Function, "f").with_instruction_start(0x1000));
        generator.code_created(0x1000, f.clone(), 0x10);
        generator.code_disable_opt(&f, "TryCatchStatement");
        assert_eq!(f.bailout_reason(), "TryCatchStatement");
    }
}
