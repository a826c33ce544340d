use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use crate::core::source_position::SourcePositionTable;
use crate::core::types::{Address, BuiltinId, FunctionMetadata, NO_LINE_NUMBER_INFO, NO_SCRIPT_ID};

pub const PROGRAM_ENTRY_NAME: &str = "(program)";
pub const IDLE_ENTRY_NAME: &str = "(idle)";
pub const GARBAGE_COLLECTOR_ENTRY_NAME: &str = "(garbage collector)";
pub const UNRESOLVED_FUNCTION_NAME: &str = "(unresolved function)";
pub const ROOT_ENTRY_NAME: &str = "(root)";

/// The compiler reports this bailout reason for functions it is still
/// willing to optimize; it is treated the same as no reason at all.
pub const BAILOUT_NO_REASON: &str = "no reason";

/// What kind of code object an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeTag {
    Function,
    Builtin,
    Callback,
    Stub,
    RegExp,
    Script,
    Other,
}

/// One frame of a deoptimization stack: where in which script the
/// abandoned code came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeoptFrame {
    pub script_id: i32,
    pub position: u32,
}

/// A consumed deoptimization record: the reason the optimizer gave up and
/// the inlined source stack that was active at the deopt point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeoptInfo {
    pub deopt_reason: String,
    pub stack: Vec<DeoptFrame>,
}

/// Annotations the runtime attaches to an entry after it has been installed
/// in the code map and shared. The deopt reason/id pair is transient: it is
/// set when code deoptimizes and consumed by the next sample that reaches
/// the function.
#[derive(Debug, Default)]
struct DeoptState {
    bailout_reason: String,
    deopt_reason: String,
    deopt_id: Option<i32>,
    inlined_frames: HashMap<i32, Vec<DeoptFrame>>,
}

/// Symbolic descriptor of one code object: a function, builtin, stub, or
/// one of the synthetic bookkeeping entries.
///
/// Identity (hashing, equality) is fixed at construction; everything behind
/// the internal mutex is a transient annotation and does not participate in
/// identity.
#[derive(Debug)]
pub struct CodeEntry {
    tag: CodeTag,
    name_prefix: String,
    name: String,
    resource_name: String,
    line_number: u32,
    column_number: u32,
    script_id: i32,
    position: i32,
    builtin_id: Option<BuiltinId>,
    instruction_start: Address,
    line_info: Option<SourcePositionTable>,
    inline_locations: HashMap<u32, Vec<Arc<CodeEntry>>>,
    deopt: Mutex<DeoptState>,
}

impl CodeEntry {
    pub fn new(tag: CodeTag, name: impl Into<String>) -> CodeEntry {
        CodeEntry {
            tag,
            name_prefix: String::new(),
            name: name.into(),
            resource_name: String::new(),
            line_number: NO_LINE_NUMBER_INFO,
            column_number: 0,
            script_id: NO_SCRIPT_ID,
            position: 0,
            builtin_id: None,
            instruction_start: 0,
            line_info: None,
            inline_locations: HashMap::new(),
            deopt: Mutex::new(DeoptState::default()),
        }
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> CodeEntry {
        self.name_prefix = prefix.into();
        self
    }

    pub fn with_resource_name(mut self, resource_name: impl Into<String>) -> CodeEntry {
        self.resource_name = resource_name.into();
        self
    }

    /// 1-based source position of the function itself; zero means unknown.
    pub fn with_source_position(mut self, line_number: u32, column_number: u32) -> CodeEntry {
        self.line_number = line_number;
        self.column_number = column_number;
        self
    }

    pub fn with_script(mut self, script_id: i32, position: i32) -> CodeEntry {
        self.script_id = script_id;
        self.position = position;
        self
    }

    pub fn with_instruction_start(mut self, instruction_start: Address) -> CodeEntry {
        self.instruction_start = instruction_start;
        self
    }

    pub fn with_line_info(mut self, line_info: SourcePositionTable) -> CodeEntry {
        self.line_info = Some(line_info);
        self
    }

    pub fn tag(&self) -> CodeTag {
        self.tag
    }

    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn line_number(&self) -> u32 {
        self.line_number
    }

    pub fn column_number(&self) -> u32 {
        self.column_number
    }

    pub fn script_id(&self) -> i32 {
        self.script_id
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn builtin_id(&self) -> Option<BuiltinId> {
        self.builtin_id
    }

    pub fn instruction_start(&self) -> Address {
        self.instruction_start
    }

    /// Marks the entry as a builtin. Builtins are tagged as such even when
    /// they were first reported under another tag.
    pub fn set_builtin_id(&mut self, id: BuiltinId) {
        self.tag = CodeTag::Builtin;
        self.builtin_id = Some(id);
    }

    /// Copies script identity and the compiler's current bailout verdict
    /// from the runtime's function metadata.
    pub fn fill_from_function_metadata(&mut self, metadata: &FunctionMetadata) {
        self.script_id = metadata.script_id;
        self.position = metadata.start_position;
        self.set_bailout_reason(&metadata.bailout_reason);
    }

    /// Source line for a pc offset, from the compiler's position table.
    /// Returns `NO_LINE_NUMBER_INFO` when no table was attached or the
    /// table is empty.
    pub fn source_line(&self, pc_offset: u32) -> u32 {
        match &self.line_info {
            Some(table) => table.lookup(pc_offset).unwrap_or(NO_LINE_NUMBER_INFO),
            None => NO_LINE_NUMBER_INFO,
        }
    }

    /// Attaches the stack of functions the optimizer inlined at `pc_offset`,
    /// ordered from the outermost callsite to the innermost inlinee.
    pub fn add_inline_stack(&mut self, pc_offset: u32, inline_stack: Vec<Arc<CodeEntry>>) {
        self.inline_locations.insert(pc_offset, inline_stack);
    }

    pub fn inline_stack(&self, pc_offset: u32) -> Option<&[Arc<CodeEntry>]> {
        self.inline_locations.get(&pc_offset).map(|v| v.as_slice())
    }

    pub fn set_bailout_reason(&self, reason: &str) {
        self.deopt.lock().unwrap().bailout_reason = reason.to_string();
    }

    pub fn bailout_reason(&self) -> String {
        self.deopt.lock().unwrap().bailout_reason.clone()
    }

    pub fn set_deopt_reason(&self, reason: &str) {
        self.deopt.lock().unwrap().deopt_reason = reason.to_string();
    }

    pub fn set_deopt_id(&self, deopt_id: i32) {
        self.deopt.lock().unwrap().deopt_id = Some(deopt_id);
    }

    /// Remembers the inlined source stack that was live at `deopt_id`, for
    /// the deopt record a later sample will collect.
    pub fn add_deopt_inlined_frames(&self, deopt_id: i32, frames: Vec<DeoptFrame>) {
        self.deopt.lock().unwrap().inlined_frames.insert(deopt_id, frames);
    }

    pub fn has_deopt_inlined_frames_for(&self, deopt_id: i32) -> bool {
        self.deopt.lock().unwrap().inlined_frames.contains_key(&deopt_id)
    }

    pub fn has_deopt_info(&self) -> bool {
        self.deopt.lock().unwrap().deopt_id.is_some()
    }

    /// Builds the deopt record for the current deopt id. When the compiler
    /// reported no inlined frames for it, the record gets a single frame
    /// pointing at the function's own script position.
    ///
    /// Call only when `has_deopt_info()`.
    pub fn get_deopt_info(&self) -> DeoptInfo {
        let state = self.deopt.lock().unwrap();
        let deopt_id = state.deopt_id.expect("no deopt info to collect");
        let stack = match state.inlined_frames.get(&deopt_id) {
            Some(frames) => frames.clone(),
            None => vec![DeoptFrame {
                script_id: self.script_id,
                position: self.position.max(0) as u32,
            }],
        };
        DeoptInfo {
            deopt_reason: state.deopt_reason.clone(),
            stack,
        }
    }

    pub fn clear_deopt_info(&self) {
        let mut state = self.deopt.lock().unwrap();
        state.deopt_reason.clear();
        state.deopt_id = None;
    }
}

impl fmt::Display for CodeEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.name_prefix, self.name)
    }
}

/// Two entries describe the same function when they agree on script
/// identity, or, for non-script code, on the full name/location tuple.
impl PartialEq for CodeEntry {
    fn eq(&self, other: &CodeEntry) -> bool {
        if self.script_id != NO_SCRIPT_ID || other.script_id != NO_SCRIPT_ID {
            return self.script_id == other.script_id && self.position == other.position;
        }
        self.name_prefix == other.name_prefix
            && self.name == other.name
            && self.resource_name == other.resource_name
            && self.line_number == other.line_number
    }
}

impl Eq for CodeEntry {}

impl Hash for CodeEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if self.script_id != NO_SCRIPT_ID {
            self.script_id.hash(state);
            self.position.hash(state);
        } else {
            self.name_prefix.hash(state);
            self.name.hash(state);
            self.resource_name.hash(state);
            self.line_number.hash(state);
        }
    }
}

/// The well-known bookkeeping entries, created once per generator instead of
/// hiding behind process-wide lazy statics.
#[derive(Debug)]
pub struct SyntheticEntries {
    program: Arc<CodeEntry>,
    idle: Arc<CodeEntry>,
    gc: Arc<CodeEntry>,
    unresolved: Arc<CodeEntry>,
}

impl SyntheticEntries {
    pub fn new() -> SyntheticEntries {
        SyntheticEntries {
            program: Arc::new(CodeEntry::new(CodeTag::Function, PROGRAM_ENTRY_NAME)),
            idle: Arc::new(CodeEntry::new(CodeTag::Function, IDLE_ENTRY_NAME)),
            gc: Arc::new(CodeEntry::new(CodeTag::Builtin, GARBAGE_COLLECTOR_ENTRY_NAME)),
            unresolved: Arc::new(CodeEntry::new(CodeTag::Function, UNRESOLVED_FUNCTION_NAME)),
        }
    }

    pub fn program(&self) -> &Arc<CodeEntry> {
        &self.program
    }

    pub fn idle(&self) -> &Arc<CodeEntry> {
        &self.idle
    }

    pub fn gc(&self) -> &Arc<CodeEntry> {
        &self.gc
    }

    pub fn unresolved(&self) -> &Arc<CodeEntry> {
        &self.unresolved
    }
}

impl Default for SyntheticEntries {
    fn default() -> SyntheticEntries {
        SyntheticEntries::new()
    }
}
