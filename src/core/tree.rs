use std::collections::BTreeMap;
use std::io;
use std::io::Write;
use std::sync::Arc;

use fnv::FnvHashMap;

use crate::core::code_entry::{CodeEntry, CodeTag, DeoptInfo, BAILOUT_NO_REASON, ROOT_ENTRY_NAME};
use crate::core::types::NO_LINE_NUMBER_INFO;

/// Identifies a node within its owning tree. Ids are minted monotonically
/// from 1 in creation order and never reused, so they double as stable
/// identities for incremental streaming.
pub type NodeId = u32;

/// Children are keyed by which code object they represent, using the
/// shared entry's pointer identity: the same function recompiled gets a
/// fresh entry and therefore fresh children.
type EntryKey = usize;

fn entry_key(entry: &Arc<CodeEntry>) -> EntryKey {
    Arc::as_ptr(entry) as EntryKey
}

/// One `(line, hits)` pair copied out by `ProfileNode::line_ticks`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineTick {
    pub line: u32,
    pub hit_count: u32,
}

/// A node in the calling-context tree: one observed partial call stack,
/// counting how often sampling terminated exactly here.
#[derive(Debug)]
pub struct ProfileNode {
    id: NodeId,
    entry: Arc<CodeEntry>,
    parent: Option<NodeId>,
    children: FnvHashMap<EntryKey, NodeId>,
    children_list: Vec<NodeId>,
    self_ticks: u32,
    line_ticks: BTreeMap<u32, u32>,
    deopt_infos: Vec<DeoptInfo>,
}

impl ProfileNode {
    fn new(id: NodeId, entry: Arc<CodeEntry>, parent: Option<NodeId>) -> ProfileNode {
        ProfileNode {
            id,
            entry,
            parent,
            children: FnvHashMap::default(),
            children_list: Vec::new(),
            self_ticks: 0,
            line_ticks: BTreeMap::new(),
            deopt_infos: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn entry(&self) -> &Arc<CodeEntry> {
        &self.entry
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn self_ticks(&self) -> u32 {
        self.self_ticks
    }

    /// Child ids in insertion order.
    pub fn children(&self) -> &[NodeId] {
        &self.children_list
    }

    pub fn find_child(&self, entry: &Arc<CodeEntry>) -> Option<NodeId> {
        self.children.get(&entry_key(entry)).copied()
    }

    pub fn deopt_infos(&self) -> &[DeoptInfo] {
        &self.deopt_infos
    }

    pub fn increment_self_ticks(&mut self) {
        self.self_ticks += 1;
    }

    /// Attributes one hit to a source line; unknown lines are not counted.
    pub fn increment_line_ticks(&mut self, src_line: u32) {
        if src_line == NO_LINE_NUMBER_INFO {
            return;
        }
        *self.line_ticks.entry(src_line).or_insert(0) += 1;
    }

    /// Consumes the entry's pending deopt record into this node.
    pub fn collect_deopt_info(&mut self, entry: &CodeEntry) {
        self.deopt_infos.push(entry.get_deopt_info());
        entry.clear_deopt_info();
    }

    pub fn line_tick_count(&self) -> usize {
        self.line_ticks.len()
    }

    /// Copies the per-line hit counters into `out`. Fails (returns false)
    /// when `out` cannot hold them; a node with no line ticks succeeds
    /// without writing anything.
    pub fn line_ticks(&self, out: &mut [LineTick]) -> bool {
        if out.is_empty() {
            return false;
        }
        if self.line_ticks.is_empty() {
            return true;
        }
        if out.len() < self.line_ticks.len() {
            return false;
        }
        for (slot, (&line, &hit_count)) in out.iter_mut().zip(self.line_ticks.iter()) {
            *slot = LineTick { line, hit_count };
        }
        true
    }
}

/// Visitor for the non-recursive post-order traversal.
pub trait TreeVisitor {
    fn before_traversing_child(&mut self, _parent: &ProfileNode, _child: &ProfileNode) {}
    fn after_child_traversed(&mut self, _parent: &ProfileNode, _child: &ProfileNode) {}
    fn after_all_children_traversed(&mut self, _node: &ProfileNode) {}
}

struct TraversalPosition {
    node: NodeId,
    child_idx: usize,
}

/// The calling-context tree of one profiling session. Owns every node in
/// an arena indexed by id; paths are inserted leaf-to-root by
/// [`ProfileTree::add_path_from_end`].
#[derive(Debug)]
pub struct ProfileTree {
    nodes: Vec<ProfileNode>,
    function_ids: FnvHashMap<EntryKey, u32>,
    next_function_id: u32,
    pending_nodes: Vec<NodeId>,
}

impl ProfileTree {
    pub const ROOT_ID: NodeId = 1;

    pub fn new() -> ProfileTree {
        let mut tree = ProfileTree {
            nodes: Vec::new(),
            function_ids: FnvHashMap::default(),
            next_function_id: 1,
            pending_nodes: Vec::new(),
        };
        let root_entry = Arc::new(CodeEntry::new(CodeTag::Function, ROOT_ENTRY_NAME));
        tree.new_node(root_entry, None);
        tree
    }

    fn new_node(&mut self, entry: Arc<CodeEntry>, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len() as NodeId + 1;
        self.nodes.push(ProfileNode::new(id, entry, parent));
        self.pending_nodes.push(id);
        id
    }

    pub fn root(&self) -> &ProfileNode {
        self.node(Self::ROOT_ID)
    }

    /// Looks up a node by an id previously handed out by this tree.
    pub fn node(&self, id: NodeId) -> &ProfileNode {
        &self.nodes[(id - 1) as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut ProfileNode {
        &mut self.nodes[(id - 1) as usize]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The child of `parent` for `entry`, created on first sight.
    pub fn find_or_add_child(&mut self, parent: NodeId, entry: &Arc<CodeEntry>) -> NodeId {
        if let Some(child) = self.node(parent).find_child(entry) {
            return child;
        }
        let child = self.new_node(entry.clone(), Some(parent));
        let parent_node = self.node_mut(parent);
        parent_node.children.insert(entry_key(entry), child);
        parent_node.children_list.push(child);
        child
    }

    /// A stable small id per distinct code entry, assigned on first query.
    pub fn get_function_id(&mut self, node: NodeId) -> u32 {
        let key = entry_key(&self.node(node).entry);
        if let Some(&id) = self.function_ids.get(&key) {
            return id;
        }
        let id = self.next_function_id;
        self.next_function_id += 1;
        self.function_ids.insert(key, id);
        id
    }

    /// Inserts one symbolized stack, ordered leaf first, and returns the
    /// terminal node. Unsymbolized (`None`) frames are skipped; a path with
    /// nothing symbolized terminates at the root. When the leaf-most entry
    /// carries a pending deopt record, the terminal node consumes it.
    pub fn add_path_from_end(
        &mut self,
        path: &[Option<Arc<CodeEntry>>],
        src_line: u32,
        update_stats: bool,
    ) -> NodeId {
        let mut node = Self::ROOT_ID;
        let mut last_entry: Option<&Arc<CodeEntry>> = None;
        for entry in path.iter().rev().flatten() {
            last_entry = Some(entry);
            node = self.find_or_add_child(node, entry);
        }
        if let Some(entry) = last_entry {
            if entry.has_deopt_info() {
                self.node_mut(node).collect_deopt_info(entry);
            }
        }
        if update_stats {
            let terminal = self.node_mut(node);
            terminal.increment_self_ticks();
            if src_line != NO_LINE_NUMBER_INFO {
                terminal.increment_line_ticks(src_line);
            }
        }
        node
    }

    pub fn pending_nodes_count(&self) -> usize {
        self.pending_nodes.len()
    }

    /// Drains the nodes created since the last drain, in creation order, so
    /// a streamed chunk always defines a node before anything references it.
    pub fn take_pending_nodes(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.pending_nodes)
    }

    /// Depth-first post-order walk without native-stack recursion; observed
    /// stacks can be deep enough to make recursion a real liability.
    pub fn traverse_depth_first<V: TreeVisitor>(&self, visitor: &mut V) {
        let mut stack = vec![TraversalPosition {
            node: Self::ROOT_ID,
            child_idx: 0,
        }];
        while let Some(top) = stack.last() {
            let current = self.node(top.node);
            if let Some(&child) = current.children_list.get(top.child_idx) {
                visitor.before_traversing_child(current, self.node(child));
                stack.push(TraversalPosition {
                    node: child,
                    child_idx: 0,
                });
            } else {
                visitor.after_all_children_traversed(current);
                let finished = top.node;
                stack.pop();
                if let Some(parent_pos) = stack.last_mut() {
                    parent_pos.child_idx += 1;
                    let parent = parent_pos.node;
                    visitor.after_child_traversed(self.node(parent), self.node(finished));
                }
            }
        }
    }

    /// Dumps the tree top-down for debugging: self ticks, entry, script id,
    /// node id, plus any deopt records collected on the node.
    pub fn write(&self, w: &mut dyn Write) -> io::Result<()> {
        let mut visitor = WriteVisitor {
            w,
            depth: 1,
            result: Ok(()),
        };
        visitor.print_node(self.root(), 0);
        self.traverse_depth_first(&mut visitor);
        visitor.result
    }
}

impl Default for ProfileTree {
    fn default() -> ProfileTree {
        ProfileTree::new()
    }
}

struct WriteVisitor<'a> {
    w: &'a mut dyn Write,
    depth: usize,
    result: io::Result<()>,
}

impl<'a> WriteVisitor<'a> {
    fn print_node(&mut self, node: &ProfileNode, depth: usize) {
        if self.result.is_err() {
            return;
        }
        self.result = self.try_print_node(node, depth);
    }

    fn try_print_node(&mut self, node: &ProfileNode, depth: usize) -> io::Result<()> {
        let entry = node.entry();
        write!(
            self.w,
            "{:5} {:indent$}{} {} #{}",
            node.self_ticks(),
            "",
            entry,
            entry.script_id(),
            node.id(),
            indent = depth * 2
        )?;
        if !entry.resource_name().is_empty() {
            write!(self.w, " {}:{}", entry.resource_name(), entry.line_number())?;
        }
        writeln!(self.w)?;
        for info in node.deopt_infos() {
            writeln!(
                self.w,
                "      {:indent$};;; deopted at script_id {} position {} with reason '{}'",
                "",
                info.stack[0].script_id,
                info.stack[0].position,
                info.deopt_reason,
                indent = depth * 2
            )?;
        }
        let bailout = entry.bailout_reason();
        if !bailout.is_empty() && bailout != BAILOUT_NO_REASON {
            writeln!(
                self.w,
                "      {:indent$}bailed out due to '{}'",
                "",
                bailout,
                indent = depth * 2
            )?;
        }
        Ok(())
    }
}

impl<'a> TreeVisitor for WriteVisitor<'a> {
    fn before_traversing_child(&mut self, _parent: &ProfileNode, child: &ProfileNode) {
        let depth = self.depth;
        self.print_node(child, depth);
        self.depth += 1;
    }

    fn after_child_traversed(&mut self, _parent: &ProfileNode, _child: &ProfileNode) {
        self.depth -= 1;
    }
}
