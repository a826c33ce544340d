use std::collections::BTreeMap;
use std::io;
use std::io::Write;
use std::sync::Arc;

use crate::core::code_entry::CodeEntry;
use crate::core::types::Address;

#[derive(Debug, Clone)]
struct CodeEntryInfo {
    entry: Arc<CodeEntry>,
    size: u32,
}

/// Best-known layout of the runtime's generated code: a sorted map from
/// range start to entry, with live ranges kept disjoint.
///
/// The map is a cache, not a source of truth: operations on addresses it
/// has never heard of silently do nothing, and installing a range evicts
/// whatever it overlaps.
#[derive(Debug, Default)]
pub struct CodeMap {
    code_map: BTreeMap<Address, CodeEntryInfo>,
}

impl CodeMap {
    pub fn new() -> CodeMap {
        CodeMap::default()
    }

    /// Installs `entry` at `[addr, addr + size)`, evicting every range the
    /// new one overlaps.
    pub fn add_code(&mut self, addr: Address, entry: Arc<CodeEntry>, size: u32) {
        self.delete_all_covered_code(addr, addr + Address::from(size));
        self.code_map.insert(addr, CodeEntryInfo { entry, size });
    }

    fn delete_all_covered_code(&mut self, start: Address, end: Address) {
        let mut covered: Vec<Address> = Vec::new();
        if let Some((&addr, info)) = self.code_map.range(..start).next_back() {
            if addr + Address::from(info.size) > start {
                covered.push(addr);
            }
        }
        covered.extend(self.code_map.range(start..end).map(|(&addr, _)| addr));
        for addr in covered {
            self.code_map.remove(&addr);
        }
    }

    /// The entry whose range contains `addr`, if any.
    pub fn find_entry(&self, addr: Address) -> Option<Arc<CodeEntry>> {
        let (&start, info) = self.code_map.range(..=addr).next_back()?;
        if addr < start + Address::from(info.size) {
            Some(info.entry.clone())
        } else {
            None
        }
    }

    /// Relocates the range starting at `from`. A move of an unknown range
    /// is a no-op; the destination evicts overlaps like any insertion.
    pub fn move_code(&mut self, from: Address, to: Address) {
        if from == to {
            return;
        }
        let info = match self.code_map.remove(&from) {
            Some(info) => info,
            None => return,
        };
        self.add_code(to, info.entry, info.size);
    }

    pub fn len(&self) -> usize {
        self.code_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code_map.is_empty()
    }

    /// Dumps the live ranges for debugging.
    pub fn write(&self, w: &mut dyn Write) -> io::Result<()> {
        for (addr, info) in &self.code_map {
            writeln!(w, "{:#x} {:5} {}", addr, info.size, info.entry)?;
        }
        Ok(())
    }
}
