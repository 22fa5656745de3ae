use crate::isa::isa::{Opcode, RegisterType, WordType};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Stage {
    Issue,
    Execute,
    WriteResult,
    Commit,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Destination {
    None,
    // unified register id (integer 0..31, floating 32..63)
    Register(RegisterType),
    // the instruction drains to data memory during write-result
    Store,
}

// One in-flight instruction. An entry is busy iff it has a program counter.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RobEntry {
    pub(crate) index: usize,
    pub(crate) pc: Option<u32>,
    pub(crate) ready: bool,
    pub(crate) stage: Stage,
    pub(crate) opcode: Opcode,
    pub(crate) destination: Destination,
    pub(crate) value: Option<WordType>,
    // cycle stamps feeding the timing log
    pub(crate) issued_at: Option<u64>,
    pub(crate) executed_at: Option<u64>,
    pub(crate) written_at: Option<u64>,
    pub(crate) committed_at: Option<u64>,
}

impl RobEntry {
    fn new(index: usize) -> RobEntry {
        RobEntry {
            index,
            pc: None,
            ready: false,
            stage: Stage::Issue,
            opcode: Opcode::EOP,
            destination: Destination::None,
            value: None,
            issued_at: None,
            executed_at: None,
            written_at: None,
            committed_at: None,
        }
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.pc.is_some()
    }

    pub(crate) fn reset(&mut self) {
        let index = self.index;
        *self = RobEntry::new(index);
    }
}

/// The reorder buffer. Entries are handed out ring style by a cursor, so the
/// physical slot order is allocation order, not program order; the oldest
/// in-flight instruction is found by scanning for the smallest live pc.
pub(crate) struct ROB {
    cursor: usize,
    entries: Vec<RobEntry>,
}

impl ROB {
    pub(crate) fn new(capacity: usize) -> ROB {
        let entries = (0..capacity).map(RobEntry::new).collect();
        ROB { cursor: 0, entries }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get(&self, index: usize) -> &RobEntry {
        &self.entries[index]
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> &mut RobEntry {
        &mut self.entries[index]
    }

    pub(crate) fn entries(&self) -> &[RobEntry] {
        &self.entries
    }

    pub(crate) fn size(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_busy()).count()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.iter().all(|entry| !entry.is_busy())
    }

    pub(crate) fn has_space(&self) -> bool {
        self.entries.iter().any(|entry| !entry.is_busy())
    }

    // Returns a free slot, searching onward from the last allocation. The
    // caller must install the instruction before allocating again.
    pub(crate) fn allocate(&mut self) -> Option<usize> {
        for k in 0..self.entries.len() {
            let index = (self.cursor + k) % self.entries.len();
            if !self.entries[index].is_busy() {
                self.cursor = index;
                return Some(index);
            }
        }
        None
    }

    // The in-order oldest candidate: the busy entry with the smallest live
    // pc. In-flight pcs are unique, so there are no ties.
    pub(crate) fn oldest(&self) -> Option<usize> {
        self.entries
            .iter()
            .filter(|entry| entry.is_busy())
            .min_by_key(|entry| entry.pc)
            .map(|entry| entry.index)
    }

    pub(crate) fn flush(&mut self) {
        for entry in &mut self.entries {
            entry.reset();
        }
        self.cursor = 0;
    }

    pub(crate) fn sweep_ready(&mut self) {
        for entry in &mut self.entries {
            if entry.is_busy() && entry.value.is_some() {
                entry.ready = true;
            }
        }
    }
}
