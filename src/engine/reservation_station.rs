use std::fmt;
use std::fmt::Display;

use crate::isa::isa::{mnemonic, Opcode, RobTag, UnitClass, WordType};
use crate::sim::SimConfig;

// A source operand slot: either a captured value or the ROB index of the
// producer whose broadcast is still outstanding.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Operand {
    Value(WordType),
    Tag(RobTag),
    Unused,
}

impl Operand {
    pub(crate) fn is_pending(&self) -> bool {
        matches!(self, Operand::Tag(_))
    }

    pub(crate) fn tag(&self) -> Option<RobTag> {
        match self {
            Operand::Tag(tag) => Some(*tag),
            _ => None,
        }
    }

    pub(crate) fn value(&self) -> WordType {
        match self {
            Operand::Value(value) => *value,
            _ => panic!("operand holds no value: {:?}", self),
        }
    }

    pub(crate) fn value_or(&self, default: WordType) -> WordType {
        match self {
            Operand::Value(value) => *value,
            _ => default,
        }
    }
}

// A single reservation station. Busy iff it holds a program counter.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RsEntry {
    pub(crate) index: usize,
    pub(crate) class: UnitClass,
    pub(crate) pc: Option<u32>,
    pub(crate) opcode: Opcode,
    pub(crate) operand1: Operand,
    pub(crate) operand2: Operand,
    // the ROB slot allocated to this instruction; doubles as the CDB tag
    pub(crate) destination: Option<RobTag>,
    pub(crate) imm: Option<WordType>,
    // effective address, filled in at dispatch for memory operations
    pub(crate) address: Option<WordType>,
    pub(crate) ready: bool,
    pub(crate) executing: bool,
}

impl RsEntry {
    fn new(index: usize, class: UnitClass) -> RsEntry {
        RsEntry {
            index,
            class,
            pc: None,
            opcode: Opcode::EOP,
            operand1: Operand::Unused,
            operand2: Operand::Unused,
            destination: None,
            imm: None,
            address: None,
            ready: false,
            executing: false,
        }
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.pc.is_some()
    }

    pub(crate) fn operands_resolved(&self) -> bool {
        !self.operand1.is_pending() && !self.operand2.is_pending()
    }

    pub(crate) fn reset(&mut self) {
        let (index, class) = (self.index, self.class);
        *self = RsEntry::new(index, class);
    }
}

impl Display for RsEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class.mnemonic(), self.index)?;
        if self.is_busy() {
            write!(f, " {} {:?} {:?}", mnemonic(self.opcode), self.operand1, self.operand2)?;
        }
        Ok(())
    }
}

/// All reservation stations of the machine, grouped by class. The per class
/// counts come from the configuration.
pub(crate) struct RsTable {
    entries: Vec<RsEntry>,
}

impl RsTable {
    pub(crate) fn new(config: &SimConfig) -> RsTable {
        let mut entries = Vec::new();
        let classes = [
            (UnitClass::Integer, config.int_rs_count),
            (UnitClass::Memory, config.load_rs_count),
            (UnitClass::Adder, config.add_rs_count),
            (UnitClass::MulDiv, config.mul_rs_count),
        ];
        for (class, count) in classes {
            for _ in 0..count {
                entries.push(RsEntry::new(entries.len(), class));
            }
        }
        RsTable { entries }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get(&self, index: usize) -> &RsEntry {
        &self.entries[index]
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> &mut RsEntry {
        &mut self.entries[index]
    }

    pub(crate) fn entries(&self) -> &[RsEntry] {
        &self.entries
    }

    pub(crate) fn has_free(&self, class: UnitClass) -> bool {
        self.entries.iter().any(|rs| rs.class == class && !rs.is_busy())
    }

    pub(crate) fn allocate(&mut self, class: UnitClass) -> Option<usize> {
        self.entries
            .iter()
            .find(|rs| rs.class == class && !rs.is_busy())
            .map(|rs| rs.index)
    }

    // CDB broadcast: every station waiting on this tag captures the value.
    pub(crate) fn capture(&mut self, tag: RobTag, value: WordType) {
        for rs in &mut self.entries {
            if !rs.is_busy() {
                continue;
            }
            if rs.operand1 == Operand::Tag(tag) {
                rs.operand1 = Operand::Value(value);
            }
            if rs.operand2 == Operand::Tag(tag) {
                rs.operand2 = Operand::Value(value);
            }
            if !rs.executing && rs.operands_resolved() {
                rs.ready = true;
            }
        }
    }

    pub(crate) fn flush(&mut self) {
        for rs in &mut self.entries {
            rs.reset();
        }
    }
}
