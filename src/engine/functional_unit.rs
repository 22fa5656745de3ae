use crate::isa::isa::UnitClass;
use crate::sim::SimConfig;

/// A single pipelined functional unit. `busy` counts down once per cycle; a
/// unit with `busy == 0` that is still `in_use` holds an undrained result and
/// cannot accept new work until write-result collects it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FnUnit {
    pub(crate) index: usize,
    pub(crate) class: UnitClass,
    pub(crate) latency: u32,
    pub(crate) busy: u32,
    pub(crate) pc: Option<u32>,
    pub(crate) rs_index: Option<usize>,
    pub(crate) in_use: bool,
}

impl FnUnit {
    pub(crate) fn reset(&mut self) {
        self.busy = 0;
        self.pc = None;
        self.rs_index = None;
        self.in_use = false;
    }
}

pub(crate) struct FuTable {
    units: Vec<FnUnit>,
}

impl FuTable {
    pub(crate) fn new(config: &SimConfig) -> FuTable {
        let mut units = Vec::new();
        for descriptor in &config.units {
            for _ in 0..descriptor.count {
                units.push(FnUnit {
                    index: units.len(),
                    class: descriptor.class,
                    latency: descriptor.latency,
                    busy: 0,
                    pc: None,
                    rs_index: None,
                    in_use: false,
                });
            }
        }
        FuTable { units }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.units.len()
    }

    pub(crate) fn get(&self, index: usize) -> &FnUnit {
        &self.units[index]
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> &mut FnUnit {
        &mut self.units[index]
    }

    pub(crate) fn units(&self) -> &[FnUnit] {
        &self.units
    }

    pub(crate) fn allocate(&mut self, class: UnitClass) -> Option<usize> {
        self.units
            .iter()
            .find(|unit| unit.class == class && !unit.in_use && unit.busy == 0)
            .map(|unit| unit.index)
    }

    // ages every busy unit by one cycle, including units dispatched this cycle
    pub(crate) fn tick(&mut self) {
        for unit in &mut self.units {
            if unit.busy > 0 {
                unit.busy -= 1;
            }
        }
    }

    pub(crate) fn flush(&mut self) {
        for unit in &mut self.units {
            unit.reset();
        }
    }
}
