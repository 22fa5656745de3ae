use std::cell::RefCell;
use std::error::Error;
use std::fs::File;
use std::rc::Rc;

use serde::Deserialize;

use crate::engine::engine::{Engine, LogEntry};
use crate::engine::functional_unit::FnUnit;
use crate::engine::reorder_buffer::RobEntry;
use crate::engine::reservation_station::RsEntry;
use crate::isa::isa::{Program, RegisterType, RobTag, UnitClass, WordType, ARCH_REG_COUNT, GP_REG_COUNT};
use crate::memory::memory::DataMemory;

pub(crate) struct PerfCounters {
    pub(crate) issue_cnt: u64,
    pub(crate) dispatch_cnt: u64,
    pub(crate) wr_cnt: u64,
    pub(crate) retired_cnt: u64,
    pub(crate) cycle_cnt: u64,
    pub(crate) branch_misprediction_cnt: u64,
    pub(crate) branch_good_prediction_cnt: u64,
    pub(crate) pipeline_flush_cnt: u64,
    pub(crate) bad_speculation_cnt: u64,
}

impl PerfCounters {
    pub(crate) fn new() -> PerfCounters {
        PerfCounters {
            issue_cnt: 0,
            dispatch_cnt: 0,
            wr_cnt: 0,
            retired_cnt: 0,
            cycle_cnt: 0,
            branch_misprediction_cnt: 0,
            branch_good_prediction_cnt: 0,
            pipeline_flush_cnt: 0,
            bad_speculation_cnt: 0,
        }
    }

    fn reset(&mut self) {
        *self = PerfCounters::new();
    }
}

#[derive(Clone, Deserialize, Debug, Default)]
pub(crate) struct Trace {
    pub(crate) issue: bool,
    pub(crate) dispatch: bool,
    pub(crate) write_result: bool,
    pub(crate) commit: bool,
    pub(crate) flush: bool,
    pub(crate) cycle: bool,
}

// One functional unit class: how many instances exist and how many cycles
// each occupies per instruction.
#[derive(Clone, Copy, Deserialize, Debug)]
pub(crate) struct UnitDescriptor {
    pub(crate) class: UnitClass,
    pub(crate) count: usize,
    pub(crate) latency: u32,
}

#[derive(Clone, Deserialize, Debug)]
pub(crate) struct SimConfig {
    // the size of the data memory in bytes
    pub(crate) memory_size: u32,
    // the number of reorder buffer entries
    pub(crate) rob_capacity: usize,
    // the number of instructions admitted into scheduling per cycle
    pub(crate) issue_width: u8,
    // reservation stations per class
    pub(crate) int_rs_count: usize,
    pub(crate) load_rs_count: usize,
    pub(crate) add_rs_count: usize,
    pub(crate) mul_rs_count: usize,
    // the functional unit pool
    pub(crate) units: Vec<UnitDescriptor>,
    // if processing of a single instruction should be traced (printed)
    #[serde(default)]
    pub(crate) trace: Trace,
}

impl Default for SimConfig {
    fn default() -> SimConfig {
        SimConfig {
            memory_size: 1024,
            rob_capacity: 16,
            issue_width: 2,
            int_rs_count: 4,
            load_rs_count: 2,
            add_rs_count: 2,
            mul_rs_count: 2,
            units: vec![
                UnitDescriptor { class: UnitClass::Integer, count: 2, latency: 1 },
                UnitDescriptor { class: UnitClass::Memory, count: 1, latency: 2 },
                UnitDescriptor { class: UnitClass::Adder, count: 1, latency: 2 },
                UnitDescriptor { class: UnitClass::MulDiv, count: 1, latency: 4 },
            ],
            trace: Trace::default(),
        }
    }
}

pub(crate) fn load_sim_config(file_path: &str) -> Result<SimConfig, Box<dyn Error>> {
    let file = File::open(file_path)?;
    let config = serde_yaml::from_reader(file)?;
    Ok(config)
}

// The architectural register file: 64 raw 32 bit slots, integer registers in
// the lower half, floating registers (as IEEE bits) in the upper half.
pub(crate) struct ArchRegFile {
    entries: Vec<WordType>,
}

impl ArchRegFile {
    fn new(reg_count: u8) -> ArchRegFile {
        ArchRegFile { entries: vec![0; reg_count as usize] }
    }

    pub(crate) fn get_raw(&self, reg: RegisterType) -> WordType {
        self.entries[reg as usize]
    }

    pub(crate) fn set_raw(&mut self, reg: RegisterType, value: WordType) {
        self.entries[reg as usize] = value;
    }

    fn reset(&mut self) {
        self.entries.fill(0);
    }
}

/// A single simulation session. All counters and flags live here; nothing is
/// process wide, so sessions can be created, reset and rerun independently.
pub(crate) struct Sim {
    pub(crate) engine: Engine,
    pub(crate) memory: Rc<RefCell<DataMemory>>,
    pub(crate) reg_file: Rc<RefCell<ArchRegFile>>,
    pub(crate) perf: Rc<RefCell<PerfCounters>>,
    trace: Trace,
}

impl Sim {
    pub(crate) fn new(config: &SimConfig) -> Sim {
        let memory = Rc::new(RefCell::new(DataMemory::new(config.memory_size)));
        let reg_file = Rc::new(RefCell::new(ArchRegFile::new(ARCH_REG_COUNT)));
        let perf = Rc::new(RefCell::new(PerfCounters::new()));

        let engine = Engine::new(
            config,
            Rc::clone(&memory),
            Rc::clone(&reg_file),
            Rc::clone(&perf),
        );

        Sim {
            engine,
            memory,
            reg_file,
            perf,
            trace: config.trace.clone(),
        }
    }

    pub(crate) fn load(&mut self, program: &Rc<Program>) {
        self.engine.init(program);
    }

    /// Advances up to `cycles` ticks, or runs to completion when `cycles`
    /// is 0.
    pub(crate) fn run(&mut self, cycles: u64) {
        if !self.engine.has_program() {
            return;
        }
        let run_to_completion = cycles == 0;
        let mut remaining = cycles;

        while !self.engine.finished && (run_to_completion || remaining > 0) {
            self.engine.do_cycle();
            self.perf.borrow_mut().cycle_cnt += 1;
            if !run_to_completion {
                remaining -= 1;
            }

            if self.trace.cycle {
                let perf = self.perf.borrow();
                println!(
                    "[Cycle {}][Issued={}][Dispatched={}][Written={}][Retired={}][IPC={:.2}]",
                    perf.cycle_cnt,
                    perf.issue_cnt,
                    perf.dispatch_cnt,
                    perf.wr_cnt,
                    perf.retired_cnt,
                    perf.retired_cnt as f64 / perf.cycle_cnt as f64,
                );
            }
        }
    }

    // Reinitializes every structure, register and counter. The loaded
    // program is dropped; call `load` again before the next run.
    pub(crate) fn reset(&mut self) {
        self.engine.reset();
        self.memory.borrow_mut().reset();
        self.reg_file.borrow_mut().reset();
        self.perf.borrow_mut().reset();
    }

    pub(crate) fn get_int_register(&self, reg: u8) -> i32 {
        self.reg_file.borrow().get_raw(reg) as i32
    }

    pub(crate) fn set_int_register(&mut self, reg: u8, value: i32) {
        self.reg_file.borrow_mut().set_raw(reg, value as WordType);
    }

    pub(crate) fn get_fp_register(&self, reg: u8) -> f32 {
        f32::from_bits(self.reg_file.borrow().get_raw(reg + GP_REG_COUNT))
    }

    pub(crate) fn set_fp_register(&mut self, reg: u8, value: f32) {
        self.reg_file.borrow_mut().set_raw(reg + GP_REG_COUNT, value.to_bits());
    }

    // The ROB slot that will next produce this register, for introspection.
    pub(crate) fn int_register_tag(&self, reg: u8) -> Option<RobTag> {
        self.engine.rat.get(reg).tag
    }

    pub(crate) fn fp_register_tag(&self, reg: u8) -> Option<RobTag> {
        self.engine.rat.get(reg + GP_REG_COUNT).tag
    }

    pub(crate) fn read_word(&self, address: u32) -> WordType {
        self.memory.borrow().read_word(address)
    }

    pub(crate) fn write_word(&mut self, address: u32, value: WordType) {
        self.memory.borrow_mut().write_word(address, value);
    }

    pub(crate) fn retired_count(&self) -> u64 {
        self.perf.borrow().retired_cnt
    }

    pub(crate) fn cycle_count(&self) -> u64 {
        self.perf.borrow().cycle_cnt
    }

    pub(crate) fn ipc(&self) -> f64 {
        let perf = self.perf.borrow();
        if perf.cycle_cnt == 0 {
            return 0.0;
        }
        perf.retired_cnt as f64 / perf.cycle_cnt as f64
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.engine.finished
    }

    // structural introspection, for tracing and tests
    pub(crate) fn rob_entries(&self) -> &[RobEntry] {
        self.engine.rob.entries()
    }

    pub(crate) fn station_entries(&self) -> &[RsEntry] {
        self.engine.rs_table.entries()
    }

    pub(crate) fn unit_entries(&self) -> &[FnUnit] {
        self.engine.fu_table.units()
    }

    pub(crate) fn retirement_log(&self) -> &[LogEntry] {
        self.engine.retirement_log()
    }
}
