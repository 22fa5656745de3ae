use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::engine::functional_unit::FuTable;
use crate::engine::register_alias_table::RAT;
use crate::engine::reorder_buffer::{Destination, RobEntry, Stage, ROB};
use crate::engine::reservation_station::{Operand, RsTable};
use crate::isa::isa::{Opcode, Program, RegisterType, RobTag, WordType, ARCH_REG_COUNT, INSTR_WIDTH};
use crate::memory::memory::DataMemory;
use crate::sim::{ArchRegFile, PerfCounters, SimConfig, Trace};

// One line of the execution timing log: the cycle at which the instruction
// passed each stage. A missing commit stamp marks a wrong-path instruction
// recorded at misprediction time.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LogEntry {
    pub(crate) pc: u32,
    pub(crate) opcode: Opcode,
    pub(crate) issued_at: Option<u64>,
    pub(crate) executed_at: Option<u64>,
    pub(crate) written_at: Option<u64>,
    pub(crate) committed_at: Option<u64>,
}

impl LogEntry {
    fn from_entry(entry: &RobEntry) -> LogEntry {
        LogEntry {
            pc: entry.pc.unwrap_or(0),
            opcode: entry.opcode,
            issued_at: entry.issued_at,
            executed_at: entry.executed_at,
            written_at: entry.written_at,
            committed_at: entry.committed_at,
        }
    }
}

/// The out-of-order execution core: reorder buffer, reservation stations,
/// functional units and register alias table, advanced one cycle at a time in
/// the fixed order issue, dispatch, unit tick, write-result, commit.
pub(crate) struct Engine {
    memory: Rc<RefCell<DataMemory>>,
    reg_file: Rc<RefCell<ArchRegFile>>,
    perf: Rc<RefCell<PerfCounters>>,
    pub(crate) rob: ROB,
    pub(crate) rs_table: RsTable,
    pub(crate) fu_table: FuTable,
    pub(crate) rat: RAT,
    issue_width: u8,
    trace: Trace,
    program: Option<Rc<Program>>,
    pub(crate) fetch_pc: u32,
    eop_pc: Option<u32>,
    pub(crate) finished: bool,
    retirement_log: Vec<LogEntry>,
}

impl Engine {
    pub(crate) fn new(
        config: &SimConfig,
        memory: Rc<RefCell<DataMemory>>,
        reg_file: Rc<RefCell<ArchRegFile>>,
        perf: Rc<RefCell<PerfCounters>>,
    ) -> Engine {
        Engine {
            memory,
            reg_file,
            perf,
            rob: ROB::new(config.rob_capacity),
            rs_table: RsTable::new(config),
            fu_table: FuTable::new(config),
            rat: RAT::new(ARCH_REG_COUNT),
            issue_width: config.issue_width,
            trace: config.trace.clone(),
            program: None,
            fetch_pc: 0,
            eop_pc: None,
            finished: false,
            retirement_log: Vec::new(),
        }
    }

    pub(crate) fn init(&mut self, program: &Rc<Program>) {
        self.fetch_pc = program.base_address;
        self.program = Some(Rc::clone(program));
        self.eop_pc = None;
        self.finished = false;
    }

    pub(crate) fn has_program(&self) -> bool {
        self.program.is_some()
    }

    pub(crate) fn retirement_log(&self) -> &[LogEntry] {
        &self.retirement_log
    }

    pub(crate) fn reset(&mut self) {
        self.rob.flush();
        self.rs_table.flush();
        self.fu_table.flush();
        self.rat.flush();
        self.retirement_log.clear();
        self.program = None;
        self.fetch_pc = 0;
        self.eop_pc = None;
        self.finished = false;
    }

    pub(crate) fn do_cycle(&mut self) {
        self.cycle_issue();
        self.cycle_dispatch();
        self.fu_table.tick();
        self.cycle_write_result();
        self.cycle_commit();
        // results written this cycle become eligible for commit next cycle
        self.rob.sweep_ready();

        if let Some(eop_pc) = self.eop_pc {
            if self.fetch_pc == eop_pc && self.rob.is_empty() {
                self.finished = true;
            }
        }
    }

    // Admits up to issue_width sequential instructions into the ROB and a
    // reservation station of the matching class, renaming sources on the way.
    fn cycle_issue(&mut self) {
        let program = match &self.program {
            Some(program) => Rc::clone(program),
            None => return,
        };
        let now = self.perf.borrow().cycle_cnt;

        for _ in 0..self.issue_width {
            let pc = self.fetch_pc;
            let instr = program.fetch(pc);

            if instr.opcode == Opcode::EOP {
                // fetch parks here; the marker itself never issues
                self.eop_pc = Some(pc);
                break;
            }

            let class = instr.opcode.unit_class();
            if !self.rob.has_space() || !self.rs_table.has_free(class) {
                // structural hazard: this instruction and everything behind
                // it retries next cycle from the same point in the stream
                break;
            }

            let rob_index = match self.rob.allocate() {
                Some(index) => index,
                None => break,
            };
            let rs_index = match self.rs_table.allocate(class) {
                Some(index) => index,
                None => break,
            };

            {
                let entry = self.rob.get_mut(rob_index);
                debug_assert!(!entry.is_busy());
                entry.pc = Some(pc);
                entry.ready = false;
                entry.stage = Stage::Issue;
                entry.opcode = instr.opcode;
                entry.value = None;
                entry.issued_at = Some(now);
                entry.destination = if instr.opcode.is_store() {
                    Destination::Store
                } else {
                    match instr.dest {
                        Some(dest) => Destination::Register(dest),
                        None => Destination::None,
                    }
                };
            }

            // sources see the alias table before this instruction renames
            // its own destination
            let operand1 = match instr.src1 {
                Some(reg) => self.resolve_source(reg, rob_index),
                None => Operand::Unused,
            };
            let operand2 = match instr.src2 {
                Some(reg) => self.resolve_source(reg, rob_index),
                None => Operand::Unused,
            };

            debug_assert!(instr.opcode.writes_register() == instr.dest.is_some());
            if let Some(dest) = instr.dest {
                self.rat.rename(dest, rob_index, instr.opcode, pc);
            }

            {
                let rs = self.rs_table.get_mut(rs_index);
                rs.pc = Some(pc);
                rs.opcode = instr.opcode;
                rs.operand1 = operand1;
                rs.operand2 = operand2;
                rs.destination = Some(rob_index);
                rs.imm = instr.imm;
                rs.address = None;
                rs.ready = false;
                rs.executing = false;
            }

            if self.trace.issue {
                println!("Issued [{}] pc={:#010x}", instr, pc);
            }
            self.perf.borrow_mut().issue_cnt += 1;
            self.fetch_pc = pc.wrapping_add(INSTR_WIDTH);
        }
    }

    // Resolves one source operand against the alias table. An instruction
    // never reads its own pending producer slot: if the table already points
    // at the slot just allocated for this instruction, the architectural
    // register wins.
    fn resolve_source(&self, reg: RegisterType, own_tag: RobTag) -> Operand {
        match self.rat.get(reg).tag {
            Some(tag) if tag == own_tag => Operand::Value(self.reg_file.borrow().get_raw(reg)),
            Some(tag) => {
                let producer = self.rob.get(tag);
                match (producer.ready, producer.value) {
                    // broadcast but not yet committed: take the stored value
                    (true, Some(value)) => Operand::Value(value),
                    _ => Operand::Tag(tag),
                }
            }
            None => Operand::Value(self.reg_file.borrow().get_raw(reg)),
        }
    }

    // Promotes ready, non-executing stations to a free functional unit of
    // their class.
    fn cycle_dispatch(&mut self) {
        let now = self.perf.borrow().cycle_cnt;

        for rs_index in 0..self.rs_table.capacity() {
            {
                let rs = self.rs_table.get_mut(rs_index);
                if !rs.is_busy() || rs.executing {
                    continue;
                }
                if !rs.ready {
                    // readiness is recomputed every cycle until dispatch
                    rs.ready = rs.operands_resolved();
                    continue;
                }
            }

            let class = self.rs_table.get(rs_index).class;
            let fu_index = match self.fu_table.allocate(class) {
                Some(index) => index,
                None => continue,
            };

            let (rob_index, pc) = {
                let rs = self.rs_table.get_mut(rs_index);
                rs.executing = true;
                // effective address: offset plus the base register value as
                // captured in the station
                if rs.opcode.is_load() {
                    rs.address = Some(rs.imm.unwrap_or(0).wrapping_add(rs.operand1.value()));
                } else if rs.opcode.is_store() {
                    rs.address = Some(rs.imm.unwrap_or(0).wrapping_add(rs.operand2.value()));
                }
                (rs.destination.unwrap(), rs.pc.unwrap())
            };

            {
                let fu = self.fu_table.get_mut(fu_index);
                debug_assert!(!fu.in_use && fu.busy == 0);
                fu.busy = fu.latency + 1;
                fu.pc = Some(pc);
                fu.rs_index = Some(rs_index);
                fu.in_use = true;
            }

            {
                let entry = self.rob.get_mut(rob_index);
                entry.stage = Stage::Execute;
                entry.executed_at = Some(now);
            }

            if self.trace.dispatch {
                println!("Dispatched pc={:#010x} to {:?} unit {}", pc, class, fu_index);
            }
            self.perf.borrow_mut().dispatch_cnt += 1;
        }
    }

    // Drains every unit whose countdown reached zero: compute or access
    // memory, broadcast on the CDB, free the station and the unit.
    fn cycle_write_result(&mut self) {
        let now = self.perf.borrow().cycle_cnt;

        for fu_index in 0..self.fu_table.capacity() {
            let (rs_index, pc) = {
                let fu = self.fu_table.get(fu_index);
                if !fu.in_use || fu.busy != 0 {
                    continue;
                }
                (fu.rs_index.unwrap(), fu.pc.unwrap())
            };

            let (rob_index, value) = {
                let rs = self.rs_table.get(rs_index);
                debug_assert!(rs.executing && rs.pc == Some(pc));
                let rob_index = rs.destination.unwrap();
                let value = if rs.opcode.is_load() {
                    self.memory.borrow().read_word(rs.address.unwrap())
                } else if rs.opcode.is_store() {
                    // the stored value drains to memory here; there is no
                    // register write-back at commit
                    let value = rs.operand1.value();
                    self.memory.borrow_mut().write_word(rs.address.unwrap(), value);
                    value
                } else {
                    alu(rs.opcode, rs.operand1.value_or(0), rs.operand2.value_or(0), rs.imm.unwrap_or(0), pc)
                };
                (rob_index, value)
            };

            // one broadcast per producing unit per cycle
            self.rs_table.capture(rob_index, value);
            {
                let entry = self.rob.get_mut(rob_index);
                entry.value = Some(value);
                entry.stage = Stage::WriteResult;
                entry.written_at = Some(now);
            }
            self.rs_table.get_mut(rs_index).reset();
            self.fu_table.get_mut(fu_index).reset();

            if self.trace.write_result {
                println!("Wrote pc={:#010x} value={:#010x}", pc, value);
            }
            self.perf.borrow_mut().wr_cnt += 1;
        }
    }

    // Retires the oldest in-flight instruction once its result has been
    // broadcast. A mispredicted branch discards everything younger and
    // redirects fetch.
    fn cycle_commit(&mut self) {
        let rob_index = match self.rob.oldest() {
            Some(index) => index,
            None => return,
        };
        let entry = *self.rob.get(rob_index);
        if !entry.ready {
            return;
        }
        let now = self.perf.borrow().cycle_cnt;
        let pc = entry.pc.unwrap();
        let value = match entry.value {
            Some(value) => value,
            None => return,
        };

        match entry.destination {
            Destination::Register(reg) => {
                self.reg_file.borrow_mut().set_raw(reg, value);
                self.rat.retire(reg, rob_index);
            }
            // stores went to memory at write-result; branches produce no
            // register value
            Destination::Store | Destination::None => {}
        }

        let mut mispredicted = false;
        if entry.opcode.is_branch() {
            let fall_through = pc.wrapping_add(INSTR_WIDTH);
            if value != fall_through {
                mispredicted = true;
                self.perf.borrow_mut().branch_misprediction_cnt += 1;
            } else {
                self.perf.borrow_mut().branch_good_prediction_cnt += 1;
            }
        }

        let log_entry = {
            let entry = self.rob.get_mut(rob_index);
            entry.stage = Stage::Commit;
            entry.committed_at = Some(now);
            LogEntry::from_entry(entry)
        };
        self.retirement_log.push(log_entry);
        self.perf.borrow_mut().retired_cnt += 1;
        if self.trace.commit {
            println!("Committed pc={:#010x} value={:#010x}", pc, value);
        }
        self.rob.get_mut(rob_index).reset();

        if mispredicted {
            self.log_wrong_path();
            self.flush();
            self.fetch_pc = value;
        }
    }

    // Everything still in flight is younger than the mispredicted branch;
    // record it in program order before the flush discards it.
    fn log_wrong_path(&mut self) {
        let mut stale: Vec<RobEntry> = self
            .rob
            .entries()
            .iter()
            .filter(|entry| entry.is_busy())
            .copied()
            .collect();
        stale.sort_by_key(|entry| entry.pc);
        for entry in stale {
            self.retirement_log.push(LogEntry::from_entry(&entry));
        }
    }

    fn flush(&mut self) {
        let discarded = self.rob.size();
        {
            let mut perf = self.perf.borrow_mut();
            perf.pipeline_flush_cnt += 1;
            perf.bad_speculation_cnt += discarded as u64;
        }
        debug!("misprediction flush: {} in-flight instructions discarded", discarded);
        if self.trace.flush {
            println!("Pipeline flush");
        }
        self.rob.flush();
        self.rs_table.flush();
        self.fu_table.flush();
        self.rat.flush();
    }
}

// The deterministic compute step for everything that is not a memory access.
// Integer arithmetic wraps; floating opcodes operate on the raw bits as IEEE
// f32; branches evaluate taken/not-taken against the pc-relative offset.
fn alu(opcode: Opcode, value1: WordType, value2: WordType, imm: WordType, pc: u32) -> WordType {
    match opcode {
        Opcode::ADD => value1.wrapping_add(value2),
        Opcode::ADDI => value1.wrapping_add(imm),
        Opcode::SUB => value1.wrapping_sub(value2),
        Opcode::SUBI => value1.wrapping_sub(imm),
        Opcode::XOR => value1 ^ value2,
        Opcode::AND => value1 & value2,
        Opcode::MULT => value1.wrapping_mul(value2),
        // division by zero inherits the host behavior
        Opcode::DIV => value1 / value2,
        Opcode::ADDS => (f32::from_bits(value1) + f32::from_bits(value2)).to_bits(),
        Opcode::SUBS => (f32::from_bits(value1) - f32::from_bits(value2)).to_bits(),
        Opcode::MULTS => (f32::from_bits(value1) * f32::from_bits(value2)).to_bits(),
        Opcode::DIVS => (f32::from_bits(value1) / f32::from_bits(value2)).to_bits(),
        Opcode::JUMP => pc.wrapping_add(INSTR_WIDTH).wrapping_add(imm),
        Opcode::BEQZ
        | Opcode::BNEZ
        | Opcode::BLTZ
        | Opcode::BGTZ
        | Opcode::BLEZ
        | Opcode::BGEZ => {
            let reg = value1 as i32;
            let taken = match opcode {
                Opcode::BEQZ => reg == 0,
                Opcode::BNEZ => reg != 0,
                Opcode::BLTZ => reg < 0,
                Opcode::BGTZ => reg > 0,
                Opcode::BLEZ => reg <= 0,
                Opcode::BGEZ => reg >= 0,
                _ => unreachable!(),
            };
            if taken {
                pc.wrapping_add(INSTR_WIDTH).wrapping_add(imm)
            } else {
                pc.wrapping_add(INSTR_WIDTH)
            }
        }
        Opcode::LW | Opcode::SW | Opcode::LWS | Opcode::SWS | Opcode::EOP => {
            unreachable!("{:?} is not an ALU operation", opcode)
        }
    }
}
