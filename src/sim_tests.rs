use std::rc::Rc;

use crate::engine::reorder_buffer::Stage;
use crate::isa::isa::Opcode;
use crate::sim::{Sim, SimConfig};

#[cfg(test)]
mod tests {
    use crate::loader::loader::{load_from_string, LoadError};

    use super::*;

    #[test]
    fn test_independent_adds_dual_issue() {
        let src = "\
ADDI R1 R0 5
ADDI R2 R0 7
EOP
";
        let mut harness = TestHarness::default();
        harness.run(src);

        harness.assert_int_reg(1, 5);
        harness.assert_int_reg(2, 7);
        assert_eq!(harness.sim.retired_count(), 2);

        // both issue together, execute the next cycle, write the cycle
        // after, and commit in program order on consecutive cycles
        let log = harness.sim.retirement_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].issued_at, Some(0));
        assert_eq!(log[1].issued_at, Some(0));
        assert_eq!(log[0].executed_at, Some(1));
        assert_eq!(log[1].executed_at, Some(1));
        assert_eq!(log[0].written_at, Some(2));
        assert_eq!(log[1].written_at, Some(2));
        assert_eq!(log[0].committed_at, Some(3));
        assert_eq!(log[1].committed_at, Some(4));
        assert!(log[0].pc < log[1].pc);
        harness.assert_pipeline_empty();
    }

    #[test]
    fn test_load_feeds_dependent_add() {
        let src = "\
LW R1 0(R2)
ADD R3 R1 R1
EOP
";
        let mut harness = TestHarness::default();
        harness.sim.write_word(64, 42);
        harness.sim.set_int_register(2, 64);
        harness.load(src);

        // after the issue cycle the add is parked on the load's tag
        harness.sim.run(1);
        let add_rs = harness
            .sim
            .station_entries()
            .iter()
            .find(|rs| rs.is_busy() && rs.opcode == Opcode::ADD)
            .copied()
            .expect("the add should occupy a station");
        assert!(!add_rs.ready);
        assert!(add_rs.operand1.is_pending());
        assert!(add_rs.operand2.is_pending());
        let tag = add_rs.operand1.tag().unwrap();
        let producer = harness.sim.rob_entries()[tag];
        assert_eq!(producer.opcode, Opcode::LW);
        assert_eq!(producer.stage, Stage::Issue);
        assert!(producer.value.is_none());

        harness.sim.run(0);
        harness.assert_int_reg(1, 42);
        harness.assert_int_reg(3, 84);
        harness.assert_pipeline_empty();
    }

    #[test]
    fn test_taken_branch_flushes_pipeline() {
        let src = "\
ADDI R1 R0 1
BNEZ R1 skip
ADDI R2 R0 99
skip: ADDI R3 R0 7
EOP
";
        let mut harness = TestHarness::default();
        harness.load(src);

        // step to the flush and inspect the machine right after it
        for _ in 0..100 {
            harness.sim.run(1);
            if harness.sim.perf.borrow().pipeline_flush_cnt == 1 {
                break;
            }
        }
        assert_eq!(harness.sim.perf.borrow().pipeline_flush_cnt, 1);
        harness.assert_pipeline_empty();
        assert_eq!(harness.sim.engine.fetch_pc, 12);

        harness.sim.run(0);
        assert!(harness.sim.is_finished());
        harness.assert_int_reg(1, 1);
        harness.assert_int_reg(2, 0);
        harness.assert_int_reg(3, 7);
        assert_eq!(harness.sim.retired_count(), 3);
        assert_eq!(harness.sim.perf.borrow().branch_misprediction_cnt, 1);
        // the two wrong-path instructions were discarded by the flush
        assert_eq!(harness.sim.perf.borrow().bad_speculation_cnt, 2);

        // the stale path never retires: it shows up in the timing log
        // without a commit stamp
        let log = harness.sim.retirement_log();
        let committed: Vec<u32> =
            log.iter().filter(|entry| entry.committed_at.is_some()).map(|entry| entry.pc).collect();
        assert_eq!(committed, vec![0, 4, 12]);
        assert!(log.iter().any(|entry| entry.pc == 8 && entry.committed_at.is_none()));
    }

    #[test]
    fn test_load_station_backpressure() {
        let src = "\
LW R1 0(R0)
LW R2 4(R0)
LW R3 8(R0)
LW R4 12(R0)
EOP
";
        let mut config = SimConfig::default();
        config.load_rs_count = 1;
        let mut harness = TestHarness::with_config(config);
        for (word, value) in [(0, 10), (4, 20), (8, 30), (12, 40)] {
            harness.sim.write_word(word, value);
        }
        harness.load(src);

        for _ in 0..500 {
            harness.sim.run(1);
            harness.assert_invariants();
            if harness.sim.is_finished() {
                break;
            }
        }
        assert!(harness.sim.is_finished());

        // oversubscription stalls issue but never drops an instruction
        assert_eq!(harness.sim.retired_count(), 4);
        harness.assert_int_reg(1, 10);
        harness.assert_int_reg(2, 20);
        harness.assert_int_reg(3, 30);
        harness.assert_int_reg(4, 40);
    }

    #[test]
    fn test_never_reads_own_producer_slot() {
        let mut harness = TestHarness::default();
        harness.sim.set_int_register(1, 5);
        // point R1's alias entry at the ROB slot the next issue will get
        harness.sim.engine.rat.rename(1, 0, Opcode::ADD, 0xdead);
        harness.load("ADD R2 R1 R1\nEOP\n");

        // without the tie-break the add would wait on itself forever
        harness.sim.run(200);
        assert!(harness.sim.is_finished());
        harness.assert_int_reg(2, 10);
    }

    #[test]
    fn test_waw_renaming() {
        let src = "\
ADDI R1 R0 1
ADDI R1 R0 2
EOP
";
        let mut harness = TestHarness::default();
        harness.load(src);

        // after issue the alias table points at the younger producer
        harness.sim.run(1);
        assert_eq!(harness.sim.int_register_tag(1), Some(1));
        let rat_entry = harness.sim.engine.rat.get(1);
        assert_eq!(rat_entry.opcode, Some(Opcode::ADDI));
        assert_eq!(rat_entry.pc, Some(4));

        // the older commit must not clobber the younger renaming
        harness.sim.run(0);
        harness.assert_int_reg(1, 2);
        assert_eq!(harness.sim.int_register_tag(1), None);
    }

    #[test]
    fn test_accumulator_chain() {
        let src = "\
ADDI R1 R1 1
ADDI R1 R1 1
ADDI R1 R1 1
ADDI R1 R1 1
ADDI R1 R1 1
ADDI R1 R1 1
EOP
";
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_int_reg(1, 6);
    }

    #[test]
    fn test_store_then_load() {
        let src = "\
ADDI R1 R0 77
ADDI R2 R0 0x40
SW R1 0(R2)
LW R3 0(R2)
EOP
";
        let mut harness = TestHarness::default();
        harness.run(src);

        assert_eq!(harness.sim.read_word(0x40), 77);
        harness.assert_int_reg(3, 77);
        assert_eq!(harness.sim.retired_count(), 4);
    }

    #[test]
    fn test_fp_arithmetic() {
        let src = "\
ADDS F2 F1 F1
MULTS F3 F2 F1
SUBS F4 F3 F1
DIVS F5 F3 F2
EOP
";
        let mut harness = TestHarness::default();
        harness.sim.set_fp_register(1, 1.5);
        harness.load(src);
        harness.sim.run(0);

        harness.assert_fp_reg(2, 3.0);
        harness.assert_fp_reg(3, 4.5);
        harness.assert_fp_reg(4, 3.0);
        harness.assert_fp_reg(5, 1.5);
        assert_eq!(harness.sim.fp_register_tag(2), None);
        harness.assert_pipeline_empty();
    }

    #[test]
    fn test_countdown_loop() {
        let src = "\
ADDI R1 R0 3
loop: SUBI R1 R1 1
BNEZ R1 loop
EOP
";
        let mut harness = TestHarness::default();
        harness.run(src);

        harness.assert_int_reg(1, 0);
        // one ADDI plus three SUBI/BNEZ iterations retire
        assert_eq!(harness.sim.retired_count(), 7);
        let perf = harness.sim.perf.borrow();
        assert_eq!(perf.branch_misprediction_cnt, 2);
        assert_eq!(perf.branch_good_prediction_cnt, 1);
        assert_eq!(perf.pipeline_flush_cnt, 2);
    }

    #[test]
    fn test_jump_to_end() {
        let src = "\
ADDI R1 R0 1
JUMP end
ADDI R2 R0 9
end: EOP
";
        let mut harness = TestHarness::default();
        harness.run(src);

        assert!(harness.sim.is_finished());
        harness.assert_int_reg(1, 1);
        harness.assert_int_reg(2, 0);
        assert_eq!(harness.sim.retired_count(), 2);
    }

    #[test]
    fn test_int_alu_ops_retire_in_order() {
        let src = "\
ADDI R1 R0 12
ADDI R2 R0 10
XOR R3 R1 R2
AND R4 R1 R2
MULT R5 R1 R2
DIV R6 R1 R2
SUB R7 R1 R2
ADD R8 R1 R2
EOP
";
        let mut harness = TestHarness::default();
        harness.run(src);

        harness.assert_int_reg(3, 6);
        harness.assert_int_reg(4, 8);
        harness.assert_int_reg(5, 120);
        harness.assert_int_reg(6, 1);
        harness.assert_int_reg(7, 2);
        harness.assert_int_reg(8, 22);

        // committed program counters are strictly increasing
        let committed: Vec<u32> = harness
            .sim
            .retirement_log()
            .iter()
            .filter(|entry| entry.committed_at.is_some())
            .map(|entry| entry.pc)
            .collect();
        assert!(committed.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(committed.len(), 8);
    }

    #[test]
    fn test_cycle_budget() {
        let src = "\
ADDI R1 R0 5
EOP
";
        let mut harness = TestHarness::default();
        harness.load(src);
        harness.sim.run(3);

        assert_eq!(harness.sim.cycle_count(), 3);
        assert!(!harness.sim.is_finished());

        harness.sim.run(0);
        assert!(harness.sim.is_finished());
        harness.assert_int_reg(1, 5);
    }

    #[test]
    fn test_reset() {
        let src = "\
ADDI R1 R0 5
SW R1 4(R0)
EOP
";
        let mut harness = TestHarness::default();
        harness.run(src);
        harness.assert_int_reg(1, 5);
        assert_eq!(harness.sim.read_word(4), 5);

        harness.sim.reset();
        harness.assert_int_reg(1, 0);
        assert_eq!(harness.sim.cycle_count(), 0);
        assert_eq!(harness.sim.retired_count(), 0);
        assert_eq!(harness.sim.read_word(4), 0xFFFF_FFFF);
        harness.assert_pipeline_empty();

        // a fresh load runs the same program to the same result
        harness.run(src);
        harness.assert_int_reg(1, 5);
        assert_eq!(harness.sim.read_word(4), 5);
        assert!(harness.sim.is_finished());
    }

    #[test]
    fn test_loader_rejects_bad_source() {
        assert!(matches!(
            load_from_string("BOGUS R1 R2 R3\nEOP\n", 0),
            Err(LoadError::SyntaxError { line: 1, .. })
        ));
        assert!(matches!(
            load_from_string("ADD R1 R2\nEOP\n", 0),
            Err(LoadError::SyntaxError { line: 1, .. })
        ));
        assert!(matches!(
            load_from_string("ADD R1 R2 F3\nEOP\n", 0),
            Err(LoadError::SyntaxError { line: 1, .. })
        ));
        assert!(matches!(
            load_from_string("BNEZ R1 nowhere\nEOP\n", 0),
            Err(LoadError::UndefinedLabel { line: 1, .. })
        ));
        assert!(matches!(
            load_from_string("ADD R1 R2 R99\nEOP\n", 0),
            Err(LoadError::SyntaxError { line: 1, .. })
        ));
    }

    #[test]
    fn test_loader_resolves_labels() {
        let src = "\
loop: ADDI R1 R1 1
BNEZ R1 loop
LWS F2 8(R3)
SWS F2 0x10(R4)
JUMP loop
EOP
";
        let program = load_from_string(src, 0x400).expect("program must parse");
        assert_eq!(program.len(), 6);

        // backward branch: pc-relative byte offsets against pc + 4
        assert_eq!(program.code[1].imm, Some((-8i32) as u32));
        assert_eq!(program.code[4].imm, Some((-20i32) as u32));

        // floating registers are folded into the upper register space
        assert_eq!(program.code[2].dest, Some(34));
        assert_eq!(program.code[2].src1, Some(3));
        assert_eq!(program.code[2].imm, Some(8));
        assert_eq!(program.code[3].src1, Some(34));
        assert_eq!(program.code[3].src2, Some(4));
        assert_eq!(program.code[3].imm, Some(0x10));

        // fetch honors the base address and parks past the end
        assert_eq!(program.fetch(0x400).opcode, Opcode::ADDI);
        assert_eq!(program.fetch(0x400 + 24).opcode, Opcode::EOP);
    }

    struct TestHarness {
        sim: Sim,
    }

    impl TestHarness {
        fn default() -> TestHarness {
            TestHarness::with_config(SimConfig::default())
        }

        fn with_config(config: SimConfig) -> TestHarness {
            TestHarness { sim: Sim::new(&config) }
        }

        fn load(&mut self, src: &str) {
            let program = Rc::new(load_from_string(src, 0).expect("program must parse"));
            self.sim.load(&program);
        }

        fn run(&mut self, src: &str) {
            self.load(src);
            self.sim.run(0);
        }

        fn assert_int_reg(&self, reg: u8, value: i32) {
            assert_eq!(self.sim.get_int_register(reg), value, "unexpected value in R{}", reg);
        }

        fn assert_fp_reg(&self, reg: u8, value: f32) {
            assert_eq!(self.sim.get_fp_register(reg), value, "unexpected value in F{}", reg);
        }

        fn assert_pipeline_empty(&self) {
            assert!(self.sim.rob_entries().iter().all(|entry| !entry.is_busy()));
            assert!(self.sim.station_entries().iter().all(|rs| !rs.is_busy()));
            assert!(self.sim.unit_entries().iter().all(|unit| !unit.in_use));
            for reg in 0..64u8 {
                assert_eq!(self.sim.engine.rat.get(reg).tag, None);
            }
        }

        fn assert_invariants(&self) {
            // no two busy ROB entries share a program counter, and the
            // number in flight never exceeds the configured depth
            let mut pcs: Vec<u32> = self.sim.rob_entries().iter().filter_map(|entry| entry.pc).collect();
            assert!(pcs.len() <= self.sim.engine.rob.capacity());
            pcs.sort_unstable();
            for pair in pcs.windows(2) {
                assert_ne!(pair[0], pair[1], "duplicate in-flight pc");
            }

            // no two units service the same reservation station
            let mut stations: Vec<usize> = Vec::new();
            for unit in self.sim.unit_entries() {
                if unit.in_use {
                    assert!(unit.pc.is_some());
                    stations.push(unit.rs_index.unwrap());
                }
            }
            stations.sort_unstable();
            for pair in stations.windows(2) {
                assert_ne!(pair[0], pair[1], "two units share a station");
            }

            // a pending tag always names a busy producer that has not yet
            // broadcast
            for rs in self.sim.station_entries() {
                if !rs.is_busy() {
                    continue;
                }
                for operand in [rs.operand1, rs.operand2] {
                    if let Some(tag) = operand.tag() {
                        let producer = &self.sim.rob_entries()[tag];
                        assert!(producer.is_busy(), "tag names a free ROB slot");
                        assert!(producer.value.is_none(), "tag outlived its broadcast");
                    }
                }
            }
        }
    }
}
