use std::fmt;

use serde::Deserialize;

pub(crate) type RegisterType = u8;
pub(crate) type WordType = u32;
pub(crate) type RobTag = usize;

// architectural registers: R0..R31 occupy ids 0..31, F0..F31 occupy 32..63.
pub(crate) const GP_REG_COUNT: u8 = 32;
pub(crate) const ARCH_REG_COUNT: u8 = 64;

pub(crate) const INSTR_WIDTH: u32 = 4;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Opcode {
    LW,
    SW,
    ADD,
    ADDI,
    SUB,
    SUBI,
    XOR,
    AND,
    MULT,
    DIV,
    BEQZ,
    BNEZ,
    BLTZ,
    BGTZ,
    BLEZ,
    BGEZ,
    JUMP,
    EOP,
    LWS,
    SWS,
    ADDS,
    SUBS,
    MULTS,
    DIVS,
}

/// The class of reservation station and functional unit an opcode is
/// scheduled on. Branches share the integer unit, loads and stores share the
/// memory unit, and multiply/divide (integer and floating) share one unit
/// class. This mapping is the resource sharing policy of the machine.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub(crate) enum UnitClass {
    Integer,
    Memory,
    Adder,
    MulDiv,
}

impl UnitClass {
    pub(crate) fn mnemonic(self) -> &'static str {
        match self {
            UnitClass::Integer => "Int",
            UnitClass::Memory => "Load",
            UnitClass::Adder => "Add",
            UnitClass::MulDiv => "Mult",
        }
    }
}

impl Opcode {
    pub(crate) fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::BEQZ
                | Opcode::BNEZ
                | Opcode::BLTZ
                | Opcode::BGTZ
                | Opcode::BLEZ
                | Opcode::BGEZ
                | Opcode::JUMP
        )
    }

    pub(crate) fn is_load(self) -> bool {
        matches!(self, Opcode::LW | Opcode::LWS)
    }

    pub(crate) fn is_store(self) -> bool {
        matches!(self, Opcode::SW | Opcode::SWS)
    }

    pub(crate) fn is_memory(self) -> bool {
        self.is_load() || self.is_store()
    }

    pub(crate) fn is_int_r(self) -> bool {
        matches!(
            self,
            Opcode::ADD | Opcode::SUB | Opcode::XOR | Opcode::AND | Opcode::MULT | Opcode::DIV
        )
    }

    pub(crate) fn is_int_imm(self) -> bool {
        matches!(self, Opcode::ADDI | Opcode::SUBI)
    }

    pub(crate) fn is_fp_alu(self) -> bool {
        matches!(self, Opcode::ADDS | Opcode::SUBS | Opcode::MULTS | Opcode::DIVS)
    }

    // true for every opcode that produces an architectural register value
    pub(crate) fn writes_register(self) -> bool {
        self.is_load() || self.is_int_r() || self.is_int_imm() || self.is_fp_alu()
    }

    pub(crate) fn unit_class(self) -> UnitClass {
        match self {
            Opcode::ADD
            | Opcode::ADDI
            | Opcode::SUB
            | Opcode::SUBI
            | Opcode::XOR
            | Opcode::AND
            | Opcode::BEQZ
            | Opcode::BNEZ
            | Opcode::BLTZ
            | Opcode::BGTZ
            | Opcode::BLEZ
            | Opcode::BGEZ
            | Opcode::JUMP => UnitClass::Integer,
            Opcode::LW | Opcode::SW | Opcode::LWS | Opcode::SWS => UnitClass::Memory,
            Opcode::ADDS | Opcode::SUBS => UnitClass::Adder,
            Opcode::MULT | Opcode::MULTS | Opcode::DIV | Opcode::DIVS => UnitClass::MulDiv,
            Opcode::EOP => panic!("EOP never enters the scheduler"),
        }
    }
}

pub(crate) fn mnemonic(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::LW => "LW",
        Opcode::SW => "SW",
        Opcode::ADD => "ADD",
        Opcode::ADDI => "ADDI",
        Opcode::SUB => "SUB",
        Opcode::SUBI => "SUBI",
        Opcode::XOR => "XOR",
        Opcode::AND => "AND",
        Opcode::MULT => "MULT",
        Opcode::DIV => "DIV",
        Opcode::BEQZ => "BEQZ",
        Opcode::BNEZ => "BNEZ",
        Opcode::BLTZ => "BLTZ",
        Opcode::BGTZ => "BGTZ",
        Opcode::BLEZ => "BLEZ",
        Opcode::BGEZ => "BGEZ",
        Opcode::JUMP => "JUMP",
        Opcode::EOP => "EOP",
        Opcode::LWS => "LWS",
        Opcode::SWS => "SWS",
        Opcode::ADDS => "ADDS",
        Opcode::SUBS => "SUBS",
        Opcode::MULTS => "MULTS",
        Opcode::DIVS => "DIVS",
    }
}

pub(crate) fn get_opcode(mnemonic: &str) -> Option<Opcode> {
    match mnemonic.to_uppercase().as_str() {
        "LW" => Some(Opcode::LW),
        "SW" => Some(Opcode::SW),
        "ADD" => Some(Opcode::ADD),
        "ADDI" => Some(Opcode::ADDI),
        "SUB" => Some(Opcode::SUB),
        "SUBI" => Some(Opcode::SUBI),
        "XOR" => Some(Opcode::XOR),
        "AND" => Some(Opcode::AND),
        "MULT" => Some(Opcode::MULT),
        "DIV" => Some(Opcode::DIV),
        "BEQZ" => Some(Opcode::BEQZ),
        "BNEZ" => Some(Opcode::BNEZ),
        "BLTZ" => Some(Opcode::BLTZ),
        "BGTZ" => Some(Opcode::BGTZ),
        "BLEZ" => Some(Opcode::BLEZ),
        "BGEZ" => Some(Opcode::BGEZ),
        "JUMP" => Some(Opcode::JUMP),
        "EOP" => Some(Opcode::EOP),
        "LWS" => Some(Opcode::LWS),
        "SWS" => Some(Opcode::SWS),
        "ADDS" => Some(Opcode::ADDS),
        "SUBS" => Some(Opcode::SUBS),
        "MULTS" => Some(Opcode::MULTS),
        "DIVS" => Some(Opcode::DIVS),
        _ => None,
    }
}

// A decoded instruction. The operand ids live in the unified 0..63 register
// space; the loader has already folded F-registers into the upper half and
// resolved branch labels into pc-relative byte offsets in `imm`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Instr {
    pub(crate) opcode: Opcode,
    pub(crate) dest: Option<RegisterType>,
    pub(crate) src1: Option<RegisterType>,
    pub(crate) src2: Option<RegisterType>,
    pub(crate) imm: Option<WordType>,
}

pub(crate) const EOP_INSTR: Instr = Instr {
    opcode: Opcode::EOP,
    dest: None,
    src1: None,
    src2: None,
    imm: None,
};

fn fmt_reg(f: &mut fmt::Formatter<'_>, reg: RegisterType) -> fmt::Result {
    if reg < GP_REG_COUNT {
        write!(f, " R{}", reg)
    } else {
        write!(f, " F{}", reg - GP_REG_COUNT)
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", mnemonic(self.opcode))?;

        if self.opcode.is_memory() {
            let reg = if self.opcode.is_load() { self.dest } else { self.src1 };
            if let Some(reg) = reg {
                fmt_reg(f, reg)?;
            }
            let base = if self.opcode.is_load() { self.src1 } else { self.src2 };
            if let (Some(imm), Some(base)) = (self.imm, base) {
                write!(f, " {}(R{})", imm, base)?;
            }
            return Ok(());
        }

        if let Some(dest) = self.dest {
            fmt_reg(f, dest)?;
        }
        if let Some(src1) = self.src1 {
            fmt_reg(f, src1)?;
        }
        if let Some(src2) = self.src2 {
            fmt_reg(f, src2)?;
        }
        if let Some(imm) = self.imm {
            write!(f, " {}", imm as i32)?;
        }
        Ok(())
    }
}

// The decoded instruction stream, indexed by (pc - base) / instruction width.
pub(crate) struct Program {
    pub(crate) code: Vec<Instr>,
    pub(crate) base_address: u32,
}

impl Program {
    // Fetching outside the loaded code yields the end-of-program marker.
    pub(crate) fn fetch(&self, pc: u32) -> Instr {
        let index = (pc.wrapping_sub(self.base_address) / INSTR_WIDTH) as usize;
        match self.code.get(index) {
            Some(instr) => *instr,
            None => EOP_INSTR,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.code.len()
    }
}
