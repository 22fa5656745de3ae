use std::collections::HashMap;
use std::fs;

use regex::Regex;
use thiserror::Error;

use crate::isa::isa::{get_opcode, Instr, Opcode, Program, RegisterType, GP_REG_COUNT, INSTR_WIDTH};

#[derive(Error, Debug)]
pub(crate) enum LoadError {
    #[error("can't read '{path}': {source}")]
    IOError { path: String, source: std::io::Error },
    #[error("line {line}: {msg}")]
    SyntaxError { line: usize, msg: String },
    #[error("line {line}: undefined label '{label}'")]
    UndefinedLabel { line: usize, label: String },
}

pub(crate) fn load(path: &str, base_address: u32) -> Result<Program, LoadError> {
    let src = fs::read_to_string(path).map_err(|source| LoadError::IOError {
        path: path.to_string(),
        source,
    })?;
    load_from_string(&src, base_address)
}

/// Parses MIPS flavored assembly into a decoded instruction array. Branch and
/// jump labels are resolved to pc-relative byte offsets, and floating
/// registers are folded into the upper half of the unified register space.
pub(crate) fn load_from_string(src: &str, base_address: u32) -> Result<Program, LoadError> {
    let int_reg = Regex::new(r"^R(\d+)$").unwrap();
    let fp_reg = Regex::new(r"^F(\d+)$").unwrap();
    let mem_operand = Regex::new(r"^(-?\w+)\((R\d+)\)$").unwrap();

    let parse_int_reg = |token: &str, line: usize| -> Result<RegisterType, LoadError> {
        let caps = int_reg.captures(token).ok_or_else(|| LoadError::SyntaxError {
            line,
            msg: format!("expected an integer register, got '{}'", token),
        })?;
        parse_reg_index(&caps[1], token, line)
    };
    let parse_fp_reg = |token: &str, line: usize| -> Result<RegisterType, LoadError> {
        let caps = fp_reg.captures(token).ok_or_else(|| LoadError::SyntaxError {
            line,
            msg: format!("expected a floating register, got '{}'", token),
        })?;
        Ok(parse_reg_index(&caps[1], token, line)? + GP_REG_COUNT)
    };
    // dest/source registers of loads and stores live in the space their
    // opcode operates on
    let parse_data_reg = |token: &str, fp: bool, line: usize| -> Result<RegisterType, LoadError> {
        if fp {
            parse_fp_reg(token, line)
        } else {
            parse_int_reg(token, line)
        }
    };

    let mut code: Vec<Instr> = Vec::new();
    let mut labels: HashMap<String, usize> = HashMap::new();
    // (instruction index, label, source line) left for the second pass
    let mut branch_refs: Vec<(usize, String, usize)> = Vec::new();

    for (line_index, raw_line) in src.lines().enumerate() {
        let line_no = line_index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        let mut tokens: Vec<&str> = line
            .split_whitespace()
            .map(|token| token.trim_end_matches(','))
            .collect();

        // an optional leading label, either on its own line or in front of
        // the instruction
        let first = tokens.first().copied().unwrap_or("");
        if let Some(label) = first.strip_suffix(':') {
            labels.insert(label.to_string(), code.len());
            tokens.remove(0);
            if tokens.is_empty() {
                continue;
            }
        }

        let opcode = get_opcode(tokens[0]).ok_or_else(|| LoadError::SyntaxError {
            line: line_no,
            msg: format!("invalid opcode '{}'", tokens[0]),
        })?;
        let operands = &tokens[1..];
        let index = code.len();

        let mut instr = Instr { opcode, dest: None, src1: None, src2: None, imm: None };

        if opcode.is_int_r() || opcode.is_fp_alu() {
            expect_operands(operands, 3, opcode, line_no)?;
            let fp = opcode.is_fp_alu();
            instr.dest = Some(parse_data_reg(operands[0], fp, line_no)?);
            instr.src1 = Some(parse_data_reg(operands[1], fp, line_no)?);
            instr.src2 = Some(parse_data_reg(operands[2], fp, line_no)?);
        } else if opcode.is_int_imm() {
            expect_operands(operands, 3, opcode, line_no)?;
            instr.dest = Some(parse_int_reg(operands[0], line_no)?);
            instr.src1 = Some(parse_int_reg(operands[1], line_no)?);
            instr.imm = Some(parse_literal(operands[2], line_no)?);
        } else if opcode.is_load() {
            // LW R1 8(R2)
            expect_operands(operands, 2, opcode, line_no)?;
            instr.dest = Some(parse_data_reg(operands[0], opcode == Opcode::LWS, line_no)?);
            let (offset, base) = parse_mem_operand(&mem_operand, operands[1], line_no)?;
            instr.imm = Some(offset);
            instr.src1 = Some(parse_int_reg(&base, line_no)?);
        } else if opcode.is_store() {
            // SW R1 8(R2): the stored value is src1, the base is src2
            expect_operands(operands, 2, opcode, line_no)?;
            instr.src1 = Some(parse_data_reg(operands[0], opcode == Opcode::SWS, line_no)?);
            let (offset, base) = parse_mem_operand(&mem_operand, operands[1], line_no)?;
            instr.imm = Some(offset);
            instr.src2 = Some(parse_int_reg(&base, line_no)?);
        } else if opcode == Opcode::JUMP {
            expect_operands(operands, 1, opcode, line_no)?;
            branch_refs.push((index, operands[0].to_string(), line_no));
        } else if opcode.is_branch() {
            expect_operands(operands, 2, opcode, line_no)?;
            instr.src1 = Some(parse_int_reg(operands[0], line_no)?);
            branch_refs.push((index, operands[1].to_string(), line_no));
        } else {
            // EOP
            expect_operands(operands, 0, opcode, line_no)?;
        }

        code.push(instr);
    }

    // resolve branch targets into pc-relative byte offsets
    for (index, label, line_no) in branch_refs {
        let target = *labels.get(&label).ok_or_else(|| LoadError::UndefinedLabel {
            line: line_no,
            label: label.clone(),
        })?;
        let offset = (target as i64 - index as i64 - 1) * INSTR_WIDTH as i64;
        code[index].imm = Some(offset as u32);
    }

    Ok(Program { code, base_address })
}

fn expect_operands(operands: &[&str], count: usize, opcode: Opcode, line: usize) -> Result<(), LoadError> {
    if operands.len() != count {
        return Err(LoadError::SyntaxError {
            line,
            msg: format!("{:?} expects {} operands, but {} are provided", opcode, count, operands.len()),
        });
    }
    Ok(())
}

fn parse_reg_index(digits: &str, token: &str, line: usize) -> Result<RegisterType, LoadError> {
    match digits.parse::<u8>() {
        Ok(reg) if reg < GP_REG_COUNT => Ok(reg),
        _ => Err(LoadError::SyntaxError {
            line,
            msg: format!("register '{}' is out of range", token),
        }),
    }
}

fn parse_mem_operand(pattern: &Regex, token: &str, line: usize) -> Result<(u32, String), LoadError> {
    let caps = pattern.captures(token).ok_or_else(|| LoadError::SyntaxError {
        line,
        msg: format!("expected offset(Rbase), got '{}'", token),
    })?;
    let offset = parse_literal(&caps[1], line)?;
    Ok((offset, caps[2].to_string()))
}

fn parse_literal(token: &str, line: usize) -> Result<u32, LoadError> {
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let parsed = match digits.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse::<i64>(),
    };
    match parsed {
        Ok(value) => {
            let value = if negative { -value } else { value };
            Ok(value as u32)
        }
        Err(_) => Err(LoadError::SyntaxError {
            line,
            msg: format!("invalid literal '{}'", token),
        }),
    }
}
