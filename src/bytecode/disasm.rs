use std::fmt::Write;

use crate::bytecode::CompiledUnit;
use crate::bytecode::emit::JUMP_SLOT_LEN;
use crate::bytecode::op::{Op, read_operand, unpack_kind};

/// Print disassembly of a compiled unit
pub fn print_unit(label: &str, unit: &CompiledUnit) {
    println!("════════════════════════════════════════");
    println!(" {}", label);
    println!(
        " {} bytes, {} x {} = {} input bytes",
        unit.code.len(),
        unit.iterations,
        unit.bytes_per_iteration,
        unit.block_size()
    );
    println!("════════════════════════════════════════");
    print!("{}", disassemble(&unit.code));
    println!();
}

/// One decoded line of output.
enum Line {
    Op { op: Op, operand: Option<u32> },
    Jump { target: usize },
    Invalid(u8),
}

/// Disassembles `code`, collapsing linked jump stubs into a single `JMP`
/// line that names its resolved target.
pub fn disassemble(code: &[u8]) -> String {
    let lines = decode(code);
    let targets = collect_jump_targets(&lines);
    let mut out = String::new();

    for (pc, line) in &lines {
        let marker = if targets.contains(pc) { "►" } else { " " };
        let _ = write!(out, "{:04} {} ", pc, marker);

        let _ = match line {
            Line::Jump { target } => {
                let direction = if target < pc { "↑" } else { "↓" };
                writeln!(out, "JMP?        {} (→ {:04})", direction, target)
            }
            Line::Op { op, operand } => write_op(&mut out, *op, *operand),
            Line::Invalid(byte) => writeln!(out, "??          0x{:02x}", byte),
        };
    }

    out
}

fn write_op(out: &mut String, op: Op, operand: Option<u32>) -> std::fmt::Result {
    match (op, operand) {
        (Op::CopyLiteral, Some(byte)) => {
            writeln!(out, "{:<11} {:?}", op.mnemonic(), char::from(byte as u8))
        }
        (Op::PushImm8 | Op::PushImm16 | Op::PushImm32, Some(value)) => {
            writeln!(out, "{:<11} {}", op.mnemonic(), value)
        }
        (Op::Render, _) => writeln!(out, "CONV        ; ( word flags prec width kind -- )"),
        (Op::ReadBytes, _) => writeln!(out, "READ        ; ( n -- word )"),
        (Op::TrimTrailing, _) => writeln!(out, "TRIM"),
        _ => writeln!(out, "{}", op.mnemonic()),
    }
}

fn decode(code: &[u8]) -> Vec<(usize, Line)> {
    let mut lines = Vec::new();
    let mut pc = 0;

    while pc < code.len() {
        if let Some(target) = link_stub_target(code, pc) {
            lines.push((pc, Line::Jump { target }));
            pc += JUMP_SLOT_LEN;
            continue;
        }

        match Op::from_byte(code[pc]) {
            Some(op) => {
                lines.push((
                    pc,
                    Line::Op {
                        op,
                        operand: read_operand(code, pc, op),
                    },
                ));
                pc += op.width();
            }
            None => {
                lines.push((pc, Line::Invalid(code[pc])));
                pc += 1;
            }
        }
    }

    lines
}

/// Recognises `PC I16 hi lo ADD|SUB JMP` at `pc` and returns the target.
pub fn link_stub_target(code: &[u8], pc: usize) -> Option<usize> {
    let stub = code.get(pc..pc + JUMP_SLOT_LEN)?;
    if stub[0] != Op::PushPc.byte() || stub[1] != Op::PushImm16.byte() {
        return None;
    }
    if stub[5] != Op::JumpIf.byte() {
        return None;
    }
    let distance = usize::from(u16::from_be_bytes([stub[2], stub[3]]));
    match Op::from_byte(stub[4])? {
        Op::Add => Some(pc + distance),
        Op::Subtract => pc.checked_sub(distance),
        _ => None,
    }
}

fn collect_jump_targets(lines: &[(usize, Line)]) -> Vec<usize> {
    let mut targets = Vec::new();

    for (_, line) in lines {
        if let Line::Jump { target } = line {
            if !targets.contains(target) {
                targets.push(*target);
            }
        }
    }

    targets
}

/// Describes the kind cell pushed right before `CONV`, for trace output.
pub fn describe_kind_cell(cell: i64) -> String {
    match unpack_kind(cell) {
        Some((kind, bytes)) => format!("%{}/{}", kind.token(), bytes),
        None => format!("<bad kind {}>", cell),
    }
}
