/// Bytecode disassembler (luac -l style output).
use crate::opcode::{is_const, rk_index, Instruction, InstructionFormat, OpCode};
use crate::proto::Proto;
use crescent_core::string::StringInterner;
use crescent_core::value::Value;
use std::fmt::Write;

/// Disassemble a complete Proto tree into a human-readable string.
pub fn disassemble(proto: &Proto, strings: &StringInterner) -> String {
    let mut out = String::new();
    disassemble_proto(&mut out, proto, strings, 0);
    out
}

fn disassemble_proto(out: &mut String, proto: &Proto, strings: &StringInterner, level: usize) {
    let indent = "  ".repeat(level);

    writeln!(
        out,
        "{indent}function ({} params, {} slots, {} upvalues, {} constants, {} functions)",
        proto.num_params,
        proto.max_stack_size,
        proto.upvalues.len(),
        proto.consts.len(),
        proto.protos.len(),
    )
    .unwrap();

    for (pc, inst) in proto.code.iter().enumerate() {
        write!(out, "{indent}\t{}\t", pc + 1).unwrap();
        disasm_instruction(out, inst, proto, strings);
        writeln!(out).unwrap();
    }

    if !proto.consts.is_empty() {
        writeln!(out, "{indent}constants ({}):", proto.consts.len()).unwrap();
        for (i, k) in proto.consts.iter().enumerate() {
            write!(out, "{indent}\t{i}\t").unwrap();
            format_constant(out, k, strings);
            writeln!(out).unwrap();
        }
    }

    if !proto.locals.is_empty() {
        writeln!(out, "{indent}locals ({}):", proto.locals.len()).unwrap();
        for (i, local) in proto.locals.iter().enumerate() {
            writeln!(
                out,
                "{indent}\t{i}\t{}\tr{}",
                strings.display(local.name),
                local.reg
            )
            .unwrap();
        }
    }

    if !proto.upvalues.is_empty() {
        writeln!(out, "{indent}upvalues ({}):", proto.upvalues.len()).unwrap();
        for (i, up) in proto.upvalues.iter().enumerate() {
            writeln!(
                out,
                "{indent}\t{i}\t{}\t{}\t{}",
                strings.display(up.name),
                up.in_stack as u8,
                up.index
            )
            .unwrap();
        }
    }

    for (i, p) in proto.protos.iter().enumerate() {
        writeln!(out, "{indent}function [{i}]:").unwrap();
        disassemble_proto(out, p, strings, level + 1);
    }
}

/// Disassemble a single instruction into the output string.
pub fn disasm_instruction(
    out: &mut String,
    inst: &Instruction,
    proto: &Proto,
    strings: &StringInterner,
) {
    let op = inst.opcode();
    write!(out, "{:<12}", op.name()).unwrap();

    match op.format() {
        InstructionFormat::IABC => {
            write!(out, "{}", inst.a()).unwrap();
            for operand in [inst.b(), inst.c()] {
                if op.accepts_rk() && is_const(operand) {
                    write!(out, " K{}", rk_index(operand)).unwrap();
                } else {
                    write!(out, " {operand}").unwrap();
                }
            }
            // Annotate constant operands with their values.
            let mut annotated = false;
            for operand in [inst.b(), inst.c()] {
                if op.accepts_rk() && is_const(operand) {
                    let idx = rk_index(operand) as usize;
                    if idx < proto.consts.len() {
                        write!(out, "{}", if annotated { ", " } else { "\t; " }).unwrap();
                        format_constant(out, &proto.consts[idx], strings);
                        annotated = true;
                    }
                }
            }
        }
        InstructionFormat::IABx => {
            write!(out, "{} {}", inst.a(), inst.bx()).unwrap();
            if op == OpCode::LoadK {
                let idx = inst.bx() as usize;
                if idx < proto.consts.len() {
                    write!(out, "\t; ").unwrap();
                    format_constant(out, &proto.consts[idx], strings);
                }
            } else if op == OpCode::Closure {
                write!(out, "\t; function [{}]", inst.bx()).unwrap();
            }
        }
        InstructionFormat::IAsBx => {
            write!(out, "{} {}", inst.a(), inst.sbx()).unwrap();
        }
        InstructionFormat::IAx => {
            write!(out, "{}", inst.ax_field()).unwrap();
        }
    }
}

fn format_constant(out: &mut String, k: &Value, strings: &StringInterner) {
    match k {
        Value::Nil => write!(out, "nil").unwrap(),
        Value::Boolean(b) => write!(out, "{b}").unwrap(),
        Value::Number(n) => write!(out, "{n}").unwrap(),
        Value::Str(id) => write!(out, "\"{}\"", strings.display(*id)).unwrap(),
    }
}
