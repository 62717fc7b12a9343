//! Disassembly and instruction-level decoding of chunks.
//!
//! [`decode`] turns a chunk's code into [`Instruction`]s and [`encode`] turns
//! them back into bytes. Re-encoding a decoded chunk gives back the same
//! bytes.

use thiserror::Error;

use super::chunk::Chunk;
use super::heap::{GcRef, Heap};
use super::object::{Object, ObjectType};
use super::ops::OpCode;
use super::value::Value;

/// One captured variable in a `Closure` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueCapture {
    /// Captures a local slot of the enclosing frame (otherwise one of its upvalues).
    pub is_local: bool,
    pub index: u8,
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Opcode without operands.
    Simple(OpCode),
    /// Opcode with a single byte operand (constant index, slot, upvalue index or arg count).
    Byte(OpCode, u8),
    /// Jump or loop with a 16-bit offset.
    Jump(OpCode, u16),
    /// Invoke or super-invoke: method name constant, arg count.
    Invoke(OpCode, u8, u8),
    Closure {
        constant: u8,
        upvalues: Vec<UpvalueCapture>,
    },
}

impl Instruction {
    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Instruction::Simple(_) => 1,
            Instruction::Byte(_, _) => 2,
            Instruction::Jump(_, _) | Instruction::Invoke(_, _, _) => 3,
            Instruction::Closure { upvalues, .. } => 2 + 2 * upvalues.len(),
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Instruction::Simple(op) => out.push(*op as u8),
            Instruction::Byte(op, operand) => out.extend([*op as u8, *operand]),
            Instruction::Jump(op, offset) => {
                out.push(*op as u8);
                out.extend(offset.to_be_bytes());
            }
            Instruction::Invoke(op, name, argc) => out.extend([*op as u8, *name, *argc]),
            Instruction::Closure { constant, upvalues } => {
                out.extend([OpCode::Closure as u8, *constant]);
                for capture in upvalues {
                    out.extend([capture.is_local as u8, capture.index]);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode {byte} at offset {offset}")]
    UnknownOpcode { offset: usize, byte: u8 },
    #[error("truncated instruction at offset {offset}")]
    Truncated { offset: usize },
    #[error("closure at offset {offset} does not reference a function")]
    NotAFunction { offset: usize },
}

/// Decode the instruction at `offset`, returning it and the next offset.
pub fn decode_instruction(
    heap: &Heap,
    chunk: &Chunk,
    offset: usize,
) -> Result<(Instruction, usize), DecodeError> {
    let code = &chunk.code;
    let byte = *code.get(offset).ok_or(DecodeError::Truncated { offset })?;
    let op = OpCode::try_from(byte).map_err(|byte| DecodeError::UnknownOpcode { offset, byte })?;
    let operand = |i: usize| {
        code.get(offset + 1 + i)
            .copied()
            .ok_or(DecodeError::Truncated { offset })
    };

    let instruction = match op {
        OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => {
            Instruction::Jump(op, u16::from_be_bytes([operand(0)?, operand(1)?]))
        }
        OpCode::Invoke | OpCode::SuperInvoke => Instruction::Invoke(op, operand(0)?, operand(1)?),
        OpCode::Closure => {
            let constant = operand(0)?;
            let count = match chunk.constants.get(constant as usize) {
                Some(Value::Obj(r)) if heap.get(*r).map(Object::kind) == Some(ObjectType::Function) => {
                    heap.function(*r).upvalue_count
                }
                _ => return Err(DecodeError::NotAFunction { offset }),
            };
            let mut upvalues = Vec::with_capacity(count);
            for i in 0..count {
                upvalues.push(UpvalueCapture {
                    is_local: operand(1 + 2 * i)? != 0,
                    index: operand(2 + 2 * i)?,
                });
            }
            Instruction::Closure { constant, upvalues }
        }
        _ if op.operand_width() == 1 => Instruction::Byte(op, operand(0)?),
        _ => Instruction::Simple(op),
    };

    let next = offset + instruction.len();
    Ok((instruction, next))
}

/// Decode a whole chunk.
pub fn decode(heap: &Heap, chunk: &Chunk) -> Result<Vec<Instruction>, DecodeError> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < chunk.code.len() {
        let (instruction, next) = decode_instruction(heap, chunk, offset)?;
        instructions.push(instruction);
        offset = next;
    }
    Ok(instructions)
}

/// Encode instructions back into bytecode.
pub fn encode(instructions: &[Instruction]) -> Vec<u8> {
    let mut code = Vec::with_capacity(instructions.iter().map(Instruction::len).sum());
    for instruction in instructions {
        instruction.encode_into(&mut code);
    }
    code
}

// =============================================================================
// Disassembly
// =============================================================================

/// Disassemble a chunk under a `== name ==` header.
pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk, name: &str) -> String {
    let mut out = format!("== {} ==\n", name);
    let mut offset = 0;
    while offset < chunk.code.len() {
        let (text, next) = disassemble_instruction(heap, chunk, offset);
        out.push_str(&text);
        out.push('\n');
        offset = next;
    }
    out
}

/// Disassemble a function and every function nested in its constants.
pub fn disassemble_function(heap: &Heap, function: GcRef) -> String {
    let mut out = String::new();
    let mut pending = vec![function];
    while let Some(f) = pending.pop() {
        let func = heap.function(f);
        let name = match func.name {
            Some(name) => heap.str(name).to_string(),
            None => "<script>".to_string(),
        };
        out.push_str(&disassemble_chunk(heap, &func.chunk, &name));

        let nested = func.chunk.constants.iter().rev().filter_map(|c| match c {
            Value::Obj(r) if heap.kind(*r) == ObjectType::Function => Some(*r),
            _ => None,
        });
        pending.extend(nested);
    }
    out
}

/// Disassemble a single instruction, returning its text and the next offset.
pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: usize) -> (String, usize) {
    let line = chunk.line(offset);
    let prefix = if offset > 0 && line == chunk.line(offset - 1) {
        format!("{:04}    | ", offset)
    } else {
        format!("{:04} {:>4} ", offset, line)
    };

    let (instruction, next) = match decode_instruction(heap, chunk, offset) {
        Ok(decoded) => decoded,
        Err(e) => return (format!("{}<{}>", prefix, e), offset + 1),
    };

    let constant = |index: u8| match chunk.constants.get(index as usize) {
        Some(value) => heap.format_value(*value),
        None => "<invalid>".to_string(),
    };

    let body = match &instruction {
        Instruction::Simple(op) => op.name().to_string(),
        Instruction::Byte(op, operand) => match op {
            OpCode::Constant
            | OpCode::GetGlobal
            | OpCode::DefineGlobal
            | OpCode::SetGlobal
            | OpCode::GetProperty
            | OpCode::SetProperty
            | OpCode::GetSuper
            | OpCode::Class
            | OpCode::Method => {
                format!("{:<16} {:>4} '{}'", op.name(), operand, constant(*operand))
            }
            _ => format!("{:<16} {:>4}", op.name(), operand),
        },
        Instruction::Jump(op, jump) => {
            let after = offset + 3;
            let target = if *op == OpCode::Loop {
                after.saturating_sub(*jump as usize)
            } else {
                after + *jump as usize
            };
            format!("{:<16} {:>4} -> {}", op.name(), offset, target)
        }
        Instruction::Invoke(op, name, argc) => {
            format!("{:<16} ({} args) {:>4} '{}'", op.name(), argc, name, constant(*name))
        }
        Instruction::Closure { constant: index, upvalues } => {
            let mut text = format!("{:<16} {:>4} {}", OpCode::Closure.name(), index, constant(*index));
            let mut capture_offset = offset + 2;
            for capture in upvalues {
                text.push_str(&format!(
                    "\n{:04}      |                     {} {}",
                    capture_offset,
                    if capture.is_local { "local" } else { "upvalue" },
                    capture.index
                ));
                capture_offset += 2;
            }
            text
        }
    };

    (prefix + &body, next)
}
