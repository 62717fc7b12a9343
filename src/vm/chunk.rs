use super::ops::OpCode;
use super::value::Value;

/// Maximum number of constants addressable by a 1-byte operand.
pub const MAX_CONSTANTS: usize = u8::MAX as usize + 1;

/// A compiled chunk of bytecode.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    /// Opcodes and their operand bytes
    pub code: Vec<u8>,
    /// Source line of each byte in `code`
    pub lines: Vec<usize>,
    /// Constant pool
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, byte: u8, line: usize) {
        self.code.push(byte);
        self.lines.push(line);
    }

    pub fn write_op(&mut self, op: OpCode, line: usize) {
        self.write(op as u8, line);
    }

    /// Append a constant unconditionally and return its index.
    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Return the index of an equal constant already in the pool, or append it.
    ///
    /// Numbers compare by bit pattern, so `0` and `-0` stay distinct and every
    /// NaN literal shares one slot. Objects compare by identity, which for
    /// interned strings is content equality.
    pub fn intern_constant(&mut self, value: Value) -> usize {
        let existing = self.constants.iter().position(|c| match (c, &value) {
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::Obj(a), Value::Obj(b)) => a == b,
            _ => false,
        });
        match existing {
            Some(index) => index,
            None => self.add_constant(value),
        }
    }

    /// Source line for the byte at `offset`.
    pub fn line(&self, offset: usize) -> usize {
        self.lines.get(offset).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::GcRef;

    #[test]
    fn test_write_tracks_lines() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Nil, 1);
        chunk.write_op(OpCode::Return, 2);
        assert_eq!(chunk.code, vec![OpCode::Nil as u8, OpCode::Return as u8]);
        assert_eq!(chunk.lines, vec![1, 2]);
        assert_eq!(chunk.line(1), 2);
    }

    #[test]
    fn test_number_constants_dedup() {
        let mut chunk = Chunk::new();
        let a = chunk.intern_constant(Value::Number(1.0));
        let b = chunk.intern_constant(Value::Number(2.0));
        let c = chunk.intern_constant(Value::Number(1.0));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(chunk.constants.len(), 2);
    }

    #[test]
    fn test_signed_zero_kept_apart() {
        let mut chunk = Chunk::new();
        let a = chunk.intern_constant(Value::Number(0.0));
        let b = chunk.intern_constant(Value::Number(-0.0));
        assert_ne!(a, b);
    }

    #[test]
    fn test_object_constants_dedup_by_identity() {
        let mut chunk = Chunk::new();
        let a = chunk.intern_constant(Value::Obj(GcRef::from_index(3)));
        let b = chunk.intern_constant(Value::Obj(GcRef::from_index(3)));
        let c = chunk.add_constant(Value::Obj(GcRef::from_index(3)));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
