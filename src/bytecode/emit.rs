//! Append-only code buffer with PC-relative jump backpatching.
//!
//! The instruction set has no absolute jump. A control-flow edge is emitted
//! as a reserved slot of [`JUMP_SLOT_LEN`] trap bytes; once the target is
//! known the slot is overwritten with
//!
//! ```text
//! PC  I16 <distance>  ADD|SUB  JMP
//! ```
//!
//! which computes the target from the slot's own address and jumps if the
//! value left on the stack just before the slot is non-zero.

use crate::bytecode::compile_error::CompileError;
use crate::bytecode::op::Op;

/// Fixed size of the code buffer.
pub const CODE_CAPACITY: usize = 4096;

/// Size of a reserved jump: `PC`, `I16 hi lo`, `ADD|SUB`, `JMP`.
pub const JUMP_SLOT_LEN: usize = 6;

const MAX_DISPLACEMENT: usize = u16::MAX as usize;

/// A reserved, not yet linked jump. Consumed by [`Emitter::link`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reserved jump traps until it is linked"]
pub struct JumpPatch {
    offset: usize,
}

impl JumpPatch {
    pub fn offset(&self) -> usize {
        self.offset
    }
}

#[derive(Debug, Clone)]
pub struct Emitter {
    code: Vec<u8>,
    capacity: usize,
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Emitter {
    pub fn new() -> Self {
        Self::with_capacity(CODE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Emitter {
            code: Vec::with_capacity(capacity.min(CODE_CAPACITY)),
            capacity,
        }
    }

    /// Offset the next emitted byte will land at.
    pub fn pc(&self) -> usize {
        self.code.len()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn into_code(self) -> Vec<u8> {
        self.code
    }

    fn emit_byte(&mut self, byte: u8) -> Result<(), CompileError> {
        if self.code.len() >= self.capacity {
            return Err(CompileError::exhausted(format!(
                "code buffer full ({} bytes)",
                self.capacity
            )));
        }
        self.code.push(byte);
        Ok(())
    }

    pub fn emit_op(&mut self, op: Op) -> Result<(), CompileError> {
        self.emit_byte(op.byte())
    }

    /// Pushes `value` using the narrowest immediate that holds its magnitude.
    /// Negative values are emitted as the magnitude followed by `NEG`.
    pub fn emit_literal(&mut self, value: i64) -> Result<(), CompileError> {
        let magnitude = value.unsigned_abs();

        if magnitude > u64::from(u32::MAX) {
            return Err(CompileError::out_of_range(value, i64::from(u32::MAX)));
        } else if magnitude > u64::from(u16::MAX) {
            self.emit_op(Op::PushImm32)?;
            for byte in (magnitude as u32).to_be_bytes() {
                self.emit_byte(byte)?;
            }
        } else if magnitude > u64::from(u8::MAX) {
            self.emit_op(Op::PushImm16)?;
            for byte in (magnitude as u16).to_be_bytes() {
                self.emit_byte(byte)?;
            }
        } else {
            self.emit_op(Op::PushImm8)?;
            self.emit_byte(magnitude as u8)?;
        }

        if value < 0 {
            self.emit_op(Op::Negate)?;
        }

        Ok(())
    }

    pub fn emit_literal_char(&mut self, byte: u8) -> Result<(), CompileError> {
        self.emit_op(Op::CopyLiteral)?;
        self.emit_byte(byte)
    }

    /// Reserves a conditional jump slot. It holds traps until linked.
    pub fn reserve_jump(&mut self) -> Result<JumpPatch, CompileError> {
        let offset = self.pc();
        for _ in 0..JUMP_SLOT_LEN {
            self.emit_op(Op::Trap)?;
        }
        Ok(JumpPatch { offset })
    }

    /// Resolves `patch` so that, when taken, it lands on `target`.
    pub fn link(&mut self, patch: JumpPatch, target: usize) -> Result<(), CompileError> {
        let from = patch.offset;
        let (distance, op) = if target < from {
            (from - target, Op::Subtract)
        } else {
            (target - from, Op::Add)
        };

        if distance > MAX_DISPLACEMENT {
            return Err(CompileError::out_of_range(
                distance as i64,
                MAX_DISPLACEMENT as i64,
            ));
        }

        let [hi, lo] = (distance as u16).to_be_bytes();
        let stub = [
            Op::PushPc.byte(),
            Op::PushImm16.byte(),
            hi,
            lo,
            op.byte(),
            Op::JumpIf.byte(),
        ];
        self.code[from..from + JUMP_SLOT_LEN].copy_from_slice(&stub);

        Ok(())
    }

    /// Drops the top of stack: a jump to the very next instruction pops its
    /// condition whether or not it is taken.
    pub fn emit_drop(&mut self) -> Result<(), CompileError> {
        let patch = self.reserve_jump()?;
        let next = self.pc();
        self.link(patch, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(bytes: &[Op]) -> Vec<u8> {
        bytes.iter().map(|op| op.byte()).collect()
    }

    #[test]
    fn test_literal_picks_narrowest_encoding() {
        let mut emitter = Emitter::new();
        emitter.emit_literal(7).unwrap();
        emitter.emit_literal(300).unwrap();
        emitter.emit_literal(70_000).unwrap();

        assert_eq!(
            emitter.code(),
            &[
                Op::PushImm8.byte(),
                7,
                Op::PushImm16.byte(),
                0x01,
                0x2c,
                Op::PushImm32.byte(),
                0x00,
                0x01,
                0x11,
                0x70,
            ]
        );
    }

    #[test]
    fn test_negative_literal_emits_negate() {
        let mut emitter = Emitter::new();
        emitter.emit_literal(-1).unwrap();

        assert_eq!(
            emitter.code(),
            &[Op::PushImm8.byte(), 1, Op::Negate.byte()]
        );
    }

    #[test]
    fn test_literal_out_of_range() {
        let mut emitter = Emitter::new();
        let err = emitter.emit_literal(1 << 32).unwrap_err();
        assert!(matches!(err, CompileError::OutOfRange { .. }));

        let err = emitter.emit_literal(-(1 << 33)).unwrap_err();
        assert!(matches!(err, CompileError::OutOfRange { .. }));
    }

    #[test]
    fn test_literal_char() {
        let mut emitter = Emitter::new();
        emitter.emit_literal_char(b'\n').unwrap();
        assert_eq!(emitter.code(), &[Op::CopyLiteral.byte(), b'\n']);
    }

    #[test]
    fn test_reserved_jump_traps() {
        let mut emitter = Emitter::new();
        emitter.emit_op(Op::NoOp).unwrap();
        let patch = emitter.reserve_jump().unwrap();

        assert_eq!(patch.offset(), 1);
        assert_eq!(emitter.pc(), 1 + JUMP_SLOT_LEN);
        assert!(emitter.code()[1..].iter().all(|b| *b == Op::Trap.byte()));
    }

    #[test]
    fn test_link_forward() {
        let mut emitter = Emitter::new();
        let patch = emitter.reserve_jump().unwrap();
        emitter.emit_op(Op::NoOp).unwrap();
        emitter.link(patch, 300).unwrap();

        assert_eq!(
            &emitter.code()[..JUMP_SLOT_LEN],
            &[
                Op::PushPc.byte(),
                Op::PushImm16.byte(),
                0x01,
                0x2c,
                Op::Add.byte(),
                Op::JumpIf.byte(),
            ]
        );
    }

    #[test]
    fn test_link_backward() {
        let mut emitter = Emitter::new();
        for _ in 0..10 {
            emitter.emit_op(Op::NoOp).unwrap();
        }
        let patch = emitter.reserve_jump().unwrap();
        emitter.link(patch, 2).unwrap();

        let mut expected = ops(&[Op::PushPc, Op::PushImm16]);
        expected.extend([0, 8]);
        expected.extend(ops(&[Op::Subtract, Op::JumpIf]));
        assert_eq!(&emitter.code()[10..], expected.as_slice());
    }

    #[test]
    fn test_link_distance_limit() {
        let mut emitter = Emitter::new();
        let patch = emitter.reserve_jump().unwrap();
        let err = emitter.link(patch, 65_536).unwrap_err();
        assert_eq!(err, CompileError::out_of_range(65_536, 65_535));
    }

    #[test]
    fn test_capacity_exhausted() {
        let mut emitter = Emitter::with_capacity(4);
        emitter.emit_literal(1).unwrap();
        emitter.emit_op(Op::Dup).unwrap();
        emitter.emit_op(Op::Add).unwrap();

        let err = emitter.emit_op(Op::Halt).unwrap_err();
        assert!(matches!(err, CompileError::ResourceExhausted { .. }));
    }

    #[test]
    fn test_jump_slot_does_not_fit() {
        let mut emitter = Emitter::with_capacity(5);
        assert!(emitter.reserve_jump().is_err());
    }

    #[test]
    fn test_drop_links_to_next_instruction() {
        let mut emitter = Emitter::new();
        emitter.emit_drop().unwrap();

        let mut expected = ops(&[Op::PushPc, Op::PushImm16]);
        expected.extend([0, JUMP_SLOT_LEN as u8]);
        expected.extend(ops(&[Op::Add, Op::JumpIf]));
        assert_eq!(emitter.code(), expected.as_slice());
    }
}
