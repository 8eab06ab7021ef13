use thiserror::Error;

use crate::bytecode::STACK_CAPACITY;
use crate::bytecode::op::{Op, read_operand};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stack-check error: {message}")]
pub struct StackCheckError {
    pub message: String,
}

impl StackCheckError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Check stack effects starting from an empty stack and return the deepest
/// height reached.
///
/// NOTE: This is a linear scan that doesn't follow jump targets. It is exact
/// for compiled units because every jump lands at a point whose height
/// matches the fall-through height there.
pub fn check_stack(code: &[u8]) -> Result<usize, StackCheckError> {
    let mut height: usize = 0;
    let mut max_height: usize = 0;
    let mut pc = 0;

    while pc < code.len() {
        let op = Op::from_byte(code[pc]).ok_or_else(|| {
            StackCheckError::new(format!("invalid opcode 0x{:02x} at pc={}", code[pc], pc))
        })?;

        if op.operand_len() > 0 && read_operand(code, pc, op).is_none() {
            return Err(StackCheckError::new(format!(
                "truncated {} operand at pc={}",
                op.mnemonic(),
                pc
            )));
        }

        let (pops, pushes) = op.effect();
        height = height.checked_sub(pops).ok_or_else(|| {
            StackCheckError::new(format!(
                "stack underflow at pc={}, op={}, needed {} items",
                pc,
                op.mnemonic(),
                pops
            ))
        })?;
        height += pushes;

        if height > STACK_CAPACITY {
            return Err(StackCheckError::new(format!(
                "stack overflow at pc={}, op={}, height {} exceeds {}",
                pc,
                op.mnemonic(),
                height,
                STACK_CAPACITY
            )));
        }
        max_height = max_height.max(height);

        pc += op.width();
    }

    Ok(max_height)
}
