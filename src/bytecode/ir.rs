use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bytecode::stack_check_error::{StackCheckError, check_stack};

/// One compiled format unit: a self-terminating bytecode loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledUnit {
    /// Instruction stream with inline operands; always ends in `HALT`.
    pub code: Vec<u8>,

    /// Loop count after clamping.
    pub iterations: usize,

    /// Input bytes one iteration consumes when no input runs short.
    pub bytes_per_iteration: usize,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("cannot decode compiled unit: {0}")]
    Postcard(#[from] postcard::Error),

    #[error(transparent)]
    Verify(#[from] StackCheckError),
}

impl CompiledUnit {
    /// Bytes of input one full pass over this unit consumes.
    pub fn block_size(&self) -> usize {
        self.iterations * self.bytes_per_iteration
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Decodes a unit produced by [`to_bytes`](Self::to_bytes) and re-checks
    /// its stack discipline before handing it out.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let unit: CompiledUnit = postcard::from_bytes(bytes)?;
        check_stack(&unit.code)?;
        Ok(unit)
    }
}
