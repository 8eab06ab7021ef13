use thiserror::Error;

/// Why an execution pass stopped early. Every fault carries the program
/// counter of the instruction that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("trap at pc={pc}")]
    Trap { pc: usize },

    #[error("stack overflow at pc={pc}")]
    StackOverflow { pc: usize },

    #[error("stack underflow at pc={pc}")]
    StackUnderflow { pc: usize },

    #[error("invalid opcode 0x{byte:02x} at pc={pc}")]
    InvalidOpcode { pc: usize, byte: u8 },

    #[error("truncated instruction at pc={pc}")]
    TruncatedInstruction { pc: usize },

    #[error("program counter {pc} out of bounds")]
    PcOutOfBounds { pc: usize },

    #[error("step limit of {limit} exceeded at pc={pc}")]
    StepLimitExceeded { pc: usize, limit: usize },

    #[error("unknown conversion cell {cell} at pc={pc}")]
    UnknownConversion { pc: usize, cell: i64 },
}

impl Fault {
    /// Stable numeric code for the fault kind.
    pub fn code(&self) -> u32 {
        match self {
            Fault::Trap { .. } => 1,
            Fault::StackOverflow { .. } => 2,
            Fault::StackUnderflow { .. } => 3,
            Fault::InvalidOpcode { .. } => 4,
            Fault::TruncatedInstruction { .. } => 5,
            Fault::PcOutOfBounds { .. } => 6,
            Fault::StepLimitExceeded { .. } => 7,
            Fault::UnknownConversion { .. } => 8,
        }
    }

    pub fn pc(&self) -> usize {
        match self {
            Fault::Trap { pc }
            | Fault::StackOverflow { pc }
            | Fault::StackUnderflow { pc }
            | Fault::InvalidOpcode { pc, .. }
            | Fault::TruncatedInstruction { pc }
            | Fault::PcOutOfBounds { pc }
            | Fault::StepLimitExceeded { pc, .. }
            | Fault::UnknownConversion { pc, .. } => *pc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_pc() {
        let fault = Fault::InvalidOpcode { pc: 12, byte: 0xee };

        let msg = fault.to_string();
        assert!(msg.contains("0xee"));
        assert!(msg.contains("pc=12"));
        assert_eq!(fault.pc(), 12);
    }

    #[test]
    fn test_codes_are_distinct() {
        let faults = [
            Fault::Trap { pc: 0 },
            Fault::StackOverflow { pc: 0 },
            Fault::StackUnderflow { pc: 0 },
            Fault::InvalidOpcode { pc: 0, byte: 0 },
            Fault::TruncatedInstruction { pc: 0 },
            Fault::PcOutOfBounds { pc: 0 },
            Fault::StepLimitExceeded { pc: 0, limit: 1 },
            Fault::UnknownConversion { pc: 0, cell: -1 },
        ];

        let mut codes: Vec<u32> = faults.iter().map(Fault::code).collect();
        codes.dedup();
        assert_eq!(codes.len(), faults.len());
    }
}
