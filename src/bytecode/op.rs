use crate::format::scanner::ConversionKind;

// =============================================================================
// OP - Bytecode instructions
// =============================================================================

/// Opcodes of the dump machine. Each is encoded as a single byte, followed
/// by its inline operand (if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    Halt = 0,
    NoOp,
    /// Unconditional fault. Also fills reserved jump slots until they are linked.
    Trap,

    // literals
    PushPc,
    PushTrue,
    PushImm8,
    PushImm16,
    PushImm32,

    // arithmetic & logic
    Negate,
    Subtract,
    Add,
    Not,

    // stack ops
    Dup,
    Swap,

    // input
    ReadBytes,
    CountRemaining,

    // output
    CopyLiteral,
    Render,
    TrimTrailing,

    /// ( cond target -- ) jump to `target` if `cond` is non-zero.
    JumpIf,
}

impl Op {
    const ALL: [Op; 20] = [
        Op::Halt,
        Op::NoOp,
        Op::Trap,
        Op::PushPc,
        Op::PushTrue,
        Op::PushImm8,
        Op::PushImm16,
        Op::PushImm32,
        Op::Negate,
        Op::Subtract,
        Op::Add,
        Op::Not,
        Op::Dup,
        Op::Swap,
        Op::ReadBytes,
        Op::CountRemaining,
        Op::CopyLiteral,
        Op::Render,
        Op::TrimTrailing,
        Op::JumpIf,
    ];

    pub fn from_byte(byte: u8) -> Option<Op> {
        Self::ALL.get(usize::from(byte)).copied()
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Number of inline operand bytes following the opcode.
    pub fn operand_len(self) -> usize {
        match self {
            Op::PushImm8 | Op::CopyLiteral => 1,
            Op::PushImm16 => 2,
            Op::PushImm32 => 4,
            _ => 0,
        }
    }

    /// Total encoded width, opcode included.
    pub fn width(self) -> usize {
        1 + self.operand_len()
    }

    /// Returns (pops, pushes).
    pub fn effect(self) -> (usize, usize) {
        match self {
            Op::Halt | Op::NoOp | Op::Trap => (0, 0),
            Op::PushPc | Op::PushTrue => (0, 1),
            Op::PushImm8 | Op::PushImm16 | Op::PushImm32 => (0, 1),
            Op::Negate | Op::Not => (1, 1),
            Op::Subtract | Op::Add => (2, 1),
            Op::Dup => (1, 2),
            Op::Swap => (2, 2),
            Op::ReadBytes => (1, 1),
            Op::CountRemaining => (0, 1),
            Op::CopyLiteral | Op::TrimTrailing => (0, 0),
            Op::Render => (5, 0),
            Op::JumpIf => (2, 0),
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::Halt => "HALT",
            Op::NoOp => "NOOP",
            Op::Trap => "TRAP",
            Op::PushPc => "PC",
            Op::PushTrue => "TRUE",
            Op::PushImm8 => "I8",
            Op::PushImm16 => "I16",
            Op::PushImm32 => "I32",
            Op::Negate => "NEG",
            Op::Subtract => "SUB",
            Op::Add => "ADD",
            Op::Not => "NOT",
            Op::Dup => "DUP",
            Op::Swap => "SWAP",
            Op::ReadBytes => "READ",
            Op::CountRemaining => "COUNT",
            Op::CopyLiteral => "COPY",
            Op::Render => "CONV",
            Op::TrimTrailing => "TRIM",
            Op::JumpIf => "JMP",
        }
    }
}

/// Reads the big-endian inline operand of the instruction at `pc`.
///
/// Returns `None` for ops without an operand or when the code ends early.
pub fn read_operand(code: &[u8], pc: usize, op: Op) -> Option<u32> {
    let len = op.operand_len();
    if len == 0 {
        return None;
    }
    let bytes = code.get(pc + 1..pc + 1 + len)?;
    Some(bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

/// Packs a conversion kind and the byte count its directive consumes into
/// the single stack cell `CONV` pops last.
pub fn pack_kind(kind: ConversionKind, bytes: usize) -> i64 {
    i64::from(kind.code()) | ((bytes as i64) << 8)
}

pub fn unpack_kind(cell: i64) -> Option<(ConversionKind, usize)> {
    if cell < 0 {
        return None;
    }
    let kind = ConversionKind::from_code((cell & 0xff) as u8)?;
    Some((kind, (cell >> 8) as usize))
}
