pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod emit;
pub mod ir;
pub mod op;
pub mod stack_check_error;

pub use compile::{UnitCompiler, compile_unit};
pub use compile_error::CompileError;
pub use ir::CompiledUnit;
pub use op::Op;

/// Operand stack capacity of the machine, in cells.
pub const STACK_CAPACITY: usize = 8;
