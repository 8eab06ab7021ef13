//! Format-driven byte dumper.
//!
//! A format string such as `"%07.7_ax" 16/1 " %02x" "\n"` is split into
//! units; each unit is compiled to a small bytecode loop for a stack
//! machine, which is then run once per block of input.

pub mod bytecode;
pub mod format;
pub mod runtime;

pub use bytecode::{CompileError, CompiledUnit, compile_unit};
pub use format::{DumpOptions, DumpSummary, Dumper, Format};
pub use runtime::{Execution, Fault, Vm, VmConfig, execute};
