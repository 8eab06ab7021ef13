pub mod fault;
pub mod render;
pub mod trace;
pub mod vm;

pub use fault::Fault;
pub use trace::{NoopTracer, PrintTracer, Tracer, Verbosity};
pub use vm::{Execution, Vm, VmConfig};

use crate::bytecode::CompiledUnit;

/// Runs one pass of `unit` over `input` with the default configuration.
pub fn execute(
    unit: &CompiledUnit,
    input: &[u8],
    output: &mut Vec<u8>,
) -> Result<Execution, Fault> {
    Vm::new().execute(unit, input, output)
}
