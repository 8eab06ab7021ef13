//! Execution tracing hooks for the VM.

use std::fmt;
use std::io::{self, Write};

use crate::bytecode::disasm::describe_kind_cell;
use crate::bytecode::op::Op;
use crate::runtime::fault::Fault;

/// Observer called by the VM as it runs. All hooks default to no-ops.
pub trait Tracer {
    /// Called before `op` at `pc` executes, with the stack bottom-first.
    fn instruction(&mut self, _pc: usize, _op: Op, _stack: &[i64]) {}

    fn halted(&mut self, _steps: usize) {}

    fn faulted(&mut self, _fault: &Fault) {}
}

/// Tracer that does nothing; the VM default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Only `CONV` instructions and the end of each pass
    #[default]
    Conversions,
    /// Every instruction with a stack snapshot
    Instructions,
}

/// Writes one line per traced event. Write errors on the sink are ignored.
pub struct PrintTracer<W: Write = io::Stderr> {
    out: W,
    verbosity: Verbosity,
}

impl PrintTracer<io::Stderr> {
    pub fn stderr(verbosity: Verbosity) -> Self {
        Self::new(io::stderr(), verbosity)
    }
}

impl<W: Write> PrintTracer<W> {
    pub fn new(out: W, verbosity: Verbosity) -> Self {
        Self { out, verbosity }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, args: fmt::Arguments<'_>) {
        let _ = writeln!(self.out, "{}", args);
    }
}

impl<W: Write> Tracer for PrintTracer<W> {
    fn instruction(&mut self, pc: usize, op: Op, stack: &[i64]) {
        match (self.verbosity, op) {
            (_, Op::Render) => {
                let kind = stack.last().copied().map(describe_kind_cell);
                self.line(format_args!(
                    "trace: {:04} CONV {} {:?}",
                    pc,
                    kind.unwrap_or_default(),
                    stack
                ));
            }
            (Verbosity::Instructions, op) => {
                self.line(format_args!(
                    "trace: {:04} {:<5} {:?}",
                    pc,
                    op.mnemonic(),
                    stack
                ));
            }
            (Verbosity::Conversions, _) => {}
        }
    }

    fn halted(&mut self, steps: usize) {
        self.line(format_args!("trace: halt after {} steps", steps));
    }

    fn faulted(&mut self, fault: &Fault) {
        self.line(format_args!("trace: fault {} (code {})", fault, fault.code()));
    }
}
