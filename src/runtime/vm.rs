use std::ops::Range;

use crate::bytecode::op::{Op, read_operand, unpack_kind};
use crate::bytecode::{CompiledUnit, STACK_CAPACITY};
use crate::format::scanner::Flags;
use crate::runtime::fault::Fault;
use crate::runtime::render::{Consumed, Conversion, render};
use crate::runtime::trace::{NoopTracer, Tracer};

#[derive(Debug, Clone, Default)]
pub struct VmConfig {
    /// Instructions one pass may execute before faulting.
    pub max_steps: Option<usize>,
    /// Bytes one pass may append to the output; the rest is dropped.
    pub max_output: Option<usize>,
}

/// Outcome of one successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    /// Input bytes the pass consumed.
    pub consumed: usize,
    pub steps: usize,
}

struct InputCursor<'a> {
    data: &'a [u8],
    pos: usize,
    /// Stream offset of `data[0]`.
    origin: u64,
}

impl InputCursor<'_> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Reads up to `n` bytes, big-endian-packed. Bits shifted past the top
    /// of the word are lost; the span still covers every byte read.
    fn read(&mut self, n: usize) -> (i64, Range<usize>) {
        let start = self.pos;
        let end = start + n.min(self.remaining());
        let word = self.data[start..end]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        self.pos = end;
        (word as i64, start..end)
    }

    fn offset(&self) -> u64 {
        self.origin + self.pos as u64
    }
}

/// Append-only view of the caller's sink. Only bytes written during this
/// pass can be trimmed.
struct OutputCursor<'a> {
    buf: &'a mut Vec<u8>,
    base: usize,
    end: usize,
}

impl OutputCursor<'_> {
    fn put(&mut self, byte: u8) {
        if self.buf.len() < self.end {
            self.buf.push(byte);
        }
    }

    fn room(&self) -> usize {
        self.end.saturating_sub(self.buf.len())
    }

    fn write(&mut self, bytes: &[u8]) {
        let room = self.room();
        self.buf.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    fn trim(&mut self) {
        while self.buf.len() > self.base && matches!(self.buf.last(), Some(b' ' | b'\t')) {
            self.buf.pop();
        }
    }
}

struct VmState<'a> {
    stack: [i64; STACK_CAPACITY],
    sp: usize,
    pc: usize,
    input: InputCursor<'a>,
    output: OutputCursor<'a>,
    last_read: Range<usize>,
}

impl VmState<'_> {
    fn push(&mut self, value: i64) -> Result<(), Fault> {
        if self.sp >= STACK_CAPACITY {
            return Err(Fault::StackOverflow { pc: self.pc });
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<i64, Fault> {
        if self.sp == 0 {
            return Err(Fault::StackUnderflow { pc: self.pc });
        }
        self.sp -= 1;
        Ok(self.stack[self.sp])
    }

    fn stack(&self) -> &[i64] {
        &self.stack[..self.sp]
    }
}

/// Bytecode interpreter for compiled units.
pub struct Vm<T: Tracer = NoopTracer> {
    config: VmConfig,
    tracer: T,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Self::with_tracer(config, NoopTracer)
    }
}

impl<T: Tracer> Vm<T> {
    pub fn with_tracer(config: VmConfig, tracer: T) -> Self {
        Self { config, tracer }
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    pub fn into_tracer(self) -> T {
        self.tracer
    }

    /// Runs one pass of `unit` over `input`, appending to `output`.
    pub fn execute(
        &mut self,
        unit: &CompiledUnit,
        input: &[u8],
        output: &mut Vec<u8>,
    ) -> Result<Execution, Fault> {
        self.execute_at(unit, input, 0, output)
    }

    /// Like [`execute`](Self::execute), with `input[0]` sitting at stream
    /// offset `origin` for address conversions.
    ///
    /// On a fault, output written before it stays in `output`.
    pub fn execute_at(
        &mut self,
        unit: &CompiledUnit,
        input: &[u8],
        origin: u64,
        output: &mut Vec<u8>,
    ) -> Result<Execution, Fault> {
        let base = output.len();
        let end = self
            .config
            .max_output
            .map_or(usize::MAX, |max| base.saturating_add(max));

        let mut state = VmState {
            stack: [0; STACK_CAPACITY],
            sp: 0,
            pc: 0,
            input: InputCursor {
                data: input,
                pos: 0,
                origin,
            },
            output: OutputCursor {
                buf: output,
                base,
                end,
            },
            last_read: 0..0,
        };

        let result = self.run(&unit.code, &mut state);
        match &result {
            Ok(execution) => self.tracer.halted(execution.steps),
            Err(fault) => self.tracer.faulted(fault),
        }
        result
    }

    fn run(&mut self, code: &[u8], m: &mut VmState<'_>) -> Result<Execution, Fault> {
        let mut steps = 0;

        loop {
            steps += 1;
            if let Some(limit) = self.config.max_steps {
                if steps > limit {
                    return Err(Fault::StepLimitExceeded { pc: m.pc, limit });
                }
            }

            let pc = m.pc;
            let byte = *code.get(pc).ok_or(Fault::PcOutOfBounds { pc })?;
            let op = Op::from_byte(byte).ok_or(Fault::InvalidOpcode { pc, byte })?;
            let operand = if op.operand_len() > 0 {
                read_operand(code, pc, op).ok_or(Fault::TruncatedInstruction { pc })?
            } else {
                0
            };

            self.tracer.instruction(pc, op, m.stack());

            match op {
                Op::Halt => {
                    return Ok(Execution {
                        consumed: m.input.pos,
                        steps,
                    });
                }
                Op::NoOp => {}
                Op::Trap => return Err(Fault::Trap { pc }),

                Op::PushPc => m.push(pc as i64)?,
                Op::PushTrue => m.push(1)?,
                Op::PushImm8 | Op::PushImm16 | Op::PushImm32 => m.push(i64::from(operand))?,

                Op::Negate => {
                    let v = m.pop()?;
                    m.push(v.wrapping_neg())?;
                }
                Op::Subtract => {
                    let b = m.pop()?;
                    let a = m.pop()?;
                    m.push(a.wrapping_sub(b))?;
                }
                Op::Add => {
                    let b = m.pop()?;
                    let a = m.pop()?;
                    m.push(a.wrapping_add(b))?;
                }
                Op::Not => {
                    let v = m.pop()?;
                    m.push(i64::from(v == 0))?;
                }
                Op::Dup => {
                    let v = m.pop()?;
                    m.push(v)?;
                    m.push(v)?;
                }
                Op::Swap => {
                    let b = m.pop()?;
                    let a = m.pop()?;
                    m.push(b)?;
                    m.push(a)?;
                }

                Op::ReadBytes => {
                    let n = usize::try_from(m.pop()?).unwrap_or(0);
                    let (word, span) = m.input.read(n);
                    m.last_read = span;
                    m.push(word)?;
                }
                Op::CountRemaining => {
                    let remaining = m.input.remaining() as i64;
                    m.push(remaining)?;
                }

                Op::CopyLiteral => m.output.put(operand as u8),
                Op::Render => self.render(m)?,
                Op::TrimTrailing => m.output.trim(),

                Op::JumpIf => {
                    let target = m.pop()?;
                    let cond = m.pop()?;
                    if cond != 0 {
                        m.pc = usize::try_from(target).map_err(|_| Fault::PcOutOfBounds { pc })?;
                        continue;
                    }
                }
            }

            m.pc += op.width();
        }
    }

    fn render(&mut self, m: &mut VmState<'_>) -> Result<(), Fault> {
        let cell = m.pop()?;
        let width = m.pop()?;
        let precision = m.pop()?;
        let flags = m.pop()?;
        let word = m.pop()?;

        let (kind, bytes) = unpack_kind(cell).ok_or(Fault::UnknownConversion { pc: m.pc, cell })?;
        let conv = Conversion {
            kind,
            bytes,
            flags: Flags::from_bits(flags),
            width: usize::try_from(width).ok(),
            precision: usize::try_from(precision).ok(),
        };
        let input = Consumed {
            word,
            span: &m.input.data[m.last_read.clone()],
            offset: m.input.offset(),
        };

        let text = render(&conv, input, m.output.room());
        m.output.write(&text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile_unit;
    use crate::bytecode::emit::Emitter;
    use crate::runtime::trace::{PrintTracer, Verbosity};

    // ============================================================
    // Test Helpers
    // ============================================================

    /// Wrap raw code in a unit
    fn unit_from_code(code: Vec<u8>) -> CompiledUnit {
        CompiledUnit {
            code,
            iterations: 1,
            bytes_per_iteration: 0,
        }
    }

    /// Compile a unit and run it once over `input`, returning the text
    fn run(iterations: i64, limit: Option<usize>, format: &str, input: &[u8]) -> String {
        let unit = compile_unit(iterations, limit, format.as_bytes()).expect("compile");
        let mut out = Vec::new();
        Vm::new()
            .execute(&unit, input, &mut out)
            .expect("execution should succeed");
        String::from_utf8(out).unwrap()
    }

    fn run_code(code: Vec<u8>, config: VmConfig) -> (Result<Execution, Fault>, Vec<u8>) {
        let mut out = Vec::new();
        let result = Vm::with_config(config).execute(&unit_from_code(code), &[], &mut out);
        (result, out)
    }

    fn ops(ops: &[Op]) -> Vec<u8> {
        ops.iter().map(|op| op.byte()).collect()
    }

    // ============================================================
    // Rendering through compiled units
    // ============================================================

    #[test]
    fn test_integer_kinds() {
        let input = [0x00, 0x00, 0x00, 0x2a];
        assert_eq!(run(1, None, "%d", &input), "42");
        assert_eq!(run(1, None, "%x", &input), "2a");
        assert_eq!(run(1, None, "%X", &input), "2A");
        assert_eq!(run(1, None, "%o", &input), "52");
        assert_eq!(run(1, None, "%u", &input), "42");
    }

    #[test]
    fn test_zero_pad_and_left_justify() {
        let input = [0, 0, 0, 7];
        assert_eq!(run(1, None, "%06d", &input), "000007");
        // trailing padding survives until the end of the unit
        assert_eq!(run(1, None, "%-6d|", &input), "7     |");
        assert_eq!(run(1, None, "%-6d", &input), "7");
    }

    #[test]
    fn test_string_directive() {
        assert_eq!(run(1, None, "%.3s", b"ABC"), "ABC");
        assert_eq!(run(2, None, "\"[%.2s]\"", b"ABCD"), "[AB][CD]");
    }

    #[test]
    fn test_two_single_byte_values() {
        assert_eq!(run(2, Some(1), "\"%d \"", &[1, 2]), "1 2");
    }

    #[test]
    fn test_loop_repeats_body() {
        assert_eq!(run(3, None, "ab", &[]), "ababab");
        assert_eq!(run(0, None, "ab", &[]), "");
        assert_eq!(run(-2, None, "ab", &[]), "");
    }

    #[test]
    fn test_short_input_skips_conversions() {
        assert_eq!(run(4, Some(1), "\"%02x \"", &[1, 2]), "01 02");
        assert_eq!(run(2, None, "\"<%c>\"", b"z"), "<z><>");
    }

    #[test]
    fn test_partial_read_keeps_what_is_there() {
        assert_eq!(run(1, None, "%x", &[0x01, 0x02]), "102");
    }

    #[test]
    fn test_consumed_count() {
        let unit = compile_unit(3, Some(2), b"%x").unwrap();
        let mut out = Vec::new();
        let execution = Vm::new().execute(&unit, &[1, 2, 3, 4, 5], &mut out).unwrap();
        assert_eq!(execution.consumed, 5);
        assert_eq!(String::from_utf8(out).unwrap(), "1023045");
    }

    #[test]
    fn test_addresses_follow_stream_offset() {
        let unit = compile_unit(2, Some(2), b"\"%_ad:%d \"").unwrap();
        let mut out = Vec::new();
        Vm::new()
            .execute_at(&unit, &[0, 1, 0, 2], 100, &mut out)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "100:1 102:2");
    }

    #[test]
    fn test_address_skipped_at_end_of_input() {
        assert_eq!(run(1, None, "%_ax", &[]), "");
        assert_eq!(run(1, None, "%04_Ax", &[0]), "0000");
    }

    #[test]
    fn test_byte_renderings() {
        assert_eq!(run(3, None, "%_p", b"a\x01b"), "a.b");
        assert_eq!(run(2, None, "\"%4_c\"", b"\n\x1b"), "  \\n 033");
        assert_eq!(run(2, None, "\"%-4_u\"", b"\x00A"), "nul A");
    }

    #[test]
    fn test_never_faults_on_zero_block() {
        let formats = [
            "%d", "%i", "%u", "%o", "%x", "%X", "%c", "%.4s", "%_ad", "%_ao", "%_ax", "%_Ad",
            "%_Ao", "%_Ax", "%_c", "%_p", "%_u", "%%", "\"%#08x|%+d|% d|%-3c\\n\"",
        ];

        for format in formats {
            for limit in [None, Some(1), Some(3)] {
                let unit = match compile_unit(5, limit, format.as_bytes()) {
                    Ok(unit) => unit,
                    Err(_) => continue,
                };
                let input = vec![0u8; unit.block_size()];
                let mut out = Vec::new();
                let result = Vm::new().execute(&unit, &input, &mut out);
                assert!(result.is_ok(), "format {:?} limit {:?}: {:?}", format, limit, result);
                assert_eq!(result.unwrap().consumed, unit.block_size());
            }
        }
    }

    #[test]
    fn test_trim_only_touches_this_pass() {
        let unit = compile_unit(1, None, b"\" \t \"").unwrap();
        let mut out = b"keep ".to_vec();
        Vm::new().execute(&unit, &[], &mut out).unwrap();
        assert_eq!(out, b"keep ");
    }

    #[test]
    fn test_trim_is_idempotent() {
        let mut code = ops(&[Op::CopyLiteral]);
        code.push(b'a');
        code.extend(ops(&[Op::CopyLiteral]));
        code.push(b' ');
        code.extend(ops(&[Op::TrimTrailing]));
        let once = {
            let mut c = code.clone();
            c.push(Op::Halt.byte());
            run_code(c, VmConfig::default()).1
        };
        let twice = {
            let mut c = code;
            c.extend(ops(&[Op::TrimTrailing, Op::Halt]));
            run_code(c, VmConfig::default()).1
        };
        assert_eq!(once, b"a");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_output_limit_truncates() {
        let unit = compile_unit(1, None, b"abcdef%d").unwrap();
        let mut out = Vec::new();
        let config = VmConfig {
            max_output: Some(3),
            ..VmConfig::default()
        };
        Vm::with_config(config)
            .execute(&unit, &[0, 0, 0, 9], &mut out)
            .unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_huge_width_stays_within_output_limit() {
        let unit = compile_unit(1, None, b"\"%-1500000000d|%1500000000x\"").unwrap();
        let mut out = Vec::new();
        let config = VmConfig {
            max_output: Some(8),
            ..VmConfig::default()
        };
        Vm::with_config(config)
            .execute(&unit, &[0, 0, 0, 7, 0, 0, 0, 1], &mut out)
            .unwrap();
        assert_eq!(out, b"7");
    }

    #[test]
    fn test_control_bytes_are_escaped() {
        assert_eq!(run(1, None, "%c", b"\x01"), "001");
        assert_eq!(run(1, None, "%.3s", b"A\x01\n"), "A001\\n");
    }

    // ============================================================
    // Raw instructions
    // ============================================================

    #[test]
    fn test_arithmetic() {
        let mut emitter = Emitter::new();
        emitter.emit_literal(-5).unwrap();
        emitter.emit_literal(300).unwrap();
        emitter.emit_op(Op::Add).unwrap();
        emitter.emit_literal(70_000).unwrap();
        emitter.emit_op(Op::Subtract).unwrap();
        // ( -69705 ) -> compare against the expected value
        emitter.emit_literal(-69_705).unwrap();
        emitter.emit_op(Op::Subtract).unwrap();
        emitter.emit_op(Op::Not).unwrap();
        emitter.emit_op(Op::Not).unwrap();
        // jump into a trap if the difference was non-zero
        let patch = emitter.reserve_jump().unwrap();
        emitter.emit_op(Op::Halt).unwrap();
        let trap = emitter.pc();
        emitter.emit_op(Op::Trap).unwrap();
        emitter.link(patch, trap).unwrap();

        let (result, _) = run_code(emitter.into_code(), VmConfig::default());
        assert!(result.is_ok(), "{:?}", result);
    }

    #[test]
    fn test_dup_swap_and_jumps() {
        let mut emitter = Emitter::new();
        emitter.emit_op(Op::PushTrue).unwrap();
        emitter.emit_literal(0).unwrap();
        emitter.emit_op(Op::Swap).unwrap();
        // ( 0 1 ) taken, skips 'a'
        let skip_a = emitter.reserve_jump().unwrap();
        emitter.emit_literal_char(b'a').unwrap();
        let at_b = emitter.pc();
        emitter.link(skip_a, at_b).unwrap();
        emitter.emit_literal_char(b'b').unwrap();
        emitter.emit_op(Op::Dup).unwrap();
        // ( 0 0 ) not taken
        let skip_c = emitter.reserve_jump().unwrap();
        emitter.emit_literal_char(b'c').unwrap();
        let after_c = emitter.pc();
        emitter.link(skip_c, after_c).unwrap();
        emitter.emit_op(Op::Not).unwrap();
        // ( 1 ) taken, skips 'd'
        let skip_d = emitter.reserve_jump().unwrap();
        emitter.emit_literal_char(b'd').unwrap();
        let end = emitter.pc();
        emitter.link(skip_d, end).unwrap();
        emitter.emit_op(Op::Halt).unwrap();

        let (result, out) = run_code(emitter.into_code(), VmConfig::default());
        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(out, b"bc");
    }

    #[test]
    fn test_trap_keeps_earlier_output() {
        let mut code = ops(&[Op::CopyLiteral]);
        code.push(b'x');
        code.push(Op::Trap.byte());

        let (result, out) = run_code(code, VmConfig::default());
        assert_eq!(result, Err(Fault::Trap { pc: 2 }));
        assert_eq!(out, b"x");
    }

    #[test]
    fn test_stack_underflow() {
        let (result, _) = run_code(ops(&[Op::Add]), VmConfig::default());
        assert_eq!(result, Err(Fault::StackUnderflow { pc: 0 }));
    }

    #[test]
    fn test_stack_overflow() {
        let code = ops(&[Op::PushTrue; STACK_CAPACITY + 1]);
        let (result, _) = run_code(code, VmConfig::default());
        assert_eq!(
            result,
            Err(Fault::StackOverflow {
                pc: STACK_CAPACITY
            })
        );
    }

    #[test]
    fn test_invalid_opcode() {
        let (result, _) = run_code(vec![Op::NoOp.byte(), 0xee], VmConfig::default());
        assert_eq!(result, Err(Fault::InvalidOpcode { pc: 1, byte: 0xee }));
    }

    #[test]
    fn test_running_off_the_end() {
        let (result, _) = run_code(ops(&[Op::NoOp]), VmConfig::default());
        assert_eq!(result, Err(Fault::PcOutOfBounds { pc: 1 }));
    }

    #[test]
    fn test_truncated_immediate() {
        let (result, _) = run_code(vec![Op::PushImm16.byte(), 0x01], VmConfig::default());
        assert_eq!(result, Err(Fault::TruncatedInstruction { pc: 0 }));
    }

    #[test]
    fn test_negative_jump_target() {
        let mut emitter = Emitter::new();
        emitter.emit_op(Op::PushTrue).unwrap();
        emitter.emit_literal(-1).unwrap();
        emitter.emit_op(Op::JumpIf).unwrap();

        let (result, _) = run_code(emitter.into_code(), VmConfig::default());
        assert!(matches!(result, Err(Fault::PcOutOfBounds { .. })));
    }

    #[test]
    fn test_step_limit() {
        // 0: TRUE  1: I8 0  3: JMP -> 0, forever
        let code = vec![
            Op::PushTrue.byte(),
            Op::PushImm8.byte(),
            0,
            Op::JumpIf.byte(),
        ];
        let config = VmConfig {
            max_steps: Some(100),
            ..VmConfig::default()
        };
        let (result, _) = run_code(code, config);
        assert!(matches!(
            result,
            Err(Fault::StepLimitExceeded { limit: 100, .. })
        ));
    }

    #[test]
    fn test_unknown_conversion_cell() {
        let mut emitter = Emitter::new();
        for _ in 0..4 {
            emitter.emit_literal(0).unwrap();
        }
        emitter.emit_literal(0xff).unwrap();
        emitter.emit_op(Op::Render).unwrap();
        emitter.emit_op(Op::Halt).unwrap();

        let (result, _) = run_code(emitter.into_code(), VmConfig::default());
        assert!(matches!(
            result,
            Err(Fault::UnknownConversion { cell: 0xff, .. })
        ));
    }

    #[test]
    fn test_read_past_end_returns_zero() {
        let unit = unit_from_code(vec![
            Op::PushImm8.byte(),
            4,
            Op::ReadBytes.byte(),
            Op::Not.byte(),
            Op::Not.byte(),
            Op::PushPc.byte(),
            Op::JumpIf.byte(),
            Op::Halt.byte(),
        ]);
        // an empty read yields 0, so the self-jump at pc 5 is not taken
        let mut out = Vec::new();
        let execution = Vm::new().execute(&unit, &[], &mut out).unwrap();
        assert_eq!(execution.consumed, 0);
    }

    #[test]
    fn test_print_tracer() {
        let unit = compile_unit(1, None, b"%d").unwrap();
        let tracer = PrintTracer::new(Vec::new(), Verbosity::Conversions);
        let mut vm = Vm::with_tracer(VmConfig::default(), tracer);
        let mut out = Vec::new();
        vm.execute(&unit, &[0, 0, 0, 5], &mut out).unwrap();

        let log = String::from_utf8(vm.into_tracer().into_inner()).unwrap();
        assert!(log.contains("CONV %d/4"), "{}", log);
        assert!(log.contains("halt after"), "{}", log);
        assert!(!log.contains("DUP"), "{}", log);
    }

    #[test]
    fn test_print_tracer_instructions_and_fault() {
        let tracer = PrintTracer::new(Vec::new(), Verbosity::Instructions);
        let mut vm = Vm::with_tracer(VmConfig::default(), tracer);
        let mut out = Vec::new();
        let result = vm.execute(&unit_from_code(ops(&[Op::NoOp, Op::Trap])), &[], &mut out);
        assert!(result.is_err());

        let log = String::from_utf8(vm.into_tracer().into_inner()).unwrap();
        assert!(log.contains("NOOP"), "{}", log);
        assert!(log.contains("fault trap at pc=1 (code 1)"), "{}", log);
    }
}
