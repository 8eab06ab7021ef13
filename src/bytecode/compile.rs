use crate::{
    bytecode::{
        CompiledUnit,
        compile_error::CompileError,
        emit::Emitter,
        op::{Op, pack_kind},
    },
    format::scanner::{ConversionKind, ConversionSpec, FormatCursor, scan_directive},
};

/// Lowers one `(iterations, byte limit, format text)` unit into a loop:
///
/// ```text
///     I8 0                      ; counter
/// top:
///     DUP  <iterations>  SWAP SUB NOT
///     <jump exit>
///     <body>                    ; literals and directives
///     TRUE ADD                  ; counter += 1
///     TRUE <jump top>
/// exit:
///     <drop counter>  TRIM  HALT
/// ```
pub struct UnitCompiler {
    emitter: Emitter,

    /// Per-iteration input bytes accounted for so far
    consumes: usize,
}

/// Compiles a unit whose format text is the whole of `format`, up to the
/// first unquoted whitespace.
pub fn compile_unit(
    iterations: i64,
    byte_limit: Option<usize>,
    format: &[u8],
) -> Result<CompiledUnit, CompileError> {
    let mut cursor = FormatCursor::new(format);
    UnitCompiler::new().compile(iterations, byte_limit, &mut cursor)
}

impl Default for UnitCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitCompiler {
    pub fn new() -> Self {
        Self::with_emitter(Emitter::new())
    }

    pub fn with_emitter(emitter: Emitter) -> Self {
        Self {
            emitter,
            consumes: 0,
        }
    }

    /// Compiles the format text under `cursor`, leaving the cursor on the
    /// whitespace that ended it (or at the end of input).
    pub fn compile(
        mut self,
        iterations: i64,
        byte_limit: Option<usize>,
        cursor: &mut FormatCursor<'_>,
    ) -> Result<CompiledUnit, CompileError> {
        let iterations = iterations.max(0);

        self.emitter.emit_literal(0)?;

        let top = self.emitter.pc();
        self.emitter.emit_op(Op::Dup)?;
        self.emitter.emit_literal(iterations)?;
        self.emitter.emit_op(Op::Swap)?;
        self.emitter.emit_op(Op::Subtract)?;
        self.emitter.emit_op(Op::Not)?;
        let exit = self.emitter.reserve_jump()?;

        self.compile_body(byte_limit, cursor)?;

        self.emitter.emit_op(Op::PushTrue)?;
        self.emitter.emit_op(Op::Add)?;
        self.emitter.emit_op(Op::PushTrue)?;
        let back = self.emitter.reserve_jump()?;
        self.emitter.link(back, top)?;

        let end = self.emitter.pc();
        self.emitter.link(exit, end)?;
        self.emitter.emit_drop()?;
        self.emitter.emit_op(Op::TrimTrailing)?;
        self.emitter.emit_op(Op::Halt)?;

        Ok(CompiledUnit {
            code: self.emitter.into_code(),
            iterations: iterations as usize,
            bytes_per_iteration: self.consumes,
        })
    }

    fn compile_body(
        &mut self,
        byte_limit: Option<usize>,
        cursor: &mut FormatCursor<'_>,
    ) -> Result<(), CompileError> {
        let mut quoted = false;
        let mut escaped = false;
        let mut quote_start = 0;

        while let Some(ch) = cursor.current() {
            if escaped {
                self.emitter.emit_literal_char(unescape(ch))?;
                escaped = false;
                cursor.advance();
                continue;
            }

            match ch {
                b'%' => {
                    let start = cursor.pos();
                    cursor.advance();
                    self.compile_directive(start, byte_limit, cursor)?;
                }
                b'"' => {
                    quoted = !quoted;
                    quote_start = cursor.pos();
                    cursor.advance();
                }
                b'\\' => {
                    escaped = true;
                    cursor.advance();
                }
                ch if ch.is_ascii_whitespace() && !quoted => break,
                other => {
                    self.emitter.emit_literal_char(other)?;
                    cursor.advance();
                }
            }
        }

        if escaped {
            self.emitter.emit_literal_char(b'\\')?;
        }

        if quoted {
            return Err(CompileError::malformed(quote_start, "unterminated quote"));
        }

        Ok(())
    }

    fn compile_directive(
        &mut self,
        start: usize,
        byte_limit: Option<usize>,
        cursor: &mut FormatCursor<'_>,
    ) -> Result<(), CompileError> {
        let spec = scan_directive(cursor).map_err(|e| CompileError::malformed(start, e.reason()))?;

        if spec.kind == ConversionKind::Percent {
            return self.emitter.emit_literal_char(b'%');
        }

        let bytes = self.clamp_bytes(&spec, byte_limit)?;
        self.consumes += bytes;

        // skip the whole conversion once input runs dry
        self.emitter.emit_op(Op::CountRemaining)?;
        self.emitter.emit_op(Op::Not)?;
        let skip = self.emitter.reserve_jump()?;

        if bytes == 0 {
            // addresses and "%.0s" consume nothing; their word is 0
            self.emitter.emit_literal(0)?;
        } else {
            self.emitter.emit_literal(bytes as i64)?;
            self.emitter.emit_op(Op::ReadBytes)?;
        }
        self.emitter.emit_literal(i64::from(spec.flags.bits()))?;
        self.emitter.emit_literal(optional(spec.precision))?;
        self.emitter.emit_literal(optional(spec.width))?;
        self.emitter.emit_literal(pack_kind(spec.kind, bytes))?;
        self.emitter.emit_op(Op::Render)?;

        let after = self.emitter.pc();
        self.emitter.link(skip, after)
    }

    fn clamp_bytes(
        &self,
        spec: &ConversionSpec,
        byte_limit: Option<usize>,
    ) -> Result<usize, CompileError> {
        match byte_limit {
            Some(limit) if spec.bytes > 0 => {
                let bytes = spec.bytes.min(limit.saturating_sub(self.consumes));
                if bytes == 0 {
                    return Err(CompileError::exhausted(format!(
                        "%{} has no bytes left in a {}-byte unit",
                        spec.kind.token(),
                        limit
                    )));
                }
                Ok(bytes)
            }
            _ => Ok(spec.bytes),
        }
    }
}

fn optional(value: Option<usize>) -> i64 {
    value.map_or(-1, |v| v as i64)
}

fn unescape(ch: u8) -> u8 {
    match ch {
        b'0' => b'\0',
        b'a' => 0x07,
        b'b' => 0x08,
        b'f' => 0x0c,
        b'n' => b'\n',
        b'r' => b'\r',
        b't' => b'\t',
        b'v' => 0x0b,
        other => other,
    }
}
