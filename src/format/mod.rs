//! Format strings made of several units, and the block loop that feeds
//! input through them.

pub mod scanner;

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::bytecode::{CompileError, CompiledUnit, UnitCompiler};
use crate::runtime::{Fault, NoopTracer, Tracer, Vm, VmConfig};
use scanner::{FormatCursor, scan_int};

/// 16 bytes per line as hex, after a 7-digit offset.
pub const DEFAULT_FORMAT: &str = r#""%07.7_ax" 16/1 " %02x" "\n""#;

/// Hex columns in two groups of eight followed by the printable bytes.
pub const CANONICAL_FORMATS: [&str; 2] = [
    r#""%08.8_ax" 8/1 " %02x" 1/1 "  %02x" 7/1 " %02x""#,
    r#""  |" 16/1 "%_p" "|\n""#,
];

/// One format string compiled to its units, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    units: Vec<CompiledUnit>,
}

impl Format {
    /// Splits `text` into `[iterations]["/" count] format-text` units and
    /// compiles each one. A missing iteration count means 1, a missing byte
    /// count means no limit.
    pub fn parse(text: &str) -> Result<Format, CompileError> {
        let mut cursor = FormatCursor::new(text.as_bytes());
        let mut units = Vec::new();

        while cursor.skip_whitespace(true).is_some() {
            let start = cursor.pos();
            let iterations = scan_int(&mut cursor).map_or(1, |n| n as i64);

            let limit = if cursor.skip_whitespace(false) == Some(b'/') {
                cursor.advance();
                cursor.skip_whitespace(false);
                let count = scan_int(&mut cursor).ok_or_else(|| {
                    CompileError::malformed(cursor.pos(), "expected a byte count after '/'")
                })?;
                Some(count)
            } else {
                None
            };

            match cursor.skip_whitespace(false) {
                None | Some(b'\n') => {
                    return Err(CompileError::malformed(start, "unit has no format text"));
                }
                Some(_) => {}
            }

            units.push(UnitCompiler::new().compile(iterations, limit, &mut cursor)?);
        }

        Ok(Format { units })
    }

    pub fn units(&self) -> &[CompiledUnit] {
        &self.units
    }

    /// Input bytes one pass over every unit consumes.
    pub fn block_size(&self) -> usize {
        self.units.iter().map(CompiledUnit::block_size).sum()
    }
}

/// Parses a format file: one format string per line, `#` lines and blank
/// lines ignored.
pub fn parse_format_file(text: &str) -> Result<Vec<Format>, CompileError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(Format::parse)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    /// Leading input bytes to discard.
    pub skip: u64,
    /// Most input bytes to dump after the skip.
    pub length: Option<u64>,
    pub vm: VmConfig,
}

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// A unit whose pass faulted. The dump carries on with the next unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFault {
    /// Stream offset of the block the fault happened in.
    pub block_offset: u64,
    pub format: usize,
    pub unit: usize,
    pub fault: Fault,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub bytes: u64,
    pub blocks: usize,
    pub faults: Vec<UnitFault>,
}

/// Drives one or more formats over a byte stream, block by block.
pub struct Dumper<T: Tracer = NoopTracer> {
    formats: Vec<Format>,
    block_size: usize,
    options: DumpOptions,
    vm: Vm<T>,
}

impl Dumper {
    pub fn new(formats: Vec<Format>, options: DumpOptions) -> Result<Self, CompileError> {
        Self::with_tracer(formats, options, NoopTracer)
    }
}

impl<T: Tracer> Dumper<T> {
    /// Every format sees the same block, so the block is as large as the
    /// hungriest format. Formats that consume nothing are rejected.
    pub fn with_tracer(
        formats: Vec<Format>,
        options: DumpOptions,
        tracer: T,
    ) -> Result<Self, CompileError> {
        let block_size = formats.iter().map(Format::block_size).max().unwrap_or(0);
        if block_size == 0 {
            return Err(CompileError::malformed(0, "format consumes no input"));
        }

        let vm = Vm::with_tracer(options.vm.clone(), tracer);
        Ok(Self {
            formats,
            block_size,
            options,
            vm,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn dump<R: Read, W: Write>(
        &mut self,
        mut reader: R,
        mut writer: W,
    ) -> Result<DumpSummary, DumpError> {
        let skipped = io::copy(&mut reader.by_ref().take(self.options.skip), &mut io::sink())?;
        let mut reader = reader.take(self.options.length.unwrap_or(u64::MAX));

        let mut summary = DumpSummary::default();
        let mut block = vec![0u8; self.block_size];
        let mut out = Vec::new();
        let mut offset = skipped;

        loop {
            let len = read_block(&mut reader, &mut block)?;
            if len == 0 {
                break;
            }

            self.run_block(&block[..len], offset, &mut out, &mut summary.faults);
            writer.write_all(&out)?;
            out.clear();

            offset += len as u64;
            summary.bytes += len as u64;
            summary.blocks += 1;
        }

        writer.flush()?;
        Ok(summary)
    }

    fn run_block(
        &mut self,
        block: &[u8],
        offset: u64,
        out: &mut Vec<u8>,
        faults: &mut Vec<UnitFault>,
    ) {
        for (fi, format) in self.formats.iter().enumerate() {
            let mut pos = 0;

            for (ui, unit) in format.units().iter().enumerate() {
                // a unit never reads past its own block size, but sees the
                // rest of the block so address-only units know input remains
                let start = pos.min(block.len());
                let end = (pos + unit.block_size()).min(block.len());
                let origin = offset + start as u64;

                match self.vm.execute_at(unit, &block[start..], origin, out) {
                    Ok(execution) => pos = start + execution.consumed,
                    Err(fault) => {
                        faults.push(UnitFault {
                            block_offset: offset,
                            format: fi,
                            unit: ui,
                            fault,
                        });
                        pos = end;
                    }
                }
            }
        }
    }
}

/// Fills `buf` unless the reader runs dry first; returns the bytes read.
fn read_block<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
