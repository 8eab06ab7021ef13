mod cli;

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::process::ExitCode;

use xdump::bytecode::disasm::print_unit;
use xdump::format::{
    CANONICAL_FORMATS, DEFAULT_FORMAT, DumpOptions, Dumper, Format, parse_format_file,
};
use xdump::runtime::{NoopTracer, PrintTracer, Tracer, Verbosity};

use crate::cli::{DumpParams, build_cli};

const EXIT_IO: u8 = 1;
const EXIT_COMPILE: u8 = 2;
const EXIT_FAULT: u8 = 3;

fn main() -> ExitCode {
    let matches = build_cli().get_matches();
    let params = DumpParams::from_matches(&matches);

    let formats = match load_formats(&params) {
        Ok(formats) => formats,
        Err(code) => return ExitCode::from(code),
    };

    if params.disasm {
        for (fi, format) in formats.iter().enumerate() {
            for (ui, unit) in format.units().iter().enumerate() {
                print_unit(&format!("format {} unit {}", fi, ui), unit);
            }
        }
        return ExitCode::SUCCESS;
    }

    let input = match open_input(&params) {
        Ok(input) => input,
        Err(code) => return ExitCode::from(code),
    };

    let options = DumpOptions {
        skip: params.skip,
        length: params.length,
        ..DumpOptions::default()
    };

    let code = match params.trace.as_deref() {
        Some(what) => {
            let verbosity = if what == "all" {
                Verbosity::Instructions
            } else {
                Verbosity::Conversions
            };
            run_dump(formats, options, PrintTracer::stderr(verbosity), input)
        }
        None => run_dump(formats, options, NoopTracer, input),
    };
    ExitCode::from(code)
}

/// `-e` strings first, then `-f` files, then `-C`. The default format is
/// used only when none of them were given.
fn load_formats(params: &DumpParams) -> Result<Vec<Format>, u8> {
    let mut formats = Vec::new();

    for text in &params.formats {
        formats.push(compile_or_report(text)?);
    }

    for path in &params.format_files {
        let text = fs::read_to_string(path).map_err(|e| {
            eprintln!("xdump: {}: {}", path.display(), e);
            EXIT_IO
        })?;
        let parsed = parse_format_file(&text).map_err(|e| {
            eprintln!("xdump: {}: {}", path.display(), e);
            EXIT_COMPILE
        })?;
        formats.extend(parsed);
    }

    if params.canonical {
        for text in CANONICAL_FORMATS {
            formats.push(compile_or_report(text)?);
        }
    }

    if formats.is_empty() {
        formats.push(compile_or_report(DEFAULT_FORMAT)?);
    }

    Ok(formats)
}

fn compile_or_report(text: &str) -> Result<Format, u8> {
    Format::parse(text).map_err(|e| {
        eprintln!("xdump: {}", e);
        eprintln!("  in format: {}", text);
        EXIT_COMPILE
    })
}

/// Concatenates the named files, or standard input when there are none.
fn open_input(params: &DumpParams) -> Result<Box<dyn Read>, u8> {
    if params.files.is_empty() {
        return Ok(Box::new(io::stdin().lock()));
    }

    let mut input: Box<dyn Read> = Box::new(io::empty());
    for path in &params.files {
        let file = File::open(path).map_err(|e| {
            eprintln!("xdump: {}: {}", path.display(), e);
            EXIT_IO
        })?;
        input = Box::new(input.chain(BufReader::new(file)));
    }
    Ok(input)
}

fn run_dump<T: Tracer>(
    formats: Vec<Format>,
    options: DumpOptions,
    tracer: T,
    input: Box<dyn Read>,
) -> u8 {
    let mut dumper = match Dumper::with_tracer(formats, options, tracer) {
        Ok(dumper) => dumper,
        Err(e) => {
            eprintln!("xdump: {}", e);
            return EXIT_COMPILE;
        }
    };

    let stdout = io::stdout().lock();
    let summary = match dumper.dump(input, io::BufWriter::new(stdout)) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("xdump: {}", e);
            return EXIT_IO;
        }
    };

    for fault in &summary.faults {
        eprintln!(
            "xdump: warning: format {} unit {} at offset {:#x}: {} (code {})",
            fault.format,
            fault.unit,
            fault.block_offset,
            fault.fault,
            fault.fault.code()
        );
    }

    if summary.faults.is_empty() { 0 } else { EXIT_FAULT }
}
