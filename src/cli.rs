//! Command-line definition.

use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};

pub fn build_cli() -> Command {
    Command::new("xdump")
        .about("Display file contents under control of hexdump-style format strings")
        .arg(
            Arg::new("format")
                .short('e')
                .long("format")
                .value_name("FORMAT")
                .action(ArgAction::Append)
                .help("Format string; may be given more than once"),
        )
        .arg(
            Arg::new("format_file")
                .short('f')
                .long("format-file")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .action(ArgAction::Append)
                .help("Read format strings from FILE, one per line"),
        )
        .arg(
            Arg::new("canonical")
                .short('C')
                .long("canonical")
                .action(ArgAction::SetTrue)
                .help("Canonical hex+ASCII display"),
        )
        .arg(
            Arg::new("skip")
                .short('s')
                .long("skip")
                .value_name("OFFSET")
                .value_parser(value_parser!(u64))
                .default_value("0")
                .help("Skip OFFSET bytes from the beginning of the input"),
        )
        .arg(
            Arg::new("length")
                .short('n')
                .long("length")
                .value_name("LENGTH")
                .value_parser(value_parser!(u64))
                .help("Interpret only LENGTH bytes of input"),
        )
        .arg(
            Arg::new("disasm")
                .long("disasm")
                .action(ArgAction::SetTrue)
                .help("Print the compiled bytecode instead of dumping input"),
        )
        .arg(
            Arg::new("trace")
                .long("trace")
                .value_name("WHAT")
                .num_args(0..=1)
                .require_equals(true)
                .default_missing_value("conv")
                .value_parser(["conv", "all"])
                .help("Trace execution to stderr"),
        )
        .arg(
            Arg::new("files")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .action(ArgAction::Append)
                .help("Input files; standard input when none are given"),
        )
}

#[derive(Debug, Clone)]
pub struct DumpParams {
    pub formats: Vec<String>,
    pub format_files: Vec<PathBuf>,
    pub canonical: bool,
    pub skip: u64,
    pub length: Option<u64>,
    pub disasm: bool,
    pub trace: Option<String>,
    pub files: Vec<PathBuf>,
}

impl DumpParams {
    pub fn from_matches(m: &ArgMatches) -> Self {
        Self {
            formats: m
                .get_many::<String>("format")
                .map(|v| v.cloned().collect())
                .unwrap_or_default(),
            format_files: m
                .get_many::<PathBuf>("format_file")
                .map(|v| v.cloned().collect())
                .unwrap_or_default(),
            canonical: m.get_flag("canonical"),
            skip: m.get_one::<u64>("skip").copied().unwrap_or(0),
            length: m.get_one::<u64>("length").copied(),
            disasm: m.get_flag("disasm"),
            trace: m.get_one::<String>("trace").cloned(),
            files: m
                .get_many::<PathBuf>("files")
                .map(|v| v.cloned().collect())
                .unwrap_or_default(),
        }
    }
}
