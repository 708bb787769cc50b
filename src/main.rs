//! Command line driver for the BASIC interpreter.
//!
//! Reads a BASIC source file and either runs it or produces one of the
//! requested dumps. The pipeline is
//!
//! ```text
//! source -> lexer -> tokens -> parser -> program
//!                                          |-> tree interpreter (default)
//!                                          |-> IR lowerer -> stack VM (--vm)
//! ```
//!
//! ## Modules
//!
//! - **lexer**: tokenizes the source with line and column tracking
//! - **parser**: builds the line-numbered program
//! - **ast**: syntax tree and runtime value types
//! - **interpreter**: tree-walking execution engine
//! - **builtin**: built-in function registry
//! - **ir** / **vm**: opcode lowering and the stack machine
//! - **render**: AST graph and symbol table dumps
//! - **error**: shared error type and the source reporter
//!
//! ## Exit codes
//!
//! Reported program errors (syntax, runtime, preflight) leave exit code
//! 0; nonzero is reserved for driver failures such as an unreadable
//! input file.

mod ast;
mod builtin;
mod error;
mod interpreter;
mod ir;
mod lexer;
mod parser;
mod render;
mod vm;

use crate::error::{Result, SourceReporter};
use crate::interpreter::{Interpreter, RunStats, Settings};
use crate::lexer::{Lexer, Token};
use crate::parser::Parser;
use crate::vm::Vm;
use clap::Parser as CliParser;
use simple_logger::SimpleLogger;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

#[derive(CliParser, Debug)]
#[command(
    name = "basic64",
    version,
    about = "Interpreter for BASIC Dartmouth 64 programs",
    group(clap::ArgGroup::new("dump").args(["lex", "style", "sym"]).multiple(false))
)]
struct Cli {
    /// BASIC program file to run
    input: PathBuf,

    /// Store the lexer output in <input>.lex
    #[arg(short = 'l', long = "lex")]
    lex: bool,

    /// Generate the AST graph as DOT or TXT format
    #[arg(short = 'a', long = "ast", value_name = "STYLE", value_parser = ["dot", "txt"])]
    style: Option<String>,

    /// Dump the symbol table
    #[arg(long = "sym")]
    sym: bool,

    /// Dump the generated intermediate representation
    #[arg(short = 'I', long = "ir")]
    ir: bool,

    /// Execute through the stack machine instead of the tree walker
    #[arg(long = "vm")]
    vm: bool,

    /// Parse only, do not run the program
    #[arg(short = 'n', long = "no-run")]
    no_run: bool,

    /// Convert all INPUT entries to uppercase
    #[arg(short = 'u', long = "uppercase")]
    uppercase: bool,

    /// Set the minimum index of the dimensioned arrays
    #[arg(long = "array-base", alias = "ar", value_name = "N", default_value_t = 1)]
    array_base: i64,

    /// Enable string slicing (disables string arrays)
    #[arg(short = 's', long = "slicing", alias = "sl")]
    slicing: bool,

    /// If no branch from a GOTO instruction exists, go to the next line
    #[arg(short = 'g', long = "go-next")]
    go_next: bool,

    /// Activate tracing to print line numbers during execution
    #[arg(short = 't', long = "trace")]
    trace: bool,

    /// Set the number of spaces for comma-separated elements
    #[arg(long = "tabs", value_name = "N", default_value_t = 15)]
    tabs: usize,

    /// Set the seed for the random number generator
    #[arg(short = 'r', long = "random", alias = "rn", value_name = "N")]
    random: Option<u64>,

    /// Print statistics on program termination
    #[arg(short = 'p', long = "print-stats")]
    print_stats: bool,

    /// Write statistics to a file on program termination
    #[arg(short = 'w', long = "write-stats")]
    write_stats: bool,

    /// Redirect PRINT output to <input>_print.txt
    #[arg(short = 'o', long = "output-file", alias = "of")]
    output_file: bool,

    /// Redirect INPUT to a file
    #[arg(short = 'i', long = "input-file", alias = "if", value_name = "PATH")]
    input_file: Option<PathBuf>,
}

fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .ok();

    let cli = Cli::parse_from(expand_legacy_flags(std::env::args_os()));
    if let Err(err) = run(&cli) {
        log::error!("{}", err);
        process::exit(1);
    }
}

/// The classic driver spelled several options as two letters behind a
/// single dash: `-ar N`, `-sl`, `-rn N`, `-of`, `-if PATH`. clap reads a
/// single dash as bundled one-character shorts, so those spellings are
/// rewritten to their long forms before parsing.
fn expand_legacy_flags(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| {
            let rewritten = match arg.to_str() {
                Some("-ar") => "--array-base",
                Some("-sl") => "--slicing",
                Some("-rn") => "--random",
                Some("-of") => "--output-file",
                Some("-if") => "--input-file",
                _ => return arg,
            };
            OsString::from(rewritten)
        })
        .collect()
}

/// Drives one invocation. Program errors are reported here and leave the
/// exit code at 0; only driver failures bubble up as `Err`.
fn run(cli: &Cli) -> Result<()> {
    let source = fs::read_to_string(&cli.input)?;
    let reporter = SourceReporter::new(&source);

    let mut lexer = Lexer::new(&source);
    let tokens = lexer.tokenize();
    for err in lexer.take_errors() {
        eprintln!("{}", err);
    }

    if cli.lex {
        let path = cli.input.with_extension("lex");
        fs::write(&path, lex_dump(&tokens))?;
        log::info!("Printing lexer output: {}", path.display());
        return Ok(());
    }

    let mut parser = Parser::new(tokens);
    let prog = match parser.parse() {
        Ok(prog) => prog,
        Err(err) => {
            match parser.error_position() {
                Some((line, column, width)) => {
                    reporter.report(line, column, width, &err.to_string());
                }
                None => eprintln!("{}", err),
            }
            return Ok(());
        }
    };

    if let Some(style) = &cli.style {
        let path = cli.input.with_extension(style.as_str());
        let text = match style.as_str() {
            "dot" => render::render_dot(&prog),
            _ => render::render_text(&prog),
        };
        fs::write(&path, text)?;
        log::info!("Printing the AST graph: {}", path.display());
        return Ok(());
    }

    if cli.sym {
        let path = stem_path(&cli.input, "_symtab.txt");
        fs::write(&path, render::symbol_table(&prog))?;
        log::info!("Dumping symbol table: {}", path.display());
        return Ok(());
    }

    if cli.ir {
        match ir::lower(&prog) {
            Ok(module) => print!("{}", module.listing()),
            Err(err) => eprintln!("{}", err),
        }
        return Ok(());
    }

    if cli.no_run {
        return Ok(());
    }

    let mut sink: Box<dyn Write> = if cli.output_file {
        let path = stem_path(&cli.input, "_print.txt");
        log::info!("Redirecting PRINT output to file: {}", path.display());
        Box::new(fs::File::create(path)?)
    } else {
        Box::new(std::io::stdout())
    };

    if cli.vm {
        let module = match ir::lower(&prog) {
            Ok(module) => module,
            Err(err) => {
                eprintln!("{}", err);
                return Ok(());
            }
        };
        let mut vm = Vm::new(sink.as_mut());
        if let Err(err) = vm.load(&module).and_then(|_| vm.run()) {
            eprintln!("{}", err);
        }
        return Ok(());
    }

    let input_lines = match &cli.input_file {
        Some(path) => Some(
            fs::read_to_string(path)?
                .lines()
                .map(str::to_string)
                .collect(),
        ),
        None => None,
    };

    let settings = Settings {
        uppercase: cli.uppercase,
        array_base: cli.array_base,
        slicing: cli.slicing,
        go_next: cli.go_next,
        trace: cli.trace,
        tabs: cli.tabs,
        random_seed: cli.random,
        input_lines,
    };

    let mut interp = Interpreter::new(&prog, settings, sink.as_mut());
    let result = interp.run();
    let stats = interp.stats();
    drop(interp);

    if let Err(err) = result {
        eprintln!("{}", err);
    }

    if cli.write_stats || cli.print_stats {
        let report = stats_text(&stats);
        if cli.write_stats {
            let path = stem_path(&cli.input, "_stats.txt");
            fs::write(&path, &report)?;
            log::info!("Dumping text file with stats: {}", path.display());
        }
        if cli.print_stats {
            print!("{}", report);
        }
    }

    Ok(())
}

fn lex_dump(tokens: &[Token]) -> String {
    let mut text = String::new();
    for token in tokens {
        text.push_str(&format!(
            "Token(type={}, value={}, position={}:{})\n",
            token.kind.type_name(),
            token.kind,
            token.line,
            token.column
        ));
    }
    text
}

/// `<dir>/<stem><suffix>` next to the input file.
fn stem_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("program");
    input.with_file_name(format!("{}{}", stem, suffix))
}

fn stats_text(stats: &RunStats) -> String {
    format!(
        "This program took {:.2} seconds to run\n\
         Memory usage: {} bytes\n\
         Total number of processed lines: {}\n",
        stats.elapsed.as_secs_f64(),
        resident_set_size(),
        stats.statements
    )
}

/// Resident set size in bytes, 0 where the proc filesystem is absent.
fn resident_set_size() -> u64 {
    if let Ok(status) = fs::read_to_string("/proc/self/status") {
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                let kb: u64 = rest
                    .trim()
                    .trim_end_matches("kB")
                    .trim()
                    .parse()
                    .unwrap_or(0);
                return kb * 1024;
            }
        }
    }
    0
}
