//! `opbridge` command line.
//!
//! Exports pyc files and IR documents, generates the VM's opcode tables and summarizes VM
//! execution logs. Diagnostics go to stderr through `tracing`; set `RUST_LOG` to adjust.

use std::{
    error::Error,
    fs::{self, File},
    io::{self, BufReader, Read, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Args, Parser, Subcommand, ValueEnum};
use opbridge::{
    CsvAggregator, DEFAULT_MAX_CODE_DEPTH, ExportLimits, Exporter, GeneratorConfig, IrDocument, OpcodeTable,
    PythonVersion, analyze, disassemble, generate, load_pyc, marshal::parse_header,
};
use tracing_subscriber::{EnvFilter, fmt};

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(name = "opbridge", version)]
#[command(about = "Bridge CPython code objects to an external VM")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export a pyc file or IR document as IR JSON, or disassemble it
    Export(ExportArgs),
    /// Generate the VM's opcode header and definitions
    GenOpcodes(GenOpcodesArgs),
    /// Per-opcode timings from a VM execution log
    Profile {
        /// Log file written by the instrumented VM
        log: PathBuf,
    },
    /// Mean duration per key of a flattened CSV dump
    Summarize {
        csv: PathBuf,
        /// Key that must have at least one valid row (repeatable)
        #[arg(long = "expect", value_name = "KEY")]
        expected: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Input file; standard input when omitted
    #[arg(long)]
    file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = InputFormat::Auto)]
    format: InputFormat,

    /// Print a disassembly instead of the IR (CPython 3.6 bytecode only)
    #[arg(long)]
    dis: bool,

    /// Indent the IR output
    #[arg(long)]
    indent_json: bool,

    /// Maximum code object nesting depth
    #[arg(long, default_value_t = DEFAULT_MAX_CODE_DEPTH)]
    max_depth: usize,

    /// Reject bytecode using opcodes outside the CPython 3.6 table (3.6 pyc files only)
    #[arg(long)]
    validate_opcodes: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum InputFormat {
    /// IR if the input starts with `{`, pyc otherwise
    Auto,
    Pyc,
    Ir,
}

#[derive(Args, Debug)]
struct GenOpcodesArgs {
    /// JSON opcode table (`{"have_argument": N, "opnames": [...]}`); CPython 3.6 by default
    #[arg(long)]
    table: Option<PathBuf>,

    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// C++ namespace, `::`-separated
    #[arg(long)]
    namespace: Option<String>,

    /// Header file name; the definitions file takes the same stem
    #[arg(long)]
    header: Option<String>,
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Export(args) => run_export(&args),
        Command::GenOpcodes(args) => run_gen_opcodes(&args),
        Command::Profile { log } => run_profile(&log),
        Command::Summarize { csv, expected } => run_summarize(&csv, &expected),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run_export(args: &ExportArgs) -> CliResult {
    let bytes = match &args.file {
        Some(path) => fs::read(path).map_err(|err| format!("failed to read {}: {err}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    let limits = ExportLimits {
        max_depth: args.max_depth,
    };
    let is_ir = match args.format {
        InputFormat::Ir => true,
        InputFormat::Pyc => false,
        InputFormat::Auto => looks_like_ir(&bytes),
    };

    // IR documents always target the CPython 3.6 VM
    let mut version = PythonVersion::new(3, 6);
    let code = if is_ir {
        IrDocument::from_json(std::str::from_utf8(&bytes)?)?.to_code_object_with(limits)?
    } else {
        version = parse_header(&bytes)?.version;
        load_pyc(&bytes)?
    };
    tracing::debug!(name = %code.name, %version, code_objects = code.tree_size(), "loaded code object tree");

    let table = if args.dis || args.validate_opcodes {
        let table = OpcodeTable::for_version(version).ok_or_else(|| {
            format!("no built-in opcode table for Python {version}; --dis and --validate-opcodes need 3.6 bytecode")
        })?;
        Some(table)
    } else {
        None
    };

    let mut stdout = io::stdout().lock();
    if let (true, Some(table)) = (args.dis, &table) {
        stdout.write_all(disassemble(&code, table).as_bytes())?;
        return Ok(());
    }

    let mut exporter = Exporter::new(limits);
    if let (true, Some(table)) = (args.validate_opcodes, &table) {
        exporter = exporter.with_opcode_table(table);
    }
    let document = exporter.export(&code)?;
    document.write_json(&mut stdout, args.indent_json)?;
    writeln!(stdout)?;
    Ok(())
}

fn looks_like_ir(bytes: &[u8]) -> bool {
    bytes.iter().find(|byte| !byte.is_ascii_whitespace()) == Some(&b'{')
}

fn run_gen_opcodes(args: &GenOpcodesArgs) -> CliResult {
    let table = match &args.table {
        Some(path) => OpcodeTable::load(path)?,
        None => OpcodeTable::cpython36(),
    };
    let mut config = GeneratorConfig::default();
    if let Some(namespace) = &args.namespace {
        config = config.with_namespace(namespace);
    }
    if let Some(header) = &args.header {
        config = config.with_header_name(header);
    }
    generate(&table, &config)?
        .write_to(&args.out_dir)
        .map_err(|err| format!("failed to write to {}: {err}", args.out_dir.display()))?;
    Ok(())
}

fn run_profile(log: &Path) -> CliResult {
    let file = File::open(log).map_err(|err| format!("failed to open {}: {err}", log.display()))?;
    tracing::info!(input = %log.display(), "analyzing trace log");
    let report = analyze(BufReader::new(file))?;
    print!("{report}");
    Ok(())
}

fn run_summarize(csv: &Path, expected: &[String]) -> CliResult {
    let file = File::open(csv).map_err(|err| format!("failed to open {}: {err}", csv.display()))?;
    let mut aggregator = CsvAggregator::new();
    for key in expected {
        aggregator.expect(key.as_str());
    }
    aggregator.feed_reader(BufReader::new(file))?;

    let report = aggregator.report();
    for skipped in &report.skipped {
        tracing::warn!("{skipped}");
    }
    for gap in &report.gaps {
        tracing::warn!("{gap}");
    }
    if !report.skipped.is_empty() {
        tracing::warn!(count = report.skipped.len(), "rows skipped");
    }
    print!("{report}");
    Ok(())
}
