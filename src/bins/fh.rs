use std::ffi::CString;
use std::path::PathBuf;
use std::process::exit;

use framehound::dbginfo::SymbolTable;
use framehound::debuggee::Debuggee;
use framehound::debugger::{Debugger, RunOutcome};
use framehound::errors::DebuggerError;
use framehound::ui::cli::CliUi;
use framehound::unwind::{UnwindConfig, DEFAULT_MAX_FRAMES};

use clap::Parser;
use tracing::{debug, error};

/// Debug a program line by line and see who called whom
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The program to launch as debuggee, searched in PATH if it is not a file
    target: PathBuf,

    /// Arguments passed to the debuggee
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Stop unwinding at this function, can be given multiple times
    #[arg(long = "root-function", default_values_t = ["main".to_string(), "__libc_start_main".to_string()])]
    root_functions: Vec<String>,

    /// Upper bound on the frames walked for one backtrace
    #[arg(long, default_value_t = DEFAULT_MAX_FRAMES)]
    max_frames: usize,

    /// More log output, can be repeated
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    human_panic::setup_panic!();
    let args = Args::parse();
    setup_logger(args.verbose);
    debug!("set up the logger");

    match run(args) {
        Ok(RunOutcome::Exited) => (),
        Ok(RunOutcome::Quit) => exit(0),
        Err(e) => {
            error!("{e}");
            eprintln!("fh: {e}");
            exit(1)
        }
    }
}

fn run(args: Args) -> Result<RunOutcome, DebuggerError> {
    let target = resolve_target(args.target)?;
    let symbols = SymbolTable::load(&target)?;
    let debuggee_args = args
        .args
        .iter()
        .map(|a| CString::new(a.as_str()))
        .collect::<Result<Vec<_>, _>>()?;

    let config = UnwindConfig {
        root_functions: args.root_functions,
        max_frames: args.max_frames,
        ..Default::default()
    };

    let debuggee = Debuggee::launch(&target, &debuggee_args)?;
    let ui = CliUi::build()?;
    let mut debugger = Debugger::build(debuggee, symbols, ui, config)?;
    debugger.run_debugger()
}

fn resolve_target(target: PathBuf) -> Result<PathBuf, DebuggerError> {
    if target.is_file() {
        return Ok(target);
    }
    Ok(which::which(target)?)
}

fn setup_logger(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    // logs go to stderr, stdout belongs to the prompt
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("could not setup logger: {e}");
    }
}
