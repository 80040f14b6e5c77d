use std::ffi::CString;
use std::path::PathBuf;
use std::process::exit;

use framehound::addr::Addr;
use framehound::dbginfo::{FunctionRef, SourceLocation, SymbolTable};
use framehound::debuggee::Debuggee;
use framehound::debugger::{Debugger, RunOutcome};
use framehound::errors::DebuggerError;
use framehound::feedback::{Feedback, StopReport};
use framehound::ui::json::{Input, JsonUI};
use framehound::ui::Verdict;
use framehound::unwind::{Backtrace, BacktraceFrame, UnwindConfig, DEFAULT_MAX_FRAMES};

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use tracing::{error, trace};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about,
    help_template = r#"{about-section}
{usage-heading} {usage}
{all-args}{tab}

{name}: v{version}
"#
)]
/// framehound server - JSON interface for driving the debugger from another program
///
/// Reads one JSON verdict per line from standard input and writes one JSON feedback per line
/// to standard output. Log output goes to standard error.
struct Args {
    /// The program to launch as debuggee, searched in PATH if it is not a file
    #[arg(required_unless_present_any = ["example_verdicts", "example_feedbacks"])]
    target: Option<PathBuf>,

    /// Arguments passed to the debuggee
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Stop unwinding at this function, can be given multiple times
    #[arg(long = "root-function", default_values_t = ["main".to_string(), "__libc_start_main".to_string()])]
    root_functions: Vec<String>,

    /// Upper bound on the frames walked for one backtrace
    #[arg(long, default_value_t = DEFAULT_MAX_FRAMES)]
    max_frames: usize,

    #[arg(long)]
    /// Print example JSON verdicts and exit
    ///
    /// Displays sample JSON structures for the input the debugger reads
    example_verdicts: bool,

    #[arg(long)]
    /// Print example JSON feedbacks and exit
    ///
    /// Displays sample JSON structures for the output the debugger writes
    example_feedbacks: bool,
}

fn main() {
    human_panic::setup_panic!();
    setup_logger();

    let mut args = Args::parse();

    let res = if args.example_verdicts {
        example_verdicts().map(|_| RunOutcome::Quit)
    } else if args.example_feedbacks {
        example_feedbacks().map(|_| RunOutcome::Quit)
    } else {
        match args.target.take() {
            Some(target) => run(target, args),
            None => Args::command()
                .error(
                    ErrorKind::MissingRequiredArgument,
                    "the program to debug is missing",
                )
                .exit(),
        }
    };

    match res {
        Ok(RunOutcome::Exited) => (),
        Ok(RunOutcome::Quit) => exit(0),
        Err(e) => {
            error!("{e}");
            exit(1)
        }
    }
}

fn run(target: PathBuf, args: Args) -> Result<RunOutcome, DebuggerError> {
    let target = if target.is_file() {
        target
    } else {
        which::which(target)?
    };
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
    let ui = JsonUI::build()?;
    let mut debugger = Debugger::build(debuggee, symbols, ui, config)?;
    debugger.run_debugger()
}

fn example_verdicts() -> Result<(), DebuggerError> {
    let verdicts: &[Verdict] = &[
        Verdict::Continue,
        Verdict::Step,
        Verdict::SetBreakpoint(12),
        Verdict::Quit,
    ];

    for v in verdicts {
        println!("{}", serde_json::to_string(&Input { verdict: *v })?);
    }
    Ok(())
}

fn example_feedbacks() -> Result<(), DebuggerError> {
    let main = FunctionRef {
        name: "main".to_string(),
        short_name: "main".to_string(),
        entry: Addr::from(0x401126usize),
        end: Addr::from(0x401180usize),
        file: "/src/prog.c".to_string(),
    };
    let compute = FunctionRef {
        name: "compute".to_string(),
        short_name: "compute".to_string(),
        entry: Addr::from(0x401106usize),
        end: Addr::from(0x401126usize),
        file: "/src/prog.c".to_string(),
    };
    let report = StopReport {
        pid: 4242,
        addr: compute.entry,
        location: Some(SourceLocation {
            file: "/src/prog.c".to_string(),
            line: 3,
            function: Some(compute.clone()),
        }),
        instruction: Some("push    rbp".to_string()),
        backtrace: Backtrace {
            frames: vec![BacktraceFrame {
                addr: Addr::from(0x40114fusize),
                function: main.clone(),
                line: 12,
            }],
            anomalies: Vec::new(),
            last_function: Some(main),
        },
        breakpoint_hit: true,
    };
    let feedbacks: &[Feedback] = &[
        Feedback::Text("Debuggee 4242 stopped before start".to_string()),
        Feedback::Stopped(report),
        Feedback::Error(DebuggerError::LineNotFound {
            file: "/src/prog.c".to_string(),
            line: 9,
        }),
    ];

    for f in feedbacks {
        let value = JsonUI::<std::io::Empty, std::io::Sink>::format_feedback(f, "/src/prog.c")?;
        println!("{value}");
    }
    Ok(())
}

fn setup_logger() {
    // stdout carries the protocol, logs go to stderr
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .without_time()
        .with_file(false)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("could not setup logger: {e}");
    }
    trace!("set up the logger");
}
