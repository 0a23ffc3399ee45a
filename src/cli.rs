//! Reference command-line front end for the lifecycle engine.

use crate::engine::Engine;
use crate::error::Error;
use crate::step::{Action, ActionKind, Step};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "partforge", version, about = "A dependency-aware parts lifecycle engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Parts specification to load.
    #[arg(short = 'f', long, default_value = "parts.yaml", global = true)]
    pub file: PathBuf,

    /// Root directory for part build state and artifacts.
    #[arg(long, default_value = "work", global = true)]
    pub work_dir: PathBuf,

    /// Print the plan without executing it.
    #[arg(long, global = true)]
    pub plan_only: bool,

    /// Include SKIP actions in plan output.
    #[arg(long, global = true)]
    pub show_skipped: bool,

    /// Raise the logging verbosity; repeatable.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Lower the logging verbosity to warnings and errors.
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Only log errors.
    #[arg(long, global = true)]
    pub silent: bool,

    pub parts: Vec<String>,
}

#[derive(Subcommand)]
pub enum Command {
    Pull { parts: Vec<String> },
    Build { parts: Vec<String> },
    Stage { parts: Vec<String> },
    Prime { parts: Vec<String> },
    Clean { parts: Vec<String> },
    /// Internal companion mode used by scriptlets to call back into the
    /// control protocol without hand-writing JSON.
    Ctl { function: String },
}

pub fn init_tracing(verbose: u8, quiet: bool, silent: bool) {
    let level = if silent {
        "error"
    } else if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn verb(action: &Action) -> &'static str {
    match (action.step, action.kind) {
        (Step::Pull, ActionKind::Run) => "Pull",
        (Step::Pull, ActionKind::Rerun) => "Repull",
        (Step::Pull, ActionKind::Update) => "Update sources for",
        (Step::Pull, ActionKind::Skip) => "Skip pull",
        (Step::Build, ActionKind::Run) => "Build",
        (Step::Build, ActionKind::Rerun) => "Rebuild",
        (Step::Build, ActionKind::Update) => "Update build for",
        (Step::Build, ActionKind::Skip) => "Skip build",
        (Step::Stage, ActionKind::Run) => "Stage",
        (Step::Stage, ActionKind::Rerun) => "Restage",
        (Step::Stage, ActionKind::Skip) => "Skip stage",
        (Step::Prime, ActionKind::Run) => "Prime",
        (Step::Prime, ActionKind::Rerun) => "Re-prime",
        (Step::Prime, ActionKind::Skip) => "Skip prime",
        _ => "?",
    }
}

pub fn print_plan(actions: &[Action], show_skipped: bool) {
    for action in actions {
        if action.kind == ActionKind::Skip && !show_skipped {
            continue;
        }
        match &action.reason {
            Some(reason) => println!("{} {} ({reason})", verb(action), action.part_name),
            None => println!("{} {}", verb(action), action.part_name),
        }
    }
}

/// Run the CLI, returning the process exit code per the documented
/// mapping (0 success, 1 I/O error, 2 schema error, 3 other engine error).
pub fn run(cli: Cli) -> i32 {
    init_tracing(cli.verbose, cli.quiet, cli.silent);

    let (step, part_filter) = match &cli.command {
        Some(Command::Pull { parts }) => (Step::Pull, parts.clone()),
        Some(Command::Build { parts }) => (Step::Build, parts.clone()),
        Some(Command::Stage { parts }) => (Step::Stage, parts.clone()),
        Some(Command::Prime { parts }) => (Step::Prime, parts.clone()),
        Some(Command::Clean { parts }) => {
            return run_clean(&cli, parts);
        }
        Some(Command::Ctl { function }) => {
            return run_ctl(function);
        }
        None => (Step::Prime, cli.parts.clone()),
    };

    match execute(&cli, step, &part_filter) {
        Ok(code) => code,
        Err(e) => report_error(&e),
    }
}

/// Companion mode: re-enters the running engine's scriptlet control loop by
/// writing a single control call to `CRAFT_PARTS_CALL_FIFO` and blocking for
/// the one-line acknowledgement on `CRAFT_PARTS_FEEDBACK_FIFO`.
fn run_ctl(function: &str) -> i32 {
    use std::io::{BufRead, Write};

    let call_fifo = match std::env::var("CRAFT_PARTS_CALL_FIFO") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("ctl mode must be invoked by a running scriptlet (CRAFT_PARTS_CALL_FIFO unset)");
            return 3;
        }
    };
    let feedback_fifo = match std::env::var("CRAFT_PARTS_FEEDBACK_FIFO") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("ctl mode must be invoked by a running scriptlet (CRAFT_PARTS_FEEDBACK_FIFO unset)");
            return 3;
        }
    };

    let call = serde_json::json!({ "function": function, "args": {} });
    let line = format!("{call}\n");

    let result = (|| -> std::io::Result<bool> {
        let mut writer = std::fs::OpenOptions::new().write(true).open(&call_fifo)?;
        writer.write_all(line.as_bytes())?;
        drop(writer);

        let reader = std::fs::OpenOptions::new().read(true).open(&feedback_fifo)?;
        let mut ack = String::new();
        std::io::BufReader::new(reader).read_line(&mut ack)?;
        if !ack.trim().is_empty() {
            eprintln!("error: {}", ack.trim());
            return Ok(false);
        }
        Ok(true)
    })();

    match result {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

fn run_clean(cli: &Cli, parts: &[String]) -> i32 {
    let specs = match crate::config::load_parts_spec(&cli.file) {
        Ok(s) => s,
        Err(e) => return report_error(&e),
    };
    let engine = match Engine::new(specs, cli.work_dir.clone()) {
        Ok(e) => e,
        Err(e) => return report_error(&e),
    };
    match engine.clean(parts, Step::Pull) {
        Ok(()) => 0,
        Err(e) => report_error(&e),
    }
}

fn execute(cli: &Cli, step: Step, part_filter: &[String]) -> crate::error::Result<i32> {
    let specs = crate::config::load_parts_spec(&cli.file)?;
    let engine = Engine::new(specs, cli.work_dir.clone())?;

    if cli.plan_only {
        let mut state_manager =
            crate::state::StateManager::new(&engine.parts, &engine.sources, &engine.project)?;
        let mut sequencer = crate::sequencer::Sequencer::new(&mut state_manager, &engine.parts)?;
        let actions = sequencer.plan(step, part_filter)?;
        print_plan(&actions, cli.show_skipped);
        return Ok(0);
    }

    let actions = engine.run(step, part_filter)?;
    print_plan(&actions, cli.show_skipped);
    Ok(0)
}

fn report_error(e: &Error) -> i32 {
    eprintln!("error: {e}");
    match e {
        Error::Io(_) => 1,
        Error::SchemaValidation(_) => 2,
        _ => 3,
    }
}
