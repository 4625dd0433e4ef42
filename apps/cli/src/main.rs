mod console;

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wslcompact_host_windows::{LxssRegistry, ProcessToken, WslSubsystem};
use wslcompact_imaging::DiskCompactor;
use wslcompact_workflow_engine::{Host, Orchestrator, RunConfig, DEFAULT_SETTLE};

use crate::console::TerminalConsole;

#[derive(Debug, Parser)]
#[command(
    name = "wslcompact",
    version,
    about = "Compact every WSL2 distribution's ext4.vhdx with diskpart"
)]
struct Cli {
    /// Exit without waiting for a keypress, even on an interactive console
    #[arg(long)]
    no_pause: bool,

    /// Seconds to wait after shutting WSL down before touching disk images
    #[arg(long, value_name = "SECONDS", default_value_t = DEFAULT_SETTLE.as_secs())]
    settle_secs: u64,

    /// Write reports/<run-id>/run.json under this directory
    #[arg(long, value_name = "DIR")]
    report_dir: Option<PathBuf>,

    /// Log level for stderr diagnostics; RUST_LOG takes precedence
    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            settle: Duration::from_secs(self.settle_secs),
            pause_on_exit: !self.no_pause,
            report_dir: self.report_dir.clone(),
        }
    }
}

fn init_logging(level: LogLevel) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!(err))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_logging(cli.log_level) {
        eprintln!("logging disabled: {err:#}");
    }

    let probe = ProcessToken;
    let wsl = WslSubsystem::new();
    let registry = LxssRegistry::new();
    let compactor = DiskCompactor::new();
    let console = TerminalConsole;
    let host = Host {
        elevation: &probe,
        subsystem: &wsl,
        store: &registry,
        compactor: &compactor,
        console: &console,
    };

    tracing::debug!(?cli, script = %compactor.script_path().display(), "starting run");
    let (outcome, _) = Orchestrator::new(host, cli.run_config(), std::io::stdout()).run();
    ExitCode::from(outcome.exit.code() as u8)
}
