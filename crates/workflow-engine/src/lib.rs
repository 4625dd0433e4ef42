use anyhow::Result;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use wslcompact_core::{now_utc_rfc3339, CompactionResult, DistroEntry, RunRecord, RunSummary};
use wslcompact_host_windows::{list_installed_distros, ConfigStore, SubsystemControl};
use wslcompact_imaging::Compactor;
use wslcompact_report::{write_run_report, ConsoleReport, Phase};
use wslcompact_safety::{require_elevated, ElevationProbe};

pub const DEFAULT_SETTLE: Duration = Duration::from_secs(8);

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Pause after shutdown so the VM releases its handles on the disk images.
    pub settle: Duration,
    pub pause_on_exit: bool,
    pub report_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            settle: DEFAULT_SETTLE,
            pause_on_exit: true,
            report_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Guarded,
    ShutDown,
    Discovered,
    Compacting(usize),
    Summarized,
    WarmedUp,
    Done,
    Aborted,
}

impl RunState {
    pub fn name(&self) -> String {
        match self {
            RunState::Compacting(index) => format!("compacting({})", index),
            other => format!("{:?}", other).to_ascii_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Completed,
    NotElevated,
    DiscoveryFailed,
}

impl RunExit {
    pub fn code(&self) -> i32 {
        match self {
            RunExit::Completed => 0,
            RunExit::NotElevated => 1,
            RunExit::DiscoveryFailed => 2,
        }
    }
}

/// Terminal attachment, for the closing "press any key" pause.
pub trait Console {
    fn is_interactive(&self) -> bool;
    fn wait_for_keypress(&self) -> Result<()>;
}

/// The external services one run talks to.
pub struct Host<'a> {
    pub elevation: &'a dyn ElevationProbe,
    pub subsystem: &'a dyn SubsystemControl,
    pub store: &'a dyn ConfigStore,
    pub compactor: &'a dyn Compactor,
    pub console: &'a dyn Console,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub final_state: RunState,
    pub exit: RunExit,
    pub results: Vec<CompactionResult>,
    pub summary: RunSummary,
    pub record: RunRecord,
}

pub struct Orchestrator<'a, W: Write> {
    host: Host<'a>,
    config: RunConfig,
    report: ConsoleReport<W>,
    state: RunState,
    record: RunRecord,
}

impl<'a, W: Write> Orchestrator<'a, W> {
    pub fn new(host: Host<'a>, config: RunConfig, out: W) -> Self {
        Self {
            host,
            config,
            report: ConsoleReport::new(out),
            state: RunState::Init,
            record: RunRecord::new(now_utc_rfc3339()),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn enter(&mut self, state: RunState) {
        info!(from = %self.state.name(), to = %state.name(), "run state");
        self.state = state;
    }

    pub fn run(mut self) -> (RunOutcome, W) {
        self.report.banner();

        if let Err(err) = require_elevated(self.host.elevation) {
            self.report.note(&format!("[ERROR] {}", err));
            return self.finish(
                RunState::Aborted,
                RunExit::NotElevated,
                Vec::new(),
                RunSummary::default(),
            );
        }
        self.enter(RunState::Guarded);

        self.shutdown_subsystem();
        self.enter(RunState::ShutDown);

        self.report.phase(Phase::Discover);
        let entries = match list_installed_distros(self.host.store) {
            Ok(entries) => entries,
            Err(err) => {
                error!(error = %err, "distribution discovery failed");
                self.report.note(&format!("[ERROR] {}", err));
                return self.finish(
                    RunState::Aborted,
                    RunExit::DiscoveryFailed,
                    Vec::new(),
                    RunSummary::default(),
                );
            }
        };
        self.report.discovered(&entries);
        self.enter(RunState::Discovered);

        let (results, summary) = if entries.is_empty() {
            warn!("no distributions found, nothing to compact");
            (Vec::new(), RunSummary::default())
        } else {
            let (results, summary) = self.compact_all(&entries);
            self.cleanup_script();
            self.report.phase(Phase::Summarize);
            self.report.summary(&summary);
            self.enter(RunState::Summarized);
            (results, summary)
        };

        self.warm_start_subsystem();
        self.enter(RunState::WarmedUp);

        self.finish(RunState::Done, RunExit::Completed, results, summary)
    }

    fn shutdown_subsystem(&mut self) {
        self.report.phase(Phase::Shutdown);
        if let Err(err) = self.host.subsystem.shutdown() {
            warn!(error = %format!("{err:#}"), "WSL shutdown failed, continuing");
        }
        if !self.config.settle.is_zero() {
            self.report.note(&format!(
                "Waiting {}s for disk images to be released...",
                self.config.settle.as_secs()
            ));
            std::thread::sleep(self.config.settle);
        }
    }

    fn compact_all(&mut self, entries: &[DistroEntry]) -> (Vec<CompactionResult>, RunSummary) {
        self.report.phase(Phase::Compact);
        let total = entries.len();
        let mut results = Vec::with_capacity(total);
        let mut summary = RunSummary::default();

        for (index, entry) in entries.iter().enumerate() {
            self.enter(RunState::Compacting(index + 1));
            self.report.item_start(index + 1, total, entry);
            let result = self.host.compactor.compact(entry);
            self.report.item_result(&result);
            summary = summary.absorb(&result);
            results.push(result);
        }
        (results, summary)
    }

    fn cleanup_script(&mut self) {
        if let Err(err) = self.host.compactor.cleanup() {
            warn!(error = %format!("{err:#}"), "could not remove diskpart script");
        }
    }

    fn warm_start_subsystem(&mut self) {
        self.report.phase(Phase::WarmStart);
        if let Err(err) = self.host.subsystem.warm_start() {
            warn!(error = %format!("{err:#}"), "WSL warm start failed");
        }
    }

    fn finish(
        mut self,
        state: RunState,
        exit: RunExit,
        results: Vec<CompactionResult>,
        summary: RunSummary,
    ) -> (RunOutcome, W) {
        self.record.finished_at_utc = now_utc_rfc3339();
        self.record.final_state = state.name();
        self.record.exit_code = exit.code();
        self.record.results = results.clone();
        self.record.summary = summary;

        if let Some(dir) = self.config.report_dir.clone() {
            match write_run_report(&dir, &self.record) {
                Ok(paths) => self
                    .report
                    .note(&format!("Report written to {}", paths.root.display())),
                Err(err) => warn!(error = %format!("{err:#}"), "could not write run report"),
            }
        }

        if state == RunState::Done {
            self.report.finished();
            if self.config.pause_on_exit && self.host.console.is_interactive() {
                self.report.prompt("Press any key to exit...");
                if let Err(err) = self.host.console.wait_for_keypress() {
                    warn!(error = %format!("{err:#}"), "keypress wait failed");
                }
            }
        }
        self.enter(state);

        let outcome = RunOutcome {
            final_state: state,
            exit,
            results,
            summary,
            record: self.record,
        };
        (outcome, self.report.into_inner())
    }
}
