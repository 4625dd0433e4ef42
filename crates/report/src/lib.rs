use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use wslcompact_core::{
    format_gb, format_mb, format_size_gb, CompactionResult, DistroEntry, RunRecord, RunSummary,
};

pub const PHASE_COUNT: usize = 5;

const INDENT: &str = "      ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Shutdown = 1,
    Discover = 2,
    Compact = 3,
    Summarize = 4,
    WarmStart = 5,
}

impl Phase {
    pub fn title(&self) -> &'static str {
        match self {
            Phase::Shutdown => "Shutting down WSL",
            Phase::Discover => "Locating distribution disk images",
            Phase::Compact => "Compacting disk images",
            Phase::Summarize => "Summary",
            Phase::WarmStart => "Restarting WSL",
        }
    }
}

/// Human-readable progress report. Write errors on the console are dropped.
pub struct ConsoleReport<W: Write> {
    out: W,
}

impl<W: Write> ConsoleReport<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, args: fmt::Arguments<'_>) {
        if let Err(err) = writeln!(self.out, "{}", args) {
            tracing::debug!(error = %err, "console write failed");
        }
    }

    pub fn banner(&mut self) {
        self.line(format_args!("WSL disk compaction"));
        self.line(format_args!("==================="));
    }

    pub fn phase(&mut self, phase: Phase) {
        self.line(format_args!(""));
        self.line(format_args!("[{}/{}] {}", phase as usize, PHASE_COUNT, phase.title()));
    }

    pub fn note(&mut self, message: &str) {
        self.line(format_args!("  {}", message));
    }

    pub fn discovered(&mut self, entries: &[DistroEntry]) {
        if entries.is_empty() {
            self.note("No WSL2 distributions with a disk image were found.");
            return;
        }
        self.note(&format!("Found {} distribution(s):", entries.len()));
        for entry in entries {
            self.line(format_args!("    - {} ({})", entry.name, entry.vhd_path.display()));
        }
    }

    pub fn item_start(&mut self, index: usize, total: usize, entry: &DistroEntry) {
        self.line(format_args!(""));
        self.line(format_args!("  ({}/{}) {}", index, total, entry.name));
        self.line(format_args!("{}{}", INDENT, entry.vhd_path.display()));
    }

    pub fn item_result(&mut self, result: &CompactionResult) {
        if result.success {
            let before = format_size_gb(result.size_before_bytes);
            let after = format_size_gb(result.size_after_bytes);
            self.line(format_args!("{}Initial size: {}", INDENT, before));
            self.line(format_args!("{}Final size:   {}", INDENT, after));
            self.line(format_args!(
                "{}Reclaimed:    {} ({})",
                INDENT,
                format_mb(result.saved_bytes),
                format_gb(result.saved_bytes)
            ));
            self.line(format_args!("{}[OK]", INDENT));
        } else {
            if result.size_before_bytes > 0 {
                let before = format_size_gb(result.size_before_bytes);
                self.line(format_args!("{}Initial size: {}", INDENT, before));
            }
            self.line(format_args!("{}[FAILED] {} was not compacted:", INDENT, result.name));
            for diag in result.diagnostic_output.lines().filter(|line| !line.trim().is_empty()) {
                self.line(format_args!("{}  {}", INDENT, diag.trim_end()));
            }
        }
    }

    pub fn summary(&mut self, summary: &RunSummary) {
        for line in render_summary(summary).lines() {
            self.note(line);
        }
    }

    pub fn finished(&mut self) {
        self.line(format_args!(""));
        self.line(format_args!("Done."));
    }

    pub fn prompt(&mut self, message: &str) {
        if let Err(err) = write!(self.out, "{}", message).and_then(|_| self.out.flush()) {
            tracing::debug!(error = %err, "console write failed");
        }
    }
}

pub fn render_summary(summary: &RunSummary) -> String {
    format!(
        "Disks processed: {}\nSucceeded:       {}\nFailed:          {}\nTotal reclaimed: {} ({})\n",
        summary.processed_count,
        summary.succeeded_count(),
        summary.failed_count,
        format_mb(summary.total_saved_bytes),
        format_gb(summary.total_saved_bytes),
    )
}

#[derive(Debug, Serialize)]
pub struct ReportPaths {
    pub run_id: String,
    pub root: PathBuf,
    pub run_json: PathBuf,
    pub summary_txt: PathBuf,
}

pub fn write_run_report(base: impl AsRef<Path>, record: &RunRecord) -> Result<ReportPaths> {
    let run_id = record.run_id.to_string();
    let root = base.as_ref().join("reports").join(&run_id);
    std::fs::create_dir_all(&root).with_context(|| format!("create {}", root.display()))?;

    let run_json = root.join("run.json");
    let summary_txt = root.join("summary.txt");

    std::fs::write(&run_json, record.to_pretty_json()?)
        .with_context(|| format!("write {}", run_json.display()))?;
    std::fs::write(&summary_txt, render_summary(&record.summary))
        .with_context(|| format!("write {}", summary_txt.display()))?;

    Ok(ReportPaths {
        run_id,
        root,
        run_json,
        summary_txt,
    })
}
