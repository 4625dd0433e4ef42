use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

pub const RUN_RECORD_SCHEMA_VERSION: &str = "1.0.0";

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One installed distribution whose backing disk file existed at discovery time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DistroEntry {
    pub name: String,
    pub vhd_path: PathBuf,
}

impl DistroEntry {
    pub fn new(name: impl Into<String>, vhd_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            vhd_path: vhd_path.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    pub name: String,
    pub size_before_bytes: u64,
    pub size_after_bytes: u64,
    pub saved_bytes: i64, // may be <= 0 when nothing was reclaimed
    pub success: bool,
    pub diagnostic_output: String,
}

impl CompactionResult {
    pub fn succeeded(
        name: impl Into<String>,
        size_before_bytes: u64,
        size_after_bytes: u64,
        output: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            size_before_bytes,
            size_after_bytes,
            saved_bytes: byte_delta(size_before_bytes, size_after_bytes),
            success: true,
            diagnostic_output: output.into(),
        }
    }

    /// A failed result never reports savings; the size is left at its last known value.
    pub fn failed(
        name: impl Into<String>,
        size_before_bytes: u64,
        diagnostic: impl Into<String>,
    ) -> Self {
        let mut diagnostic_output = diagnostic.into();
        if diagnostic_output.trim().is_empty() {
            diagnostic_output = "compaction failed without diagnostic output".to_string();
        }
        Self {
            name: name.into(),
            size_before_bytes,
            size_after_bytes: size_before_bytes,
            saved_bytes: 0,
            success: false,
            diagnostic_output,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total_saved_bytes: i64,
    pub processed_count: usize,
    pub failed_count: usize,
}

impl RunSummary {
    pub fn absorb(mut self, result: &CompactionResult) -> Self {
        self.processed_count += 1;
        if result.success {
            self.total_saved_bytes = self.total_saved_bytes.saturating_add(result.saved_bytes);
        } else {
            self.failed_count += 1;
        }
        self
    }

    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a CompactionResult>) -> Self {
        results
            .into_iter()
            .fold(RunSummary::default(), |summary, result| summary.absorb(result))
    }

    pub fn succeeded_count(&self) -> usize {
        self.processed_count - self.failed_count
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub schema_version: String,
    pub started_at_utc: String,
    pub finished_at_utc: String,
    pub final_state: String,
    pub exit_code: i32,
    pub results: Vec<CompactionResult>,
    pub summary: RunSummary,
}

impl RunRecord {
    pub fn new(started_at_utc: String) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            schema_version: RUN_RECORD_SCHEMA_VERSION.to_string(),
            started_at_utc,
            finished_at_utc: String::new(),
            final_state: String::new(),
            exit_code: 0,
            results: Vec::new(),
            summary: RunSummary::default(),
        }
    }

    pub fn to_pretty_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn byte_delta(before: u64, after: u64) -> i64 {
    let delta = before as i128 - after as i128;
    delta.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

pub fn format_gb(bytes: i64) -> String {
    format!("{:.2} GB", bytes as f64 / BYTES_PER_GB)
}

pub fn format_mb(bytes: i64) -> String {
    format!("{:.2} MB", bytes as f64 / BYTES_PER_MB)
}

pub fn format_size_gb(bytes: u64) -> String {
    format!("{:.2} GB", bytes as f64 / BYTES_PER_GB)
}

pub fn now_utc_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gib(value: f64) -> u64 {
        (value * BYTES_PER_GB).round() as u64
    }

    #[test]
    fn saved_bytes_is_exact_difference() {
        let result = CompactionResult::succeeded("Ubuntu", 1_000, 400, "");
        assert_eq!(result.saved_bytes, 600);

        let grown = CompactionResult::succeeded("Ubuntu", 400, 1_000, "");
        assert_eq!(grown.saved_bytes, -600);
        assert!(grown.success);
    }

    #[test]
    fn failed_result_carries_diagnostic() {
        let result = CompactionResult::failed("Debian", 512, "");
        assert!(!result.success);
        assert_eq!(result.saved_bytes, 0);
        assert_eq!(result.size_after_bytes, 512);
        assert!(!result.diagnostic_output.is_empty());
    }

    #[test]
    fn summary_counts_only_successful_savings() {
        let results = vec![
            CompactionResult::succeeded("a", 1_000, 100, ""),
            CompactionResult::failed("b", 5_000, "locked"),
            CompactionResult::succeeded("c", 300, 300, ""),
        ];
        let summary = RunSummary::from_results(&results);
        assert_eq!(summary.total_saved_bytes, 900);
        assert_eq!(summary.processed_count, 3);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.succeeded_count(), 2);
    }

    #[test]
    fn formats_two_distro_example() {
        let ubuntu = CompactionResult::succeeded("Ubuntu", gib(15.40), gib(8.20), "");
        let kali = CompactionResult::succeeded("Kali-Linux", gib(32.10), gib(30.05), "");

        assert_eq!(format_size_gb(ubuntu.size_before_bytes), "15.40 GB");
        assert_eq!(format_size_gb(ubuntu.size_after_bytes), "8.20 GB");
        assert_eq!(format_mb(ubuntu.saved_bytes), "7372.80 MB");
        assert_eq!(format_mb(kali.saved_bytes), "2099.20 MB");

        let summary = RunSummary::from_results([&ubuntu, &kali]);
        assert_eq!(format_gb(summary.total_saved_bytes), "9.25 GB");
    }

    #[test]
    fn run_record_serializes() {
        let mut record = RunRecord::new(now_utc_rfc3339());
        record.results.push(CompactionResult::succeeded("Ubuntu", 10, 4, "ok"));
        record.summary = RunSummary::from_results(&record.results);
        let json = record.to_pretty_json().unwrap();
        assert!(json.contains("\"total_saved_bytes\": 6"));
        assert!(json.contains(RUN_RECORD_SCHEMA_VERSION));
    }
}
