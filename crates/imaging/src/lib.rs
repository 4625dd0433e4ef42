pub mod diskpart;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use wslcompact_core::{CompactionResult, DistroEntry};

pub use diskpart::{
    check_success, render_script, DiskpartRunner, UtilityOutput, UtilityRunner,
    INTERNAL_ERROR_MARKER,
};

pub const SCRIPT_FILE_NAME: &str = "wslcompact_diskpart.txt";

pub trait Compactor {
    /// Expected failures come back as `success == false`, never as a panic.
    fn compact(&self, entry: &DistroEntry) -> CompactionResult;
    fn cleanup(&self) -> Result<()>;
}

pub fn default_script_path() -> PathBuf {
    std::env::temp_dir().join(SCRIPT_FILE_NAME)
}

/// Compacts one disk image at a time. The script path is shared by every call,
/// so a single instance must not be driven from more than one thread.
#[derive(Debug, Clone)]
pub struct DiskCompactor<R = DiskpartRunner> {
    runner: R,
    script_path: PathBuf,
}

impl DiskCompactor<DiskpartRunner> {
    pub fn new() -> Self {
        Self::with_runner(DiskpartRunner::new(), default_script_path())
    }
}

impl Default for DiskCompactor<DiskpartRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: UtilityRunner> DiskCompactor<R> {
    pub fn with_runner(runner: R, script_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            script_path: script_path.into(),
        }
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    fn run_compaction(&self, entry: &DistroEntry, size_before: u64) -> CompactionResult {
        let script = match diskpart::render_script(&entry.vhd_path) {
            Ok(script) => script,
            Err(err) => {
                return CompactionResult::failed(&entry.name, size_before, format!("{err:#}"))
            }
        };
        if let Err(err) = diskpart::write_script(&self.script_path, &script) {
            return CompactionResult::failed(&entry.name, size_before, format!("{err:#}"));
        }

        let output = match self.runner.run_script(&self.script_path) {
            Ok(output) => output,
            Err(err) => {
                return CompactionResult::failed(&entry.name, size_before, format!("{err:#}"))
            }
        };
        debug!(name = %entry.name, exit_code = ?output.exit_code, "diskpart finished");

        if let Err(reason) = check_success(&output) {
            warn!(name = %entry.name, %reason, "compaction failed");
            return CompactionResult::failed(
                &entry.name,
                size_before,
                format!("{}\n{}", reason, output.text().trim_end()),
            );
        }

        match file_size(&entry.vhd_path) {
            Ok(size_after) => {
                info!(name = %entry.name, size_before, size_after, "compaction finished");
                CompactionResult::succeeded(&entry.name, size_before, size_after, output.text())
            }
            Err(err) => CompactionResult::failed(
                &entry.name,
                size_before,
                format!("compaction finished but the final size is unreadable: {err:#}"),
            ),
        }
    }
}

impl<R: UtilityRunner> Compactor for DiskCompactor<R> {
    fn compact(&self, entry: &DistroEntry) -> CompactionResult {
        match file_size(&entry.vhd_path) {
            Ok(size_before) => self.run_compaction(entry, size_before),
            Err(err) => {
                warn!(
                    name = %entry.name,
                    error = %format!("{err:#}"),
                    "cannot read disk size, skipping"
                );
                CompactionResult::failed(&entry.name, 0, format!("{err:#}"))
            }
        }
    }

    fn cleanup(&self) -> Result<()> {
        match std::fs::remove_file(&self.script_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("remove diskpart script {}", self.script_path.display())),
        }
    }
}

fn file_size(path: &Path) -> Result<u64> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("read size of {}", path.display()))?;
    Ok(metadata.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;

    /// Records each script it is handed and shrinks the image to `shrink_to`.
    struct StubRunner {
        exit_code: Option<i32>,
        stdout: String,
        target: PathBuf,
        shrink_to: Option<u64>,
        scripts: RefCell<Vec<String>>,
    }

    impl StubRunner {
        fn new(target: &Path, exit_code: i32, stdout: &str, shrink_to: Option<u64>) -> Self {
            Self {
                exit_code: Some(exit_code),
                stdout: stdout.to_string(),
                target: target.to_path_buf(),
                shrink_to,
                scripts: RefCell::new(Vec::new()),
            }
        }
    }

    impl UtilityRunner for StubRunner {
        fn run_script(&self, script_path: &Path) -> Result<UtilityOutput> {
            self.scripts.borrow_mut().push(fs::read_to_string(script_path)?);
            if let Some(size) = self.shrink_to {
                let current = fs::metadata(&self.target)?.len();
                fs::OpenOptions::new()
                    .write(true)
                    .open(&self.target)?
                    .set_len(size.min(current))?;
            }
            Ok(UtilityOutput {
                exit_code: self.exit_code,
                stdout: self.stdout.clone(),
                stderr: String::new(),
            })
        }
    }

    fn image(dir: &Path, size: u64) -> PathBuf {
        let path = dir.join("ext4.vhdx");
        fs::File::create(&path).unwrap().set_len(size).unwrap();
        path
    }

    #[test]
    fn successful_compaction_reports_delta() {
        let temp = tempfile::tempdir().unwrap();
        let vhd = image(temp.path(), 10_000);
        let stdout = "DiskPart successfully compacted the virtual disk file.";
        let runner = StubRunner::new(&vhd, 0, stdout, Some(4_000));
        let compactor = DiskCompactor::with_runner(runner, temp.path().join(SCRIPT_FILE_NAME));

        let result = compactor.compact(&DistroEntry::new("Ubuntu", &vhd));
        assert!(result.success);
        assert_eq!(result.size_before_bytes, 10_000);
        assert_eq!(result.size_after_bytes, 4_000);
        assert_eq!(result.saved_bytes, 6_000);

        let scripts = compactor.runner.scripts.borrow();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].contains(&format!("select vdisk file=\"{}\"", vhd.display())));
    }

    #[test]
    fn second_pass_on_minimal_image_saves_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let vhd = image(temp.path(), 8_192);
        let runner = StubRunner::new(&vhd, 0, "done", Some(2_048));
        let compactor = DiskCompactor::with_runner(runner, temp.path().join(SCRIPT_FILE_NAME));
        let entry = DistroEntry::new("Debian", &vhd);

        let first = compactor.compact(&entry);
        let second = compactor.compact(&entry);
        assert_eq!(first.saved_bytes, 6_144);
        assert!(second.success);
        assert_eq!(second.saved_bytes, 0);
    }

    #[test]
    fn missing_image_is_item_failure() {
        let temp = tempfile::tempdir().unwrap();
        let vhd = temp.path().join("missing").join("ext4.vhdx");
        let runner = StubRunner::new(&vhd, 0, "", None);
        let compactor = DiskCompactor::with_runner(runner, temp.path().join(SCRIPT_FILE_NAME));

        let result = compactor.compact(&DistroEntry::new("Gone", &vhd));
        assert!(!result.success);
        assert!(!result.diagnostic_output.is_empty());
        assert!(compactor.runner.scripts.borrow().is_empty());
    }

    #[test]
    fn marker_with_zero_exit_is_item_failure() {
        let temp = tempfile::tempdir().unwrap();
        let vhd = image(temp.path(), 4_096);
        let stdout = format!(
            "{}. For more information, see the System Event Log.",
            INTERNAL_ERROR_MARKER
        );
        let runner = StubRunner::new(&vhd, 0, &stdout, Some(1_024));
        let compactor = DiskCompactor::with_runner(runner, temp.path().join(SCRIPT_FILE_NAME));

        let result = compactor.compact(&DistroEntry::new("Kali-Linux", &vhd));
        assert!(!result.success);
        assert_eq!(result.saved_bytes, 0);
        assert!(result.diagnostic_output.contains(INTERNAL_ERROR_MARKER));
    }

    #[test]
    fn nonzero_exit_echoes_output() {
        let temp = tempfile::tempdir().unwrap();
        let vhd = image(temp.path(), 4_096);
        let runner = StubRunner::new(&vhd, 1, "The process cannot access the file", None);
        let compactor = DiskCompactor::with_runner(runner, temp.path().join(SCRIPT_FILE_NAME));

        let result = compactor.compact(&DistroEntry::new("Ubuntu", &vhd));
        assert!(!result.success);
        assert!(result.diagnostic_output.contains("cannot access the file"));
    }

    #[test]
    fn runner_error_is_item_failure() {
        let temp = tempfile::tempdir().unwrap();
        let vhd = image(temp.path(), 4_096);
        let compactor = DiskCompactor::with_runner(
            DiskpartRunner::with_program(temp.path().join("no-such-diskpart")),
            temp.path().join(SCRIPT_FILE_NAME),
        );
        let result = compactor.compact(&DistroEntry::new("Ubuntu", &vhd));
        assert!(!result.success);
        assert!(result.diagnostic_output.contains("no-such-diskpart"));
    }

    #[test]
    fn cleanup_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let vhd = image(temp.path(), 1_024);
        let script = temp.path().join(SCRIPT_FILE_NAME);
        let compactor = DiskCompactor::with_runner(StubRunner::new(&vhd, 0, "", None), &script);

        compactor.compact(&DistroEntry::new("Ubuntu", &vhd));
        assert!(script.exists());
        compactor.cleanup().unwrap();
        assert!(!script.exists());
        compactor.cleanup().unwrap();
    }
}
