use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

pub const DISKPART_PROGRAM: &str = "diskpart.exe";

/// diskpart can exit 0 while printing this, so the exit code alone does not prove success.
pub const INTERNAL_ERROR_MARKER: &str = "DiskPart has encountered an error";

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtilityOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl UtilityOutput {
    pub fn text(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Runs the compaction utility against a script file and waits for it to exit.
pub trait UtilityRunner {
    fn run_script(&self, script_path: &Path) -> Result<UtilityOutput>;
}

#[derive(Debug, Clone)]
pub struct DiskpartRunner {
    program: PathBuf,
}

impl Default for DiskpartRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskpartRunner {
    pub fn new() -> Self {
        Self::with_program(DISKPART_PROGRAM)
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl UtilityRunner for DiskpartRunner {
    fn run_script(&self, script_path: &Path) -> Result<UtilityOutput> {
        let mut command = Command::new(&self.program);
        command
            .arg("/s")
            .arg(script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        debug!(
            program = %self.program.display(),
            script = %script_path.display(),
            "running diskpart"
        );
        let output = command
            .output()
            .with_context(|| format!("run {}", self.program.display()))?;
        Ok(UtilityOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Select, attach without mounting, compact, detach. The order is required by diskpart.
pub fn render_script(vhd_path: &Path) -> Result<String> {
    let path = vhd_path
        .to_str()
        .ok_or_else(|| anyhow!("disk path is not valid Unicode: {}", vhd_path.display()))?;
    if !path.is_ascii() {
        return Err(anyhow!("disk path cannot be written to an ASCII script: {}", path));
    }
    if path.contains('"') {
        return Err(anyhow!("disk path contains a quote character: {}", path));
    }

    Ok([
        format!("select vdisk file=\"{}\"", path),
        "attach vdisk readonly".to_string(),
        "compact vdisk".to_string(),
        "detach vdisk".to_string(),
    ]
    .iter()
    .map(|line| format!("{}\r\n", line))
    .collect())
}

pub fn write_script(script_path: &Path, contents: &str) -> Result<()> {
    std::fs::write(script_path, contents.as_bytes())
        .with_context(|| format!("write diskpart script {}", script_path.display()))
}

/// Exit code zero and no internal-error marker in the captured text.
pub fn check_success(output: &UtilityOutput) -> Result<(), String> {
    match output.exit_code {
        Some(0) => {}
        Some(code) => return Err(format!("diskpart exited with code {}", code)),
        None => return Err("diskpart was terminated before exiting".to_string()),
    }
    if output.text().contains(INTERNAL_ERROR_MARKER) {
        return Err("diskpart reported an internal error".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(code: Option<i32>, stdout: &str) -> UtilityOutput {
        UtilityOutput {
            exit_code: code,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    #[test]
    fn script_orders_commands() {
        let path = Path::new(r"C:\wsl\Ubuntu\ext4.vhdx");
        let script = render_script(path).unwrap();
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"select vdisk file="C:\wsl\Ubuntu\ext4.vhdx""#,
                "attach vdisk readonly",
                "compact vdisk",
                "detach vdisk",
            ]
        );
        assert!(script.ends_with("\r\n"));
        assert!(script.is_ascii());
    }

    #[test]
    fn script_rejects_non_ascii_path() {
        assert!(render_script(Path::new(r"C:\Benutzer\Jürgen\ext4.vhdx")).is_err());
    }

    #[test]
    fn zero_exit_with_marker_is_failure() {
        let text = format!(
            "Microsoft DiskPart version 10.0\n\n{}. See the System Event Log.",
            INTERNAL_ERROR_MARKER
        );
        let err = check_success(&output(Some(0), &text)).unwrap_err();
        assert!(err.contains("internal error"));
    }

    #[test]
    fn nonzero_exit_is_failure() {
        assert!(check_success(&output(Some(2), "Virtual Disk Service error")).is_err());
        assert!(check_success(&output(None, "")).is_err());
    }

    #[test]
    fn clean_zero_exit_is_success() {
        let text = "DiskPart successfully compacted the virtual disk file.";
        assert!(check_success(&output(Some(0), text)).is_ok());
    }

    #[test]
    fn missing_program_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let script = temp.path().join("script.txt");
        write_script(&script, "rem\r\n").unwrap();
        let runner = DiskpartRunner::with_program(temp.path().join("no-such-diskpart"));
        assert!(runner.run_script(&script).is_err());
    }
}
