use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

pub const WSL_PROGRAM: &str = "wsl.exe";

const SHUTDOWN_ARGS: &[&str] = &["--shutdown"];
// Runs a no-op inside the default distribution so the VM boots without opening a shell.
const WARM_START_ARGS: &[&str] = &["--exec", "true"];

pub trait SubsystemControl {
    fn shutdown(&self) -> Result<()>;
    fn warm_start(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct WslSubsystem {
    program: PathBuf,
}

impl Default for WslSubsystem {
    fn default() -> Self {
        Self::new()
    }
}

impl WslSubsystem {
    pub fn new() -> Self {
        Self::with_program(WSL_PROGRAM)
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        let command_line = format!("{} {}", self.program.display(), args.join(" "));
        debug!(command = %command_line, "running wsl");
        let output = Command::new(&self.program)
            .args(args)
            // wsl.exe writes UTF-16 to pipes unless told otherwise
            .env("WSL_UTF8", "1")
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("run {}", command_line))?;
        if output.status.success() {
            Ok(())
        } else {
            let mut detail = decode_console_output(&output.stderr);
            if detail.trim().is_empty() {
                detail = decode_console_output(&output.stdout);
            }
            Err(anyhow!(
                "{} failed ({}): {}",
                command_line,
                output.status,
                detail.trim()
            ))
        }
    }
}

impl SubsystemControl for WslSubsystem {
    fn shutdown(&self) -> Result<()> {
        self.run(SHUTDOWN_ARGS)
    }

    fn warm_start(&self) -> Result<()> {
        self.run(WARM_START_ARGS)
    }
}

/// Decodes console bytes, accepting the UTF-16LE that older wsl.exe builds emit.
pub fn decode_console_output(bytes: &[u8]) -> String {
    let looks_utf16 = bytes.len() >= 2
        && bytes.len() % 2 == 0
        && bytes.iter().skip(1).step_by(2).filter(|&&b| b == 0).count() * 2 >= bytes.len() / 2;
    if looks_utf16 {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units)
            .trim_start_matches('\u{feff}')
            .to_string();
    }
    String::from_utf8_lossy(bytes).to_string()
}
