use anyhow::Result;
use wslcompact_safety::ElevationProbe;

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessToken;

impl ElevationProbe for ProcessToken {
    fn is_elevated(&self) -> Result<bool> {
        is_process_elevated()
    }
}

/// Root counts as elevated on Unix hosts.
pub fn is_process_elevated() -> Result<bool> {
    #[cfg(unix)]
    {
        Ok(unsafe { libc::geteuid() } == 0)
    }
    #[cfg(not(unix))]
    {
        Ok(false)
    }
}
