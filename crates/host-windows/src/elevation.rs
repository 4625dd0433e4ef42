use anyhow::{anyhow, Result};
use std::ffi::c_void;
use std::mem::size_of;
use wslcompact_safety::ElevationProbe;

use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

/// Elevation as reported by the current process token.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessToken;

impl ElevationProbe for ProcessToken {
    fn is_elevated(&self) -> Result<bool> {
        is_process_elevated()
    }
}

pub fn is_process_elevated() -> Result<bool> {
    let mut token = HANDLE::default();
    unsafe {
        OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token)
            .map_err(|error| anyhow!("OpenProcessToken failed: {:?}", error))?;
    }

    let mut elevation = TOKEN_ELEVATION::default();
    let mut returned = 0u32;
    let query = unsafe {
        GetTokenInformation(
            token,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut c_void),
            size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        )
    };
    unsafe {
        let _ = CloseHandle(token);
    }
    query.map_err(|error| anyhow!("GetTokenInformation failed: {:?}", error))?;

    Ok(elevation.TokenIsElevated != 0)
}
