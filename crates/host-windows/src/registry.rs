use crate::distros::{
    ConfigStore, RawDistroKey, StoreError, BASE_PATH_VALUE, DISTRIBUTION_NAME_VALUE, LXSS_ROOT_KEY,
};
use tracing::debug;

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{
    ERROR_FILE_NOT_FOUND, ERROR_NO_MORE_ITEMS, ERROR_SUCCESS, WIN32_ERROR,
};
use windows::Win32::System::Registry::{
    RegCloseKey, RegEnumKeyExW, RegOpenKeyExW, RegQueryValueExW, HKEY, HKEY_CURRENT_USER,
    KEY_READ, REG_EXPAND_SZ, REG_SZ, REG_VALUE_TYPE,
};

// Registry key names are limited to 255 characters.
const MAX_KEY_NAME: usize = 256;

/// Reads distribution registrations from `HKCU\...\Lxss`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LxssRegistry;

impl LxssRegistry {
    pub fn new() -> Self {
        Self
    }
}

impl ConfigStore for LxssRegistry {
    fn distro_keys(&self) -> Result<Option<Vec<RawDistroKey>>, StoreError> {
        let Some(root) = open_key(HKEY_CURRENT_USER, LXSS_ROOT_KEY)
            .map_err(|status| access_error(LXSS_ROOT_KEY, "open", status))?
        else {
            return Ok(None);
        };

        let mut keys = Vec::new();
        for name in enum_subkeys(&root)? {
            let path = format!(r"{}\{}", LXSS_ROOT_KEY, name);
            let Some(child) =
                open_key(root.0, &name).map_err(|status| access_error(&path, "open", status))?
            else {
                // removed between enumeration and open
                continue;
            };
            let base_path = read_string_value(&child, BASE_PATH_VALUE)
                .map_err(|status| access_error(&path, BASE_PATH_VALUE, status))?;
            let distribution_name = read_string_value(&child, DISTRIBUTION_NAME_VALUE)
                .map_err(|status| access_error(&path, DISTRIBUTION_NAME_VALUE, status))?;
            debug!(key = %path, ?base_path, ?distribution_name, "read lxss entry");
            keys.push(RawDistroKey {
                key_name: name,
                base_path,
                distribution_name,
            });
        }
        Ok(Some(keys))
    }
}

struct OwnedKey(HKEY);

impl Drop for OwnedKey {
    fn drop(&mut self) {
        unsafe {
            let _ = RegCloseKey(self.0);
        }
    }
}

fn open_key(parent: HKEY, path: &str) -> Result<Option<OwnedKey>, WIN32_ERROR> {
    let path_wide = wide(path);
    let mut key = HKEY::default();
    let status =
        unsafe { RegOpenKeyExW(parent, PCWSTR(path_wide.as_ptr()), 0, KEY_READ, &mut key) };
    if status == ERROR_FILE_NOT_FOUND {
        return Ok(None);
    }
    if status != ERROR_SUCCESS {
        return Err(status);
    }
    Ok(Some(OwnedKey(key)))
}

fn enum_subkeys(key: &OwnedKey) -> Result<Vec<String>, StoreError> {
    let mut names = Vec::new();
    for index in 0u32.. {
        let mut buf = [0u16; MAX_KEY_NAME];
        let mut len = buf.len() as u32;
        let status = unsafe {
            RegEnumKeyExW(
                key.0,
                index,
                PWSTR(buf.as_mut_ptr()),
                &mut len,
                None,
                PWSTR::null(),
                None,
                None,
            )
        };
        if status == ERROR_NO_MORE_ITEMS {
            break;
        }
        if status != ERROR_SUCCESS {
            return Err(access_error(LXSS_ROOT_KEY, "enumerate", status));
        }
        names.push(String::from_utf16_lossy(&buf[..len as usize]));
    }
    Ok(names)
}

fn read_string_value(key: &OwnedKey, value: &str) -> Result<Option<String>, WIN32_ERROR> {
    let value_wide = wide(value);
    let mut kind = REG_VALUE_TYPE::default();
    let mut size = 0u32;

    let status = unsafe {
        RegQueryValueExW(
            key.0,
            PCWSTR(value_wide.as_ptr()),
            None,
            Some(&mut kind),
            None,
            Some(&mut size),
        )
    };
    if status == ERROR_FILE_NOT_FOUND {
        return Ok(None);
    }
    if status != ERROR_SUCCESS {
        return Err(status);
    }
    if kind != REG_SZ && kind != REG_EXPAND_SZ {
        return Ok(None);
    }

    let mut buf = vec![0u16; size as usize / 2 + 1];
    let mut size = (buf.len() * 2) as u32;
    let status = unsafe {
        RegQueryValueExW(
            key.0,
            PCWSTR(value_wide.as_ptr()),
            None,
            None,
            Some(buf.as_mut_ptr() as *mut u8),
            Some(&mut size),
        )
    };
    if status != ERROR_SUCCESS {
        return Err(status);
    }

    let chars = &buf[..(size as usize / 2).min(buf.len())];
    let end = chars.iter().position(|&c| c == 0).unwrap_or(chars.len());
    Ok(Some(String::from_utf16_lossy(&chars[..end])))
}

fn access_error(key: &str, operation: &str, status: WIN32_ERROR) -> StoreError {
    StoreError::Access {
        key: key.to_string(),
        reason: format!("{} failed with Win32 error {}", operation, status.0),
    }
}

fn wide(s: &str) -> Vec<u16> {
    use std::os::windows::prelude::*;
    std::ffi::OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}
