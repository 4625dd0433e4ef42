use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use wslcompact_core::DistroEntry;

/// Per-user key under which WSL registers each distribution as a GUID-named child.
pub const LXSS_ROOT_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Lxss";
pub const BASE_PATH_VALUE: &str = "BasePath";
pub const DISTRIBUTION_NAME_VALUE: &str = "DistributionName";
pub const VHD_FILE_NAME: &str = "ext4.vhdx";

const VERBATIM_PREFIX: &str = r"\\?\";

/// Values read from one child key of the Lxss root, before any validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDistroKey {
    pub key_name: String,
    pub base_path: Option<String>,
    pub distribution_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot read registry key {key}: {reason}")]
    Access { key: String, reason: String },
}

pub trait ConfigStore {
    /// `Ok(None)` when the root key does not exist at all.
    fn distro_keys(&self) -> Result<Option<Vec<RawDistroKey>>, StoreError>;
}

pub fn list_installed_distros(store: &dyn ConfigStore) -> Result<Vec<DistroEntry>, StoreError> {
    list_distros(store, &|name| std::env::var(name).ok())
}

pub fn list_distros(
    store: &dyn ConfigStore,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<Vec<DistroEntry>, StoreError> {
    let Some(keys) = store.distro_keys()? else {
        debug!(root = LXSS_ROOT_KEY, "lxss root key absent");
        return Ok(Vec::new());
    };

    let mut entries = Vec::new();
    for key in keys {
        let Some(base) = key.base_path.as_deref().filter(|value| !value.trim().is_empty()) else {
            debug!(key = %key.key_name, "skipping entry without base path");
            continue;
        };

        let vhd_path = resolve_vhd_path(base, env);
        if !vhd_path.is_file() {
            // WSL1 distributions have a base path but no disk image
            debug!(
                key = %key.key_name,
                path = %vhd_path.display(),
                "disk image not found, skipping"
            );
            continue;
        }

        let name = key
            .distribution_name
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(key.key_name);
        debug!(%name, path = %vhd_path.display(), "discovered distribution");
        entries.push(DistroEntry::new(name, vhd_path));
    }
    Ok(entries)
}

fn resolve_vhd_path(base: &str, env: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    let expanded = expand_placeholders(base.trim(), env);
    let expanded = expanded
        .strip_prefix(VERBATIM_PREFIX)
        .map(str::to_string)
        .unwrap_or(expanded);
    Path::new(&expanded).join(VHD_FILE_NAME)
}

/// Expands `%NAME%` placeholders. Unknown names and `%%` stay verbatim, a lone `%` is literal.
/// After an unknown name the closing `%` may still open the next placeholder.
pub fn expand_placeholders(input: &str, env: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('%') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = &after[..end];
        match (!name.is_empty()).then(|| env(name)).flatten() {
            Some(value) => {
                out.push_str(&value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('%');
                out.push_str(name);
                rest = &after[end..];
            }
        }
    }

    out.push_str(rest);
    out
}
