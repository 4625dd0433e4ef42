use crate::distros::{ConfigStore, RawDistroKey, StoreError};

/// Off Windows there is no Lxss key, which reads the same as an absent root.
#[derive(Debug, Default, Clone, Copy)]
pub struct LxssRegistry;

impl LxssRegistry {
    pub fn new() -> Self {
        Self
    }
}

impl ConfigStore for LxssRegistry {
    fn distro_keys(&self) -> Result<Option<Vec<RawDistroKey>>, StoreError> {
        Ok(None)
    }
}
