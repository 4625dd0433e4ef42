use anyhow::Result;
use thiserror::Error;

/// Answers whether the current process runs with an administrative token.
pub trait ElevationProbe {
    fn is_elevated(&self) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub enum SafetyDecision {
    Allow,
    Deny(String),
}

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("administrator privileges are required: {0}")]
    NotElevated(String),
}

pub fn can_mutate_host(probe: &dyn ElevationProbe) -> SafetyDecision {
    match probe.is_elevated() {
        Ok(true) => SafetyDecision::Allow,
        Ok(false) => SafetyDecision::Deny(
            "Denied: run this tool from an elevated (Administrator) shell".to_string(),
        ),
        Err(err) => {
            SafetyDecision::Deny(format!("Denied: elevation could not be verified ({err:#})"))
        }
    }
}

/// Precondition for every mutating step. Called once, before anything else runs.
pub fn require_elevated(probe: &dyn ElevationProbe) -> Result<(), PermissionError> {
    match can_mutate_host(probe) {
        SafetyDecision::Allow => Ok(()),
        SafetyDecision::Deny(reason) => {
            tracing::error!(%reason, "privilege check failed");
            Err(PermissionError::NotElevated(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FixedProbe(Option<bool>);

    impl ElevationProbe for FixedProbe {
        fn is_elevated(&self) -> Result<bool> {
            self.0.ok_or_else(|| anyhow!("token query failed"))
        }
    }

    #[test]
    fn denies_when_not_elevated() {
        assert!(matches!(
            can_mutate_host(&FixedProbe(Some(false))),
            SafetyDecision::Deny(_)
        ));
        assert!(require_elevated(&FixedProbe(Some(false))).is_err());
    }

    #[test]
    fn denies_when_probe_fails() {
        let err = require_elevated(&FixedProbe(None)).unwrap_err();
        assert!(err.to_string().contains("token query failed"));
    }

    #[test]
    fn allows_when_elevated() {
        assert!(matches!(
            can_mutate_host(&FixedProbe(Some(true))),
            SafetyDecision::Allow
        ));
        assert!(require_elevated(&FixedProbe(Some(true))).is_ok());
    }
}
