pub mod distros;
pub mod subsystem;

#[cfg_attr(not(windows), path = "registry_stub.rs")]
pub mod registry;

#[cfg_attr(not(windows), path = "elevation_stub.rs")]
pub mod elevation;

pub use distros::{list_distros, list_installed_distros, ConfigStore, RawDistroKey, StoreError};
pub use elevation::ProcessToken;
pub use registry::LxssRegistry;
pub use subsystem::{SubsystemControl, WslSubsystem};
