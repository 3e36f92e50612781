//! Version information for pdnode.

use std::fmt;

use crate::host::RuntimeInfo;

/// pdnode version from Cargo.toml
pub const PDNODE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bridge version plus the runtime it drives, if one has been selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub pdnode: &'static str,
    /// Runtime name, e.g. "Bun".
    pub runtime: Option<String>,
    pub runtime_version: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            pdnode: PDNODE_VERSION,
            runtime: None,
            runtime_version: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runtime(mut self, runtime: &RuntimeInfo) -> Self {
        self.runtime = Some(runtime.name.clone());
        self.runtime_version = Some(runtime.version.clone());
        self
    }
}

/// Startup banner, e.g. `pd-node v0.1.0 (Bun 1.1.38)`.
impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pd-node v{}", self.pdnode)?;
        match (&self.runtime, &self.runtime_version) {
            (Some(name), Some(version)) => write!(f, " ({name} {version})"),
            (Some(name), None) => write!(f, " ({name})"),
            _ => Ok(()),
        }
    }
}
