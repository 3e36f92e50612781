//! Runtime discovery: which executable runs a given script.
//!
//! Bun is preferred when present. TypeScript sources (`.ts`, `.tsx`) require Bun;
//! plain JavaScript falls back to Node.js.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use pdnode::{RuntimeInfo, RuntimeSelector};

use crate::error::{HostError, Result};

const BUN_GUIDANCE: &str = "TypeScript files require Bun runtime.
Install Bun: https://bun.sh
  curl -fsSL https://bun.sh/install | bash

Alternatively, transpile to JavaScript first.";

const ANY_GUIDANCE: &str = "No JavaScript runtime found.
Install one of the following:

Bun (recommended - fast, TypeScript support):
  https://bun.sh
  curl -fsSL https://bun.sh/install | bash

Node.js (compatible):
  https://nodejs.org
  brew install node (macOS)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    JavaScript,
    TypeScript,
}

impl ScriptKind {
    pub fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("ts" | "tsx") => Self::TypeScript,
            _ => Self::JavaScript,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Bun,
    Node,
}

impl RuntimeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bun => "Bun",
            Self::Node => "Node.js",
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            Self::Bun => "bun",
            Self::Node => "node",
        }
    }
}

/// Selects a runtime by searching directories for `bun` and `node`, or uses a
/// fixed executable when one was given explicitly.
#[derive(Debug, Clone)]
pub struct PathRuntimeSelector {
    search_path: Vec<PathBuf>,
    explicit: Option<PathBuf>,
}

impl PathRuntimeSelector {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self {
            search_path,
            explicit: None,
        }
    }

    /// Search the directories listed in `PATH`.
    pub fn from_env() -> Self {
        let path = std::env::var_os("PATH").unwrap_or_else(OsString::new);
        Self::new(std::env::split_paths(&path).collect())
    }

    /// Always use `executable`, skipping discovery.
    pub fn with_explicit(mut self, executable: impl Into<PathBuf>) -> Self {
        self.explicit = Some(executable.into());
        self
    }

    pub fn find(&self, runtime: RuntimeKind) -> Option<PathBuf> {
        find_executable(&self.search_path, runtime.command())
    }

    /// Availability of every known runtime.
    pub fn report(&self) -> RuntimeReport {
        let probe = |kind| {
            self.find(kind).map(|executable| RuntimeInfo {
                name: kind.name().to_string(),
                version: runtime_version(&executable),
                executable,
            })
        };
        RuntimeReport {
            bun: probe(RuntimeKind::Bun),
            node: probe(RuntimeKind::Node),
        }
    }

    fn select_explicit(&self, executable: &Path) -> Result<RuntimeInfo> {
        if !is_executable(executable) {
            return Err(HostError::RuntimeNotFound(executable.to_path_buf()));
        }
        let executable =
            std::path::absolute(executable).map_err(|source| HostError::Resolve {
                path: executable.to_path_buf(),
                source,
            })?;
        let name = executable
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| executable.display().to_string());
        let name = match name.as_str() {
            "bun" => RuntimeKind::Bun.name().to_string(),
            "node" => RuntimeKind::Node.name().to_string(),
            _ => name,
        };
        Ok(RuntimeInfo {
            name,
            version: runtime_version(&executable),
            executable,
        })
    }
}

impl RuntimeSelector for PathRuntimeSelector {
    type Error = HostError;

    fn select(&self, script: &Path) -> Result<RuntimeInfo> {
        if let Some(executable) = &self.explicit {
            return self.select_explicit(executable);
        }

        let candidates: &[RuntimeKind] = match ScriptKind::of(script) {
            ScriptKind::TypeScript => &[RuntimeKind::Bun],
            ScriptKind::JavaScript => &[RuntimeKind::Bun, RuntimeKind::Node],
        };

        for &kind in candidates {
            if let Some(executable) = self.find(kind) {
                tracing::debug!(runtime = kind.name(), executable = %executable.display(), "Found runtime");
                return Ok(RuntimeInfo {
                    name: kind.name().to_string(),
                    version: runtime_version(&executable),
                    executable,
                });
            }
        }

        let guidance = match ScriptKind::of(script) {
            ScriptKind::TypeScript => BUN_GUIDANCE,
            ScriptKind::JavaScript => ANY_GUIDANCE,
        };
        Err(HostError::NoRuntime {
            guidance: guidance.to_string(),
        })
    }
}

/// Result of probing for every known runtime.
#[derive(Debug, Clone)]
pub struct RuntimeReport {
    pub bun: Option<RuntimeInfo>,
    pub node: Option<RuntimeInfo>,
}

impl fmt::Display for RuntimeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pd-node runtime detection:")?;
        for (kind, info) in [(RuntimeKind::Bun, &self.bun), (RuntimeKind::Node, &self.node)] {
            match info {
                Some(info) => writeln!(
                    f,
                    "  {}: {} ({})",
                    kind.name(),
                    info.version,
                    info.executable.display()
                )?,
                None => writeln!(f, "  {}: not found", kind.name())?,
            }
        }
        if self.bun.is_none() && self.node.is_none() {
            writeln!(f)?;
            writeln!(f, "No runtime available. Install Bun or Node.js.")?;
        }
        Ok(())
    }
}

fn find_executable(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    dirs.iter()
        .filter(|dir| dir.is_absolute())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// First line of `<runtime> --version`, or "unknown".
fn runtime_version(executable: &Path) -> String {
    let mut attempts = 0;
    let probe = loop {
        attempts += 1;
        match Command::new(executable).arg("--version").output() {
            Err(e) if e.kind() == io::ErrorKind::ExecutableFileBusy && attempts < 3 => {
                std::thread::sleep(Duration::from_millis(10));
            }
            result => break result,
        }
    };

    match probe {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
        Ok(output) => {
            tracing::debug!(executable = %executable.display(), status = %output.status, "Version probe failed");
            "unknown".to_string()
        }
        Err(e) => {
            tracing::warn!(executable = %executable.display(), error = %e, "Failed to run version probe");
            "unknown".to_string()
        }
    }
}
