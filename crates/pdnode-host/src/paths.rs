//! Script path resolution relative to a project directory.

use std::path::{Path, PathBuf};

use pdnode::ScriptResolver;

use crate::error::{HostError, Result};

/// Resolves script references the way a patch does: absolute paths as-is, `~`
/// against `HOME`, everything else against the project directory.
#[derive(Debug, Clone)]
pub struct ProjectResolver {
    base: PathBuf,
    home: Option<PathBuf>,
}

impl ProjectResolver {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            home: None,
        }
    }

    /// Uses `HOME` from the environment for `~` expansion.
    pub fn from_env(base: impl Into<PathBuf>) -> Self {
        let home = std::env::var_os("HOME")
            .filter(|h| !h.is_empty())
            .map(PathBuf::from);
        Self {
            base: base.into(),
            home,
        }
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    fn expand(&self, script: &str) -> Result<PathBuf> {
        if let Some(rest) = script.strip_prefix('~')
            && (rest.is_empty() || rest.starts_with('/'))
        {
            let home = self
                .home
                .as_ref()
                .ok_or_else(|| HostError::NoHome(script.to_string()))?;
            return Ok(home.join(rest.trim_start_matches('/')));
        }

        let path = Path::new(script);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.base.join(path))
        }
    }
}

impl ScriptResolver for ProjectResolver {
    type Error = HostError;

    fn resolve(&self, script: &str) -> Result<PathBuf> {
        let path = self.expand(script)?;
        let path = std::path::absolute(&path).map_err(|source| HostError::Resolve {
            path: path.clone(),
            source,
        })?;

        if !path.is_file() {
            return Err(HostError::ScriptNotFound(path));
        }
        tracing::debug!(script, resolved = %path.display(), "Resolved script path");
        Ok(path)
    }
}
