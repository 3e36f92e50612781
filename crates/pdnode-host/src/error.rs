use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("{guidance}")]
    NoRuntime { guidance: String },

    #[error("runtime not found: {}", .0.display())]
    RuntimeNotFound(PathBuf),

    #[error("script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    #[error("protocol wrapper not found: {}", .0.display())]
    WrapperNotFound(PathBuf),

    #[error("cannot expand `~` in {0}: HOME is not set")]
    NoHome(String),

    #[error("failed to resolve {}: {source}", path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

pub type Result<T> = std::result::Result<T, HostError>;
