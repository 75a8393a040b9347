//! Deployment error taxonomy.
//!
//! Every failure in the engine is fail-fast: no retries anywhere, and each
//! error propagates to the top-level caller after the failing scope has
//! released the resources it owns.

use std::path::PathBuf;

/// Errors produced by the deployment engine.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Missing or malformed cluster fields, missing `type`/`location`,
    /// malformed size strings, invalid override references.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The system artifact exists in neither the local nor the remote cache.
    #[error(
        "deployment failed as system '{artifact}' is not yet built; \
         please ensure the system is built before deployment"
    )]
    NotBuilt { artifact: String },

    /// No executable for the requested extension exists in the definitions
    /// repository or among the bundled extensions. Recoverable for `check`
    /// extensions, fatal for `configure` and `write`.
    #[error("extension {name}{kind} not found")]
    ExtensionNotFound { name: String, kind: String },

    /// An extension subprocess exited non-zero. Carries the accumulated
    /// error-stream text for the operator-facing failure message.
    #[error("{name}{kind} failed with code {code}: {stderr}")]
    ExtensionFailed {
        name: String,
        kind: String,
        code: i32,
        stderr: String,
    },

    /// Not enough free disk space in the temporary workspace.
    #[error("insufficient space in {path} (need at least {required} bytes)")]
    Resource { path: PathBuf, required: u64 },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeployError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
