//! Version descriptors for the metadata record.
//!
//! The definitions repository is described with `git describe` semantics so
//! the deployed system records which release of the definitions it came
//! from. Describe failures (no repository, no commits) degrade to a
//! placeholder rather than failing a deployment over metadata.

use std::path::Path;

use tracing::debug;

use crate::domain::metadata::{DefinitionsVersion, ToolVersion};

const UNKNOWN: &str = "unknown";

/// Describe the definitions repository at or above `repo_root`.
pub fn definitions_version(repo_root: &Path) -> DefinitionsVersion {
    let describe = describe_repository(repo_root).unwrap_or_else(|e| {
        debug!("cannot describe definitions repository: {e}");
        UNKNOWN.to_string()
    });
    DefinitionsVersion { describe }
}

fn describe_repository(repo_root: &Path) -> Result<String, git2::Error> {
    let repo = git2::Repository::discover(repo_root)?;
    let mut options = git2::DescribeOptions::new();
    options.describe_tags().show_commit_oid_as_fallback(true);
    let describe = repo.describe(&options)?;
    describe.format(None)
}

/// Version identifiers of this build of the tool.
///
/// The git fields are stamped in by the release build via environment
/// variables; a development build reports them as unknown.
pub fn tool_version() -> ToolVersion {
    ToolVersion {
        git_ref: option_env!("SYSFORGE_BUILD_REF").unwrap_or(UNKNOWN).to_string(),
        tree: option_env!("SYSFORGE_BUILD_TREE").unwrap_or(UNKNOWN).to_string(),
        commit: option_env!("SYSFORGE_BUILD_COMMIT")
            .unwrap_or(UNKNOWN)
            .to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}
