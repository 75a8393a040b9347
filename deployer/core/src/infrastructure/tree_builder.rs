//! System tree construction.
//!
//! A system tree is the unpacked root filesystem of a built artifact,
//! materialized in a fresh temporary directory under the cluster workspace
//! and stamped with a deployment metadata file before any extension runs.
//!
//! If anything fails after the directory is created, the directory is
//! removed before the error propagates: no partial trees are left behind.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use scopeguard::ScopeGuard;

use crate::domain::cluster::DeploymentRequest;
use crate::domain::errors::DeployError;
use crate::domain::metadata::{
    DefinitionsVersion, DeploymentMetadata, ToolVersion, METADATA_RELATIVE_PATH,
};
use crate::infrastructure::artifact_cache::ResolvedArtifact;
use crate::report::{StatusContext, StatusReporter};

/// An unpacked system tree awaiting configuration.
///
/// The orchestrator invocation that created the tree owns it and removes it
/// when its deployment scope ends; subsystem recursion borrows the path as
/// a mount parent in between.
#[derive(Debug)]
pub struct SystemTree {
    path: PathBuf,
}

impl SystemTree {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Builds system trees from cached artifact tarballs.
pub struct SystemTreeBuilder {
    definitions_version: DefinitionsVersion,
    tool_version: ToolVersion,
}

impl SystemTreeBuilder {
    pub fn new(definitions_version: DefinitionsVersion, tool_version: ToolVersion) -> Self {
        Self {
            definitions_version,
            tool_version,
        }
    }

    /// Unpack `tarball` into a fresh directory under `workspace` and write
    /// the deployment metadata record into it.
    pub async fn build(
        &self,
        workspace: &Path,
        artifact: &ResolvedArtifact,
        tarball: &Path,
        request: &DeploymentRequest,
        context: &StatusContext,
        reporter: &dyn StatusReporter,
    ) -> Result<SystemTree, DeployError> {
        let tree_dir = tempfile::Builder::new()
            .prefix("system.")
            .tempdir_in(workspace)?
            .keep();

        // Remove the tree on any failure below; disarmed on success.
        let guard = scopeguard::guard(tree_dir, |dir| {
            let _ = std::fs::remove_dir_all(&dir);
        });

        reporter.status(context, "Unpacking system for configuration");
        unpack_artifact(tarball, &guard).await?;
        reporter.status(
            context,
            &format!("System unpacked at {}", guard.display()),
        );

        reporter.status(context, "Writing deployment metadata file");
        let metadata = DeploymentMetadata::build(
            &artifact.name,
            self.definitions_version.clone(),
            self.tool_version.clone(),
            &request.extension_type,
            &request.location,
            &request.env,
        );
        write_metadata(&guard, &metadata)?;

        Ok(SystemTree {
            path: ScopeGuard::into_inner(guard),
        })
    }
}

/// Unpack a (possibly gzip-compressed) tar archive into `dest`.
async fn unpack_artifact(tarball: &Path, dest: &Path) -> Result<(), DeployError> {
    let tarball = tarball.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), DeployError> {
        let mut file = File::open(&tarball)?;
        let mut magic = [0u8; 2];
        let compressed = matches!(file.read(&mut magic), Ok(2) if magic == [0x1f, 0x8b]);
        file.seek(SeekFrom::Start(0))?;

        let reader: Box<dyn Read> = if compressed {
            Box::new(flate2::read::GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        let mut archive = tar::Archive::new(reader);
        archive.set_preserve_permissions(true);
        archive.unpack(&dest)?;
        Ok(())
    })
    .await
    .map_err(|e| DeployError::Other(e.into()))?
}

/// Write the metadata record at its fixed path with
/// write-to-temp-then-rename semantics, so a partial record is never
/// observable at the target path.
fn write_metadata(tree: &Path, metadata: &DeploymentMetadata) -> Result<(), DeployError> {
    let target = tree.join(METADATA_RELATIVE_PATH);
    let parent = target
        .parent()
        .ok_or_else(|| anyhow::anyhow!("metadata path has no parent directory"))?;
    std::fs::create_dir_all(parent)?;

    let json = metadata
        .to_json()
        .map_err(|e| DeployError::Other(e.into()))?;
    let mut staged = tempfile::NamedTempFile::new_in(parent)?;
    std::io::Write::write_all(&mut staged, json.as_bytes())?;
    staged
        .persist(&target)
        .map_err(|e| DeployError::Io(e.error))?;
    Ok(())
}
