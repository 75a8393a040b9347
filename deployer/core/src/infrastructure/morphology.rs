//! Build-artifact resolution at the morphology boundary.
//!
//! The build scheduler that produces artifacts is an external collaborator.
//! This module holds the seam the orchestrator calls through, plus a
//! minimal resolver that reads the only two system-morphology fields this
//! engine is allowed to consume: the system `name` (which is the artifact
//! cache key) and its `configuration-extensions` list.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::errors::DeployError;
use crate::infrastructure::artifact_cache::ResolvedArtifact;

/// Resolves a system morphology path to the artifact to deploy.
#[async_trait]
pub trait ArtifactResolver: Send + Sync {
    async fn resolve(&self, morphology_path: &str) -> Result<ResolvedArtifact, DeployError>;
}

#[derive(Debug, Deserialize)]
struct SystemMorphology {
    name: String,
    #[serde(default, rename = "configuration-extensions")]
    configuration_extensions: Vec<String>,
}

/// Resolver that reads system morphologies from the definitions repository
/// working tree.
#[derive(Debug, Clone)]
pub struct MorphologyArtifactResolver {
    repo_root: PathBuf,
}

impl MorphologyArtifactResolver {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }
}

#[async_trait]
impl ArtifactResolver for MorphologyArtifactResolver {
    async fn resolve(&self, morphology_path: &str) -> Result<ResolvedArtifact, DeployError> {
        let path = self.repo_root.join(morphology_path);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            DeployError::configuration(format!(
                "cannot read system morphology {}: {e}",
                path.display()
            ))
        })?;
        let morphology: SystemMorphology = serde_yaml::from_str(&text).map_err(|e| {
            DeployError::configuration(format!(
                "invalid system morphology {}: {e}",
                path.display()
            ))
        })?;

        Ok(ResolvedArtifact {
            name: morphology.name,
            configuration_extensions: morphology.configuration_extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_name_and_configuration_extensions() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(repo.path().join("systems")).unwrap();
        std::fs::write(
            repo.path().join("systems/base.morph"),
            "name: base-system\nkind: system\nconfiguration-extensions:\n  - set-hostname\n  - nfsboot\n",
        )
        .unwrap();

        let resolver = MorphologyArtifactResolver::new(repo.path());
        let artifact = resolver.resolve("systems/base.morph").await.unwrap();
        assert_eq!(artifact.name, "base-system");
        assert_eq!(
            artifact.configuration_extensions,
            vec!["set-hostname".to_string(), "nfsboot".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_morphology_is_a_configuration_error() {
        let repo = tempfile::tempdir().unwrap();
        let resolver = MorphologyArtifactResolver::new(repo.path());
        let err = resolver.resolve("systems/absent.morph").await.unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
    }
}
