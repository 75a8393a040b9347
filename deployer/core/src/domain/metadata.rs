//! Deployment metadata record.
//!
//! One record is created per system tree and written at a fixed path inside
//! the tree before any extension runs. It exists so a deployed system can
//! identify what was deployed onto it, which release of the definitions it
//! came from, and which tool version performed the deployment.
//!
//! Environment keys containing the case-sensitive substring `PASSWORD` are
//! stripped before the record is built; everything else a deployment sets
//! ends up on the target system, so callers are expected to keep secrets in
//! password-marked keys.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::environment::key_is_secret;

/// Relative path of the metadata file inside a deployed tree.
pub const METADATA_RELATIVE_PATH: &str = "sysforge/deployment.meta";

/// Version descriptor for the definitions repository a deployment came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionsVersion {
    /// `git describe` output of the definitions repository, listing the
    /// last tag so post-upgrade hooks can identify the deployed release.
    pub describe: String,
}

/// Version identifiers of the deploying tool itself.
///
/// Fields are declared in the alphabetical order of their serialized names
/// so the block is emitted with sorted keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolVersion {
    pub commit: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub tree: String,
    pub version: String,
}

/// The persisted deployment metadata record.
///
/// Keys are sorted at every level: the fields are declared in the
/// alphabetical order of their serialized names and the configuration map
/// is a `BTreeMap`, so the serialized form is deterministic and diffs
/// cleanly across deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentMetadata {
    /// Redacted configuration: the merged environment minus secret keys.
    pub configuration: BTreeMap<String, String>,

    #[serde(rename = "definitions-version")]
    pub definitions_version: DefinitionsVersion,

    #[serde(rename = "deployment-type")]
    pub deployment_type: String,

    pub location: String,

    #[serde(rename = "system-artifact-name")]
    pub system_artifact_name: String,

    #[serde(rename = "tool-version")]
    pub tool_version: ToolVersion,
}

impl DeploymentMetadata {
    /// Build the record for one deployment, redacting secret keys from the
    /// embedded configuration.
    pub fn build(
        artifact_name: &str,
        definitions_version: DefinitionsVersion,
        tool_version: ToolVersion,
        deployment_type: &str,
        location: &str,
        env: &HashMap<String, String>,
    ) -> Self {
        let configuration = env
            .iter()
            .filter(|(key, _)| !key_is_secret(key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            configuration,
            definitions_version,
            deployment_type: deployment_type.to_string(),
            location: location.to_string(),
            system_artifact_name: artifact_name.to_string(),
            tool_version,
        }
    }

    /// Serialize to the persisted JSON form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
