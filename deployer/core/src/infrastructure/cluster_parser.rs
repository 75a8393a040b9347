//! Cluster YAML parser.
//!
//! This module provides infrastructure for parsing cluster YAML documents
//! into domain objects.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external YAML → Domain objects
//! - **Anti-Corruption:** Translates the document schema to the domain model
//!
//! # Document Format
//!
//! ```yaml
//! name: cluster-foo
//! kind: cluster
//! systems:
//!   - morph: systems/devel-system-x86_64-generic.morph
//!     deploy-defaults:
//!       type: kvm
//!       RAM_SIZE: 1G
//!     deploy:
//!       cluster-foo-x86_64-1:
//!         location: kvm+ssh://user@host/x86_64-1/x86_64-1.img
//!         HOSTNAME: cluster-foo-x86_64-1
//!         DISK_SIZE: 4G
//!         VCPUS: 2
//!     subsystems:
//!       - morph: systems/initramfs.morph
//!         deploy:
//!           initramfs:
//!             type: initramfs
//!             location: /boot/initramfs.gz
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::domain::cluster::{ClusterSpec, SystemEntry};
use crate::domain::errors::DeployError;

// ============================================================================
// YAML Schema (External Representation)
// ============================================================================

#[derive(Debug, Deserialize)]
struct ClusterDocument {
    kind: String,
    #[serde(default)]
    systems: Vec<SystemDocument>,
}

#[derive(Debug, Deserialize)]
struct SystemDocument {
    morph: String,
    #[serde(default, rename = "deploy-defaults")]
    deploy_defaults: HashMap<String, serde_yaml::Value>,
    #[serde(default)]
    deploy: BTreeMap<String, HashMap<String, serde_yaml::Value>>,
    #[serde(default)]
    subsystems: Vec<SystemDocument>,
}

// ============================================================================
// Parser
// ============================================================================

/// Parses cluster documents into validated [`ClusterSpec`] values.
pub struct ClusterParser;

impl ClusterParser {
    /// Parse a cluster document from a file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<ClusterSpec, DeployError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse_str(&text)
    }

    /// Parse a cluster document from YAML text.
    pub fn parse_str(text: &str) -> Result<ClusterSpec, DeployError> {
        let document: ClusterDocument = serde_yaml::from_str(text)
            .map_err(|e| DeployError::configuration(format!("invalid cluster document: {e}")))?;

        if document.kind != "cluster" {
            return Err(DeployError::configuration(
                "deployment commands are only supported for cluster morphologies",
            ));
        }

        let systems = document
            .systems
            .into_iter()
            .map(convert_system)
            .collect::<Result<Vec<_>, _>>()?;

        ClusterSpec::new(systems)
    }
}

/// Normalize a morphology path the way callers are allowed to write it:
/// the `.morph` suffix is optional.
pub fn sanitize_morphology_path(path: &str) -> String {
    if path.ends_with(".morph") {
        path.to_string()
    } else {
        format!("{path}.morph")
    }
}

fn convert_system(document: SystemDocument) -> Result<SystemEntry, DeployError> {
    let deploy_defaults = convert_params(&document.morph, document.deploy_defaults)?;

    let mut deployments = BTreeMap::new();
    for (id, params) in document.deploy {
        let params = convert_params(&document.morph, params)?;
        deployments.insert(id, params);
    }

    let subsystems = document
        .subsystems
        .into_iter()
        .map(convert_system)
        .collect::<Result<Vec<_>, _>>()?;

    SystemEntry::new(
        sanitize_morphology_path(&document.morph),
        deploy_defaults,
        deployments,
        subsystems,
    )
}

/// Deployment parameters are environment entries, so every value must
/// flatten to a string. YAML scalars (`VCPUS: 2`, `AUTOSTART: true`) are
/// stringified; structured values are a document error.
fn convert_params(
    morph: &str,
    params: HashMap<String, serde_yaml::Value>,
) -> Result<HashMap<String, String>, DeployError> {
    params
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                other => {
                    return Err(DeployError::configuration(format!(
                        "system '{morph}': deployment parameter '{key}' must be a \
                         scalar, got {other:?}"
                    )))
                }
            };
            Ok((key, value))
        })
        .collect()
}
