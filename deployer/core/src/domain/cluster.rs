//! Cluster domain model.
//!
//! A cluster document lists the systems to deploy and, for each system, a
//! mapping of deployment ids to their parameters. Systems may nest
//! subsystems whose deployed output lands inside the parent's tree.
//!
//! # Invariants
//!
//! - A cluster has at least one system
//! - Every system references exactly one morphology path
//! - Every system has at least one deployment entry
//! - Deployment ids are unique within their system (map keyed by id)

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::errors::DeployError;

/// Top-level declarative cluster description.
///
/// Constructed once from the parsed cluster document and immutable
/// thereafter; owned by the orchestrator for the duration of one cluster
/// deployment.
#[derive(Debug, Clone)]
pub struct ClusterSpec {
    systems: Vec<SystemEntry>,
}

impl ClusterSpec {
    /// Create a cluster spec, enforcing the non-empty invariant.
    pub fn new(systems: Vec<SystemEntry>) -> Result<Self, DeployError> {
        if systems.is_empty() {
            return Err(DeployError::configuration(
                "cluster must list at least one system",
            ));
        }
        Ok(Self { systems })
    }

    /// Systems in document order.
    pub fn systems(&self) -> &[SystemEntry] {
        &self.systems
    }

    /// All deployment ids of top-level systems (not subsystems).
    pub fn deployment_ids(&self) -> HashSet<String> {
        self.systems
            .iter()
            .flat_map(|s| s.deployments.keys().cloned())
            .collect()
    }

    /// All deployment ids reachable only through subsystem nesting.
    pub fn subsystem_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        for system in &self.systems {
            for subsystem in &system.subsystems {
                collect_ids_recursive(subsystem, &mut ids);
            }
        }
        ids
    }
}

fn collect_ids_recursive(entry: &SystemEntry, ids: &mut HashSet<String>) {
    ids.extend(entry.deployments.keys().cloned());
    for subsystem in &entry.subsystems {
        collect_ids_recursive(subsystem, ids);
    }
}

/// One system in a cluster: a buildable root filesystem plus its deployment
/// targets and optional nested subsystems.
#[derive(Debug, Clone)]
pub struct SystemEntry {
    /// Path of the system morphology within the definitions repository.
    pub morphology_path: String,

    /// Settings shared across this system's deployments, lowest precedence.
    pub deploy_defaults: HashMap<String, String>,

    /// deployment-id -> explicit KEY=VALUE parameters for that deployment.
    /// BTreeMap keeps iteration order stable across runs.
    pub deployments: BTreeMap<String, HashMap<String, String>>,

    /// Nested systems deployed into this system's unpacked tree.
    pub subsystems: Vec<SystemEntry>,
}

impl SystemEntry {
    /// Create a system entry, enforcing the at-least-one-deployment invariant.
    pub fn new(
        morphology_path: String,
        deploy_defaults: HashMap<String, String>,
        deployments: BTreeMap<String, HashMap<String, String>>,
        subsystems: Vec<SystemEntry>,
    ) -> Result<Self, DeployError> {
        if morphology_path.is_empty() {
            return Err(DeployError::configuration(
                "system entry is missing its morphology path",
            ));
        }
        if deployments.is_empty() {
            return Err(DeployError::configuration(format!(
                "system '{}' has no deployments",
                morphology_path
            )));
        }
        Ok(Self {
            morphology_path,
            deploy_defaults,
            deployments,
            subsystems,
        })
    }

    /// Deployment ids defined directly on this system.
    pub fn deployment_ids(&self) -> impl Iterator<Item = &str> {
        self.deployments.keys().map(String::as_str)
    }
}

/// A fully merged, validated request to deploy one system to one target.
///
/// `extension_type` and `location` have already been extracted from the
/// environment map: they drive extension dispatch and are not part of the
/// environment an extension's business logic sees.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    /// Deployment id, unique within its system entry.
    pub id: String,

    /// Write-extension name (`tar`, `rawdisk`, `kvm`, ...).
    pub extension_type: String,

    /// Target location; syntax depends on the extension type.
    pub location: String,

    /// Final merged KEY=VALUE environment for extension processes.
    pub env: HashMap<String, String>,
}
