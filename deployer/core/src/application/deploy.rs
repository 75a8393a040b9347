//! Deployment Orchestrator Application Service
//!
//! Drives one whole cluster deployment: walks the systems list, merges each
//! deployment's environment, materializes the system tree, recurses into
//! subsystems, and runs the configuration and write extensions.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** The per-(system, deployment) state machine and its
//!   resource guarantees
//! - **Dependencies:** Domain (cluster, environment, metadata),
//!   Infrastructure (caches, tree builder, extension runner)
//!
//! # State machine per (system, deployment-id)
//!
//! ```text
//! Pending -> AwaitingCheck -> TreeBuilt -> SubsystemsDeployed
//!         -> Configured -> Written -> Done
//! ```
//!
//! Any failure absorbs into Failed and propagates after the scope has
//! released what it owns: the private scratch dir first, then the system
//! tree, then (at the outermost level) the cluster workspace. Execution is
//! strictly sequential; extensions mutate shared external targets and are
//! not assumed reentrant.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

use crate::domain::cluster::{ClusterSpec, DeploymentRequest, SystemEntry};
use crate::domain::environment::{
    merge_deployment_env, overrides_for_deployment, validate_overrides,
};
use crate::domain::errors::DeployError;
use crate::domain::units::{parse_boolean, parse_size};
use crate::infrastructure::artifact_cache::{
    ArtifactRetriever, LocalArtifactCache, RemoteArtifactCache, ResolvedArtifact,
};
use crate::infrastructure::extension_runner::{
    ExtensionKind, ExtensionOutputSink, ExtensionRunner,
};
use crate::infrastructure::morphology::ArtifactResolver;
use crate::infrastructure::repo_version::{definitions_version, tool_version};
use crate::infrastructure::tree_builder::SystemTreeBuilder;
use crate::infrastructure::workspace::{check_disk_available, create_workspace};
use crate::report::{StatusContext, StatusReporter};

// ============================================================================
// Configuration
// ============================================================================

/// Settings for one orchestrator instance.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Root of the definitions repository (extensions, morphologies).
    pub repo_root: PathBuf,

    /// Local artifact cache directory.
    pub cache_dir: PathBuf,

    /// Directory the cluster workspace is created under.
    pub tempdir_root: PathBuf,

    /// Minimum free bytes required in `tempdir_root`; 0 disables the check.
    pub min_free_space: u64,

    /// Whether this invocation upgrades existing instances.
    pub upgrade: bool,

    /// Directory of the extensions bundled with the tool.
    pub bundled_extensions: Option<PathBuf>,
}

// ============================================================================
// Deployment phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeploymentPhase {
    Pending,
    AwaitingCheck,
    TreeBuilt,
    SubsystemsDeployed,
    Configured,
    Written,
    Done,
}

/// Advance the per-deployment state machine, leaving a debug trail of
/// every transition.
fn advance(phase: &mut DeploymentPhase, next: DeploymentPhase, deployment: &str) {
    debug!(deployment, from = ?phase, to = ?next, "deployment phase transition");
    *phase = next;
}

// ============================================================================
// Application Service: DeploymentOrchestrator
// ============================================================================

/// Top-level deployment engine, called once per cluster.
pub struct DeploymentOrchestrator {
    config: DeployConfig,
    resolver: Arc<dyn ArtifactResolver>,
    retriever: ArtifactRetriever,
    runner: ExtensionRunner,
    tree_builder: SystemTreeBuilder,
    reporter: Arc<dyn StatusReporter>,
}

impl DeploymentOrchestrator {
    pub fn new(
        config: DeployConfig,
        resolver: Arc<dyn ArtifactResolver>,
        remote_cache: Option<Arc<dyn RemoteArtifactCache>>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Result<Self, DeployError> {
        let retriever =
            ArtifactRetriever::new(LocalArtifactCache::new(&config.cache_dir)?, remote_cache);
        let tree_builder =
            SystemTreeBuilder::new(definitions_version(&config.repo_root), tool_version());
        let runner = ExtensionRunner::new(config.bundled_extensions.clone());
        Ok(Self {
            config,
            resolver,
            retriever,
            runner,
            tree_builder,
            reporter,
        })
    }

    /// Deploy the selected (or all) deployments of a cluster.
    ///
    /// `selection` filters by deployment id, empty meaning all.
    /// `override_pairs` are `DEPLOYMENT_ID.KEY=VALUE` strings taking
    /// precedence over both defaults and explicit deployment parameters.
    ///
    /// The cluster workspace is destroyed on every exit path.
    pub async fn deploy_cluster(
        &self,
        cluster: &ClusterSpec,
        selection: &[String],
        override_pairs: &[String],
    ) -> Result<(), DeployError> {
        validate_overrides(
            override_pairs,
            &cluster.deployment_ids(),
            &cluster.subsystem_ids(),
        )?;
        check_disk_available(&self.config.tempdir_root, self.config.min_free_space)?;

        // RAII workspace: dropped (and removed) on success and on every `?`.
        let workspace = create_workspace(&self.config.tempdir_root)?;
        let context = StatusContext::root();
        for system in cluster.systems() {
            self.deploy_system(
                workspace.path(),
                system,
                selection,
                override_pairs,
                None,
                &context,
            )
            .await?;
        }
        Ok(())
    }

    /// Deploy one system entry: every selected deployment id, in order.
    ///
    /// Boxed because subsystem recursion makes this self-referential.
    fn deploy_system<'a>(
        &'a self,
        workspace: &'a Path,
        system: &'a SystemEntry,
        selection: &'a [String],
        override_pairs: &'a [String],
        parent_tree: Option<&'a Path>,
        context: &'a StatusContext,
    ) -> BoxFuture<'a, Result<(), DeployError>> {
        async move {
            let selected = |id: &str| selection.is_empty() || selection.iter().any(|s| s == id);
            if !system.deployment_ids().any(&selected) {
                return Ok(());
            }

            let system_context = context.child(&system.morphology_path);
            let artifact = self.resolver.resolve(&system.morphology_path).await?;

            for (id, params) in &system.deployments {
                if !selected(id) {
                    continue;
                }
                self.deploy_one(
                    workspace,
                    system,
                    &artifact,
                    id,
                    params,
                    override_pairs,
                    parent_tree,
                    &system_context,
                )
                .await?;
            }
            Ok(())
        }
        .boxed()
    }

    /// Run the full state machine for one (system, deployment-id) pair.
    #[allow(clippy::too_many_arguments)]
    async fn deploy_one(
        &self,
        workspace: &Path,
        system: &SystemEntry,
        artifact: &ResolvedArtifact,
        id: &str,
        params: &HashMap<String, String>,
        override_pairs: &[String],
        parent_tree: Option<&Path>,
        system_context: &StatusContext,
    ) -> Result<(), DeployError> {
        let context = system_context.child(id);
        let mut phase = DeploymentPhase::Pending;

        let override_layer = overrides_for_deployment(id, override_pairs);
        let request = merge_deployment_env(
            id,
            &system.deploy_defaults,
            params,
            &override_layer,
            self.config.upgrade,
        )?;
        validate_known_options(&request)?;
        advance(&mut phase, DeploymentPhase::AwaitingCheck, id);

        let sink: Arc<dyn ExtensionOutputSink> = Arc::new(ReporterSink {
            reporter: self.reporter.clone(),
            context: context.clone(),
        });

        // The check extension runs against the location only, before any
        // filesystem mutation. A missing check extension is a no-op.
        let check_env = self.extension_process_env(&request.env, None);
        match self
            .runner
            .run(
                &self.config.repo_root,
                &request.extension_type,
                ExtensionKind::Check,
                &[request.location.clone()],
                &check_env,
                &sink,
            )
            .await
        {
            Ok(()) => {}
            Err(DeployError::ExtensionNotFound { name, kind }) => {
                debug!("no {name}{kind} extension, proceeding");
            }
            Err(e) => return Err(e),
        }

        let tarball = self.retriever.obtain(artifact).await?;
        let tree = self
            .tree_builder
            .build(
                workspace,
                artifact,
                &tarball,
                &request,
                &context,
                self.reporter.as_ref(),
            )
            .await?;
        advance(&mut phase, DeploymentPhase::TreeBuilt, id);

        // From here the tree is owed removal when this deployment's scope
        // ends, whichever way it ends. Subsystems borrow it first.
        let tree = scopeguard::guard(tree, |tree| {
            let _ = std::fs::remove_dir_all(tree.path());
        });

        for subsystem in &system.subsystems {
            // Subsystem recursion clears the selection: a parent that was
            // selected deploys all of its subsystems.
            self.deploy_system(
                workspace,
                subsystem,
                &[],
                override_pairs,
                Some(tree.path()),
                &context,
            )
            .await?;
        }
        advance(&mut phase, DeploymentPhase::SubsystemsDeployed, id);

        let resolved_location = compose_location(parent_tree, &request.location);
        let tree_path = tree.path().to_string_lossy().into_owned();

        // Extensions get a private scratch dir as TMPDIR so anything they
        // leave behind is cleaned up with it.
        let scratch = tempfile::Builder::new()
            .prefix("scratch.")
            .tempdir_in(workspace)?;
        let env = self.extension_process_env(&request.env, Some(scratch.path()));

        self.reporter.status(&context, "Configure system");
        for name in &artifact.configuration_extensions {
            self.runner
                .run(
                    &self.config.repo_root,
                    name,
                    ExtensionKind::Configure,
                    &[tree_path.clone()],
                    &env,
                    &sink,
                )
                .await?;
        }
        advance(&mut phase, DeploymentPhase::Configured, id);

        self.reporter.status(&context, "Writing to device");
        self.runner
            .run(
                &self.config.repo_root,
                &request.extension_type,
                ExtensionKind::Write,
                &[tree_path, resolved_location],
                &env,
                &sink,
            )
            .await?;
        advance(&mut phase, DeploymentPhase::Written, id);

        self.reporter.status(&context, "Cleaning up");
        drop(scratch);
        drop(tree);
        advance(&mut phase, DeploymentPhase::Done, id);
        Ok(())
    }

    /// Compose the complete process environment for an extension: the
    /// caller's environment with the merged deployment parameters layered
    /// on top, plus the engine-injected `TMPDIR`.
    fn extension_process_env(
        &self,
        deployment_env: &HashMap<String, String>,
        scratch: Option<&Path>,
    ) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.extend(
            deployment_env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        if let Some(scratch) = scratch {
            env.insert(
                "TMPDIR".to_string(),
                scratch.to_string_lossy().into_owned(),
            );
        }
        env
    }
}

/// A subsystem's effective target is its location joined under the parent
/// tree with the leading slash stripped; a top-level deployment's location
/// is used verbatim.
fn compose_location(parent_tree: Option<&Path>, location: &str) -> String {
    match parent_tree {
        Some(parent) => parent
            .join(location.trim_start_matches('/'))
            .to_string_lossy()
            .into_owned(),
        None => location.to_string(),
    }
}

/// Validate the engine-recognized KEY=VALUE options that have a fixed
/// grammar, so a malformed value fails before any extension runs.
fn validate_known_options(request: &DeploymentRequest) -> Result<(), DeployError> {
    for key in ["DISK_SIZE", "RAM_SIZE"] {
        if let Some(value) = request.env.get(key) {
            parse_size(value).map_err(|_| {
                DeployError::configuration(format!(
                    "deployment '{}': cannot parse {key} '{value}'",
                    request.id
                ))
            })?;
        }
    }
    if let Some(value) = request.env.get("AUTOSTART") {
        parse_boolean(value).map_err(|_| {
            DeployError::configuration(format!(
                "deployment '{}': cannot parse AUTOSTART '{value}'",
                request.id
            ))
        })?;
    }
    Ok(())
}

/// Bridges extension output to the status reporter for one deployment.
struct ReporterSink {
    reporter: Arc<dyn StatusReporter>,
    context: StatusContext,
}

impl ExtensionOutputSink for ReporterSink {
    fn status(&self, line: &str) {
        self.reporter.status(&self.context, line);
    }

    fn error(&self, line: &str) {
        // Echoed live; the runner accumulates the same lines for the
        // failure message.
        eprintln!("{line}");
    }
}
