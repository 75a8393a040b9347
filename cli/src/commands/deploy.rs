// Copyright (c) 2026 sysforge contributors
// SPDX-License-Identifier: GPL-2.0

//! Cluster deployment and upgrade commands
//!
//! Both commands take the cluster morphology path followed by trailing
//! arguments that mix two kinds of values: deployment ids selecting a
//! subset of the cluster, then `ID.KEY=VALUE` environment overrides.
//! Leading arguments that exactly match a deployment id are the selection;
//! the first argument that does not ends it, and everything from there on
//! is an override pair.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use sysforge_core::application::{DeployConfig, DeploymentOrchestrator};
use sysforge_core::domain::units::parse_size;
use sysforge_core::infrastructure::cluster_parser::sanitize_morphology_path;
use sysforge_core::infrastructure::{
    ClusterParser, FilesystemRemoteCache, MorphologyArtifactResolver, RemoteArtifactCache,
};
use sysforge_core::report::{StatusContext, StatusReporter};
use sysforge_core::ClusterSpec;

#[derive(Args)]
pub struct DeployCommand {
    /// Cluster morphology path within the definitions repository
    #[arg(value_name = "CLUSTER")]
    pub cluster: String,

    /// Deployment ids to deploy (default: all), then ID.KEY=VALUE overrides
    #[arg(value_name = "ARGS", trailing_var_arg = true)]
    pub args: Vec<String>,
}

/// Global options shared by `deploy` and `upgrade`.
pub struct Settings {
    pub repo: PathBuf,
    pub cache_dir: PathBuf,
    pub remote_cache: Option<PathBuf>,
    pub tempdir: Option<PathBuf>,
    pub tempdir_min_space: String,
    pub bundled_extensions: Option<PathBuf>,
}

pub async fn handle_command(
    command: DeployCommand,
    settings: Settings,
    upgrade: bool,
) -> Result<()> {
    let cluster_path = settings
        .repo
        .join(sanitize_morphology_path(&command.cluster));
    let cluster = ClusterParser::parse_file(&cluster_path)
        .with_context(|| format!("failed to load cluster {}", cluster_path.display()))?;

    let (selection, overrides) = partition_args(&cluster, &command.args);

    let min_free_space = parse_size(&settings.tempdir_min_space)
        .with_context(|| {
            format!(
                "cannot parse --tempdir-min-space '{}'",
                settings.tempdir_min_space
            )
        })?;

    let config = DeployConfig {
        repo_root: settings.repo.clone(),
        cache_dir: settings.cache_dir,
        tempdir_root: settings.tempdir.unwrap_or_else(std::env::temp_dir),
        min_free_space,
        upgrade,
        bundled_extensions: settings.bundled_extensions,
    };

    let resolver = Arc::new(MorphologyArtifactResolver::new(&settings.repo));
    let remote: Option<Arc<dyn RemoteArtifactCache>> = settings
        .remote_cache
        .map(|root| Arc::new(FilesystemRemoteCache::new(root)) as Arc<dyn RemoteArtifactCache>);
    let reporter = Arc::new(ConsoleReporter);

    let orchestrator = DeploymentOrchestrator::new(config, resolver, remote, reporter)?;
    orchestrator
        .deploy_cluster(&cluster, &selection, &overrides)
        .await?;

    println!("{}", "Finished deployment".green());
    Ok(())
}

/// Split the trailing arguments into the deployment selection and the
/// override pairs. The selection is the longest leading run of arguments
/// that are deployment ids of the cluster.
fn partition_args(cluster: &ClusterSpec, args: &[String]) -> (Vec<String>, Vec<String>) {
    let known = cluster.deployment_ids();
    let selection: Vec<String> = args
        .iter()
        .take_while(|arg| known.contains(arg.as_str()))
        .cloned()
        .collect();
    let overrides = args[selection.len()..].to_vec();
    (selection, overrides)
}

/// Reporter that prints progress straight to stdout.
struct ConsoleReporter;

impl StatusReporter for ConsoleReporter {
    fn status(&self, context: &StatusContext, message: &str) {
        if context.prefix().is_empty() {
            println!("{message}");
        } else {
            println!("{} {message}", context.prefix().dimmed());
        }
    }
}
