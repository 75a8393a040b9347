// Copyright (c) 2026 sysforge contributors
// SPDX-License-Identifier: GPL-2.0

//! # sysforge deployment CLI
//!
//! The `sysforge` binary deploys built system images as described by a
//! cluster morphology.
//!
//! ## Commands
//!
//! - `sysforge deploy CLUSTER [DEPLOYMENT...] [ID.KEY=VALUE...]` - initial
//!   deployment of a cluster
//! - `sysforge upgrade CLUSTER [DEPLOYMENT...] [ID.KEY=VALUE...]` - upgrade
//!   of existing deployed instances

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;

mod commands;

/// sysforge - deploy built system images to their targets
#[derive(Parser)]
#[command(name = "sysforge")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Definitions repository root (morphologies and extensions)
    #[arg(long, global = true, env = "SYSFORGE_REPO", default_value = ".")]
    repo: PathBuf,

    /// Local artifact cache directory
    #[arg(
        long,
        global = true,
        env = "SYSFORGE_CACHE_DIR",
        default_value = ".sysforge/artifacts",
        value_name = "DIR"
    )]
    cache_dir: PathBuf,

    /// Remote artifact cache directory (shared filesystem mount)
    #[arg(long, global = true, env = "SYSFORGE_REMOTE_CACHE", value_name = "DIR")]
    remote_cache: Option<PathBuf>,

    /// Directory for deployment working trees (default: system temp dir)
    #[arg(long, global = true, env = "SYSFORGE_TEMPDIR", value_name = "DIR")]
    tempdir: Option<PathBuf>,

    /// Free space required in the tempdir before deploying (e.g. 4G; 0 disables)
    #[arg(long, global = true, default_value = "4G", value_name = "SIZE")]
    tempdir_min_space: String,

    /// Directory of extensions bundled with the tool
    #[arg(long, global = true, env = "SYSFORGE_EXTENSIONS", value_name = "DIR")]
    bundled_extensions: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "SYSFORGE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Deprecated; use the `upgrade` subcommand instead
    #[arg(long, global = true, hide = true)]
    upgrade: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a cluster for the first time
    #[command(name = "deploy")]
    Deploy {
        #[command(flatten)]
        command: commands::DeployCommand,
    },

    /// Upgrade existing deployed instances of a cluster
    #[command(name = "upgrade")]
    Upgrade {
        #[command(flatten)]
        command: commands::DeployCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let settings = commands::deploy::Settings {
        repo: cli.repo,
        cache_dir: cli.cache_dir,
        remote_cache: cli.remote_cache,
        tempdir: cli.tempdir,
        tempdir_min_space: cli.tempdir_min_space,
        bundled_extensions: cli.bundled_extensions,
    };

    match cli.command {
        Commands::Deploy { command } => {
            let upgrade = resolve_upgrade_mode(false, cli.upgrade)?;
            if upgrade {
                warn!("--upgrade is deprecated; use `sysforge upgrade` instead");
            }
            commands::deploy::handle_command(command, settings, upgrade).await
        }
        Commands::Upgrade { command } => {
            let upgrade = resolve_upgrade_mode(true, cli.upgrade)?;
            commands::deploy::handle_command(command, settings, upgrade).await
        }
    }
}

/// Combine the subcommand with the deprecated `--upgrade` flag. The
/// `upgrade` subcommand forces upgrade mode on and rejects the redundant
/// flag outright.
fn resolve_upgrade_mode(is_upgrade_command: bool, flag: bool) -> Result<bool> {
    if is_upgrade_command && flag {
        anyhow::bail!("running `sysforge upgrade --upgrade` does not make sense");
    }
    Ok(is_upgrade_command || flag)
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_subcommand_with_upgrade_flag_is_rejected() {
        let cli = Cli::try_parse_from([
            "sysforge",
            "--upgrade",
            "upgrade",
            "clusters/devel.morph",
        ])
        .unwrap();
        assert!(cli.upgrade);
        assert!(matches!(cli.command, Commands::Upgrade { .. }));

        let err = resolve_upgrade_mode(true, cli.upgrade).unwrap_err();
        assert!(err
            .to_string()
            .contains("`sysforge upgrade --upgrade` does not make sense"));
    }

    #[test]
    fn deprecated_flag_turns_deploy_into_an_upgrade() {
        assert!(resolve_upgrade_mode(false, true).unwrap());
        assert!(!resolve_upgrade_mode(false, false).unwrap());
    }

    #[test]
    fn upgrade_subcommand_forces_upgrade_mode() {
        assert!(resolve_upgrade_mode(true, false).unwrap());
    }
}
