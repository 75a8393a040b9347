// Copyright (c) 2026 sysforge contributors
// SPDX-License-Identifier: GPL-2.0

pub mod cluster;
pub mod environment;
pub mod errors;
pub mod metadata;
pub mod units;

pub use cluster::{ClusterSpec, DeploymentRequest, SystemEntry};
pub use errors::DeployError;
pub use metadata::{DefinitionsVersion, DeploymentMetadata, ToolVersion};
