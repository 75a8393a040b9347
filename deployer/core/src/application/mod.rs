// Copyright (c) 2026 sysforge contributors
// SPDX-License-Identifier: GPL-2.0

pub mod deploy;

pub use deploy::{DeployConfig, DeploymentOrchestrator};
