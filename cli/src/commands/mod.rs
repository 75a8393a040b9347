// Copyright (c) 2026 sysforge contributors
// SPDX-License-Identifier: GPL-2.0

//! Command implementations for the sysforge CLI

pub mod deploy;

pub use self::deploy::DeployCommand;
