// Copyright (c) 2026 sysforge contributors
// SPDX-License-Identifier: GPL-2.0

//! Core deployment engine for sysforge.
//!
//! Turns previously built, cached root-filesystem artifacts into running or
//! installable system instances by driving pluggable extension scripts.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Cluster parsing, environment merging, artifact retrieval,
//!   extension execution, and the deployment state machine.

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod report;

pub use domain::*;
