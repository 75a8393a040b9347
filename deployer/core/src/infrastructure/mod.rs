// Copyright (c) 2026 sysforge contributors
// SPDX-License-Identifier: GPL-2.0

pub mod artifact_cache;
pub mod cluster_parser;
pub mod extension_runner;
pub mod morphology;
pub mod repo_version;
pub mod tree_builder;
pub mod workspace;

pub use artifact_cache::{
    ArtifactRetriever, FilesystemRemoteCache, LocalArtifactCache, RemoteArtifactCache,
    ResolvedArtifact,
};
pub use cluster_parser::ClusterParser;
pub use extension_runner::{ExtensionKind, ExtensionOutputSink, ExtensionRunner};
pub use morphology::{ArtifactResolver, MorphologyArtifactResolver};
pub use tree_builder::{SystemTree, SystemTreeBuilder};
