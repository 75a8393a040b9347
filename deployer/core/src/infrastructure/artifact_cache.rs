//! Artifact retrieval from the local and remote caches.
//!
//! Built system artifacts are tarballs keyed by artifact name. Retrieval is
//! a single pass: the local cache is consulted first; on a miss the remote
//! cache is asked and, on a hit there, the artifact is copied into the
//! local cache before being served from it. A miss in both caches is a
//! hard failure telling the caller to build the system first. No retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::errors::DeployError;

/// Handle for a resolved build artifact.
///
/// Produced by the build-resolution collaborator; the engine only consumes
/// the artifact name and the configuration-extension list attached to it.
#[derive(Debug, Clone)]
pub struct ResolvedArtifact {
    /// Cache key and human-readable artifact name.
    pub name: String,

    /// Configuration extensions to run against the unpacked tree, in order.
    pub configuration_extensions: Vec<String>,
}

/// Directory-backed local artifact cache.
///
/// Artifacts are stored as `<root>/<name>.tar`. The cache is a shared read
/// path across deployments; writes go through a temp-file-then-rename so a
/// concurrent reader never sees a partial artifact.
#[derive(Debug, Clone)]
pub struct LocalArtifactCache {
    root: PathBuf,
}

impl LocalArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, DeployError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.tar"))
    }

    /// Path of a cached artifact, if present.
    pub fn get(&self, name: &str) -> Option<PathBuf> {
        let path = self.path_for(name);
        path.is_file().then_some(path)
    }

    /// Atomically install a fetched artifact from `staged` under `name`.
    fn install(&self, name: &str, staged: &Path) -> Result<PathBuf, DeployError> {
        let target = self.path_for(name);
        std::fs::rename(staged, &target)?;
        Ok(target)
    }

    /// Staging path for an in-flight fetch of `name`.
    fn staging_path(&self, name: &str) -> PathBuf {
        self.root.join(format!(".{name}.tar.partial"))
    }
}

/// Remote artifact cache collaborator.
///
/// The storage implementation (HTTP artifact server, shared filesystem,
/// object store) lives outside this engine; only the query/fetch contract
/// is fixed here.
#[async_trait]
pub trait RemoteArtifactCache: Send + Sync {
    /// Whether the remote cache holds an artifact with this name.
    async fn contains(&self, name: &str) -> Result<bool, DeployError>;

    /// Copy the named artifact into `dest`.
    async fn fetch(&self, name: &str, dest: &Path) -> Result<(), DeployError>;
}

/// Remote cache backed by a mounted directory, for shared-filesystem
/// artifact stores and for tests.
#[derive(Debug, Clone)]
pub struct FilesystemRemoteCache {
    root: PathBuf,
}

impl FilesystemRemoteCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.tar"))
    }
}

#[async_trait]
impl RemoteArtifactCache for FilesystemRemoteCache {
    async fn contains(&self, name: &str) -> Result<bool, DeployError> {
        Ok(self.path_for(name).is_file())
    }

    async fn fetch(&self, name: &str, dest: &Path) -> Result<(), DeployError> {
        let source = self.path_for(name);
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || std::fs::copy(&source, &dest).map(|_| ()))
            .await
            .map_err(|e| DeployError::Other(e.into()))??;
        Ok(())
    }
}

/// Obtains a readable artifact for deployment, local cache first.
pub struct ArtifactRetriever {
    local: LocalArtifactCache,
    remote: Option<Arc<dyn RemoteArtifactCache>>,
}

impl ArtifactRetriever {
    pub fn new(local: LocalArtifactCache, remote: Option<Arc<dyn RemoteArtifactCache>>) -> Self {
        Self { local, remote }
    }

    /// Resolve the artifact to a local tarball path, fetching from the
    /// remote cache if needed. Fails with [`DeployError::NotBuilt`] when
    /// the artifact exists in neither cache.
    pub async fn obtain(&self, artifact: &ResolvedArtifact) -> Result<PathBuf, DeployError> {
        if let Some(path) = self.local.get(&artifact.name) {
            debug!(artifact = %artifact.name, "artifact found in local cache");
            return Ok(path);
        }

        if let Some(remote) = &self.remote {
            if remote.contains(&artifact.name).await? {
                info!(artifact = %artifact.name, "fetching artifact from remote cache");
                let staged = self.local.staging_path(&artifact.name);
                remote.fetch(&artifact.name, &staged).await?;
                return self.local.install(&artifact.name, &staged);
            }
        }

        Err(DeployError::NotBuilt {
            artifact: artifact.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn artifact(name: &str) -> ResolvedArtifact {
        ResolvedArtifact {
            name: name.to_string(),
            configuration_extensions: vec![],
        }
    }

    /// Remote cache mock that counts queries and fetches.
    struct CountingRemote {
        root: PathBuf,
        contains_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
    }

    impl CountingRemote {
        fn new(root: PathBuf) -> Self {
            Self {
                root,
                contains_calls: AtomicUsize::new(0),
                fetch_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteArtifactCache for CountingRemote {
        async fn contains(&self, name: &str) -> Result<bool, DeployError> {
            self.contains_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.root.join(format!("{name}.tar")).is_file())
        }

        async fn fetch(&self, name: &str, dest: &Path) -> Result<(), DeployError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            std::fs::copy(self.root.join(format!("{name}.tar")), dest)?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn local_hit_never_touches_remote() {
        let local_dir = tempfile::tempdir().unwrap();
        let remote_dir = tempfile::tempdir().unwrap();
        std::fs::write(local_dir.path().join("sys.tar"), b"tarball").unwrap();

        let remote = Arc::new(CountingRemote::new(remote_dir.path().to_path_buf()));
        let retriever = ArtifactRetriever::new(
            LocalArtifactCache::new(local_dir.path()).unwrap(),
            Some(remote.clone()),
        );

        let path = retriever.obtain(&artifact("sys")).await.unwrap();
        assert_eq!(path, local_dir.path().join("sys.tar"));
        assert_eq!(remote.contains_calls.load(Ordering::SeqCst), 0);
        assert_eq!(remote.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remote_hit_is_copied_locally_exactly_once() {
        let local_dir = tempfile::tempdir().unwrap();
        let remote_dir = tempfile::tempdir().unwrap();
        std::fs::write(remote_dir.path().join("sys.tar"), b"tarball").unwrap();

        let remote = Arc::new(CountingRemote::new(remote_dir.path().to_path_buf()));
        let retriever = ArtifactRetriever::new(
            LocalArtifactCache::new(local_dir.path()).unwrap(),
            Some(remote.clone()),
        );

        let path = retriever.obtain(&artifact("sys")).await.unwrap();
        assert_eq!(path, local_dir.path().join("sys.tar"));
        assert_eq!(std::fs::read(&path).unwrap(), b"tarball");
        assert_eq!(remote.fetch_calls.load(Ordering::SeqCst), 1);

        // Second call is served from the local cache.
        retriever.obtain(&artifact("sys")).await.unwrap();
        assert_eq!(remote.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn miss_in_both_caches_is_not_built() {
        let local_dir = tempfile::tempdir().unwrap();
        let remote_dir = tempfile::tempdir().unwrap();

        let remote = Arc::new(CountingRemote::new(remote_dir.path().to_path_buf()));
        let retriever = ArtifactRetriever::new(
            LocalArtifactCache::new(local_dir.path()).unwrap(),
            Some(remote),
        );

        let err = retriever.obtain(&artifact("sys")).await.unwrap_err();
        assert!(matches!(err, DeployError::NotBuilt { .. }));
        // No partial files left in the local cache.
        assert_eq!(std::fs::read_dir(local_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_remote_means_local_only() {
        let local_dir = tempfile::tempdir().unwrap();
        let retriever =
            ArtifactRetriever::new(LocalArtifactCache::new(local_dir.path()).unwrap(), None);

        let err = retriever.obtain(&artifact("sys")).await.unwrap_err();
        assert!(matches!(err, DeployError::NotBuilt { .. }));
    }
}
