//! Cluster-scoped temporary workspace.
//!
//! One workspace directory holds every system tree and every per-deployment
//! private scratch dir of one cluster invocation. It is a [`TempDir`], so
//! it is destroyed on every exit path when the cluster deployment call
//! returns.

use std::path::Path;

use tempfile::TempDir;

use crate::domain::errors::DeployError;

/// Create the workspace for one cluster deployment under `tempdir_root`.
pub fn create_workspace(tempdir_root: &Path) -> Result<TempDir, DeployError> {
    let deployments_root = tempdir_root.join("deployments");
    std::fs::create_dir_all(&deployments_root)?;
    let workspace = tempfile::Builder::new()
        .prefix("cluster.")
        .tempdir_in(&deployments_root)?;
    Ok(workspace)
}

/// Fail early when the filesystem holding `path` has less than `required`
/// bytes available. A requirement of 0 disables the check; deciding how
/// much space a deployment needs is the caller's configuration.
///
/// The directory is created if missing, so the check reports on the
/// filesystem that will actually hold the workspace rather than failing
/// on a not-yet-existing tempdir root.
#[cfg(unix)]
pub fn check_disk_available(path: &Path, required: u64) -> Result<(), DeployError> {
    use std::os::unix::ffi::OsStrExt;

    if required == 0 {
        return Ok(());
    }

    std::fs::create_dir_all(path).map_err(|e| {
        DeployError::configuration(format!(
            "cannot create tempdir {}: {e}",
            path.display()
        ))
    })?;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| DeployError::Other(e.into()))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        let errno = std::io::Error::last_os_error();
        return Err(DeployError::Other(anyhow::anyhow!(
            "cannot stat filesystem at {}: {errno}",
            path.display()
        )));
    }

    let available = stat.f_bavail as u64 * stat.f_frsize as u64;
    if available < required {
        return Err(DeployError::Resource {
            path: path.to_path_buf(),
            required,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_disk_available(_path: &Path, _required: u64) -> Result<(), DeployError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_requirement_always_passes() {
        let dir = tempfile::tempdir().unwrap();
        check_disk_available(dir.path(), 0).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn missing_tempdir_root_is_created_for_the_check() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("scratch/deployments");
        check_disk_available(&nested, 1).unwrap();
        assert!(nested.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn absurd_requirement_is_a_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_disk_available(dir.path(), u64::MAX).unwrap_err();
        assert!(matches!(err, DeployError::Resource { .. }));
    }

    #[test]
    fn workspace_lives_under_a_deployments_directory() {
        let root = tempfile::tempdir().unwrap();
        let workspace = create_workspace(root.path()).unwrap();
        assert!(workspace.path().starts_with(root.path().join("deployments")));
        let kept = workspace.path().to_path_buf();
        drop(workspace);
        assert!(!kept.exists());
    }
}
