//! Extension subprocess execution.
//!
//! Extensions are external executables implementing one phase of a
//! deployment. They are looked up by name plus a kind suffix
//! (`.check`, `.configure`, `.write`), first in the definitions repository
//! and then among the tool's bundled extensions.
//!
//! # Execution contract
//!
//! The extension runs as a subprocess with the caller-supplied argv, its
//! complete process environment, and the definitions repository root as its
//! working directory. Three output channels are demultiplexed:
//!
//! - **status** — subprocess stdout, forwarded line by line as operator
//!   progress; literal `%s` is escaped to `%%` before the line reaches any
//!   interpolating reporter
//! - **error** — subprocess stderr, echoed live through the sink and also
//!   accumulated in order for the final failure message
//! - **log** — structured debug lines the extension writes to the file
//!   named by `SYSFORGE_LOG` in its environment, recorded at debug
//!   severity and never surfaced to the operator by default
//!
//! Exit code 0 is success. Any other exit fails with the extension name,
//! kind, exit code, and the accumulated error-stream text.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::domain::errors::DeployError;

/// Environment variable naming the extension's debug-log file.
pub const EXTENSION_LOG_VAR: &str = "SYSFORGE_LOG";

/// The three phases an extension can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionKind {
    Check,
    Configure,
    Write,
}

impl ExtensionKind {
    /// Filename suffix identifying this kind of extension.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Check => ".check",
            Self::Configure => ".configure",
            Self::Write => ".write",
        }
    }
}

impl std::fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Named sinks for the demultiplexed subprocess output.
///
/// `error` lines are echoed through the sink as they arrive; the runner
/// separately accumulates them for the failure message, so a sink
/// implementation only has to handle live display.
pub trait ExtensionOutputSink: Send + Sync {
    /// One operator-facing progress line (stdout, `%s` already escaped).
    fn status(&self, line: &str);

    /// One error-stream line, delivered in order.
    fn error(&self, line: &str);

    /// One debug-log line from the extension's log channel.
    fn log(&self, line: &str) {
        debug!("{line}");
    }
}

/// Locates and executes deployment extensions.
#[derive(Debug, Clone, Default)]
pub struct ExtensionRunner {
    /// Directory holding the extensions shipped with the tool itself,
    /// consulted after the definitions repository.
    bundled_dir: Option<PathBuf>,
}

impl ExtensionRunner {
    pub fn new(bundled_dir: Option<PathBuf>) -> Self {
        Self { bundled_dir }
    }

    /// Find the executable for `name` + `kind`, repository first, bundled
    /// extensions second.
    fn locate(&self, repo_root: &Path, name: &str, kind: ExtensionKind) -> Option<PathBuf> {
        let filename = format!("{name}{}", kind.suffix());
        let mut candidates = vec![
            repo_root.join(&filename),
            repo_root.join("extensions").join(&filename),
        ];
        if let Some(bundled) = &self.bundled_dir {
            candidates.push(bundled.join(&filename));
        }
        candidates.into_iter().find(|path| is_executable(path))
    }

    /// Run one extension to completion.
    ///
    /// Returns [`DeployError::ExtensionNotFound`] when no executable
    /// exists; the caller treats that as a no-op for `check` extensions
    /// and as fatal for `configure` and `write`.
    pub async fn run(
        &self,
        repo_root: &Path,
        name: &str,
        kind: ExtensionKind,
        argv: &[String],
        env: &HashMap<String, String>,
        sink: &Arc<dyn ExtensionOutputSink>,
    ) -> Result<(), DeployError> {
        let executable =
            self.locate(repo_root, name, kind)
                .ok_or_else(|| DeployError::ExtensionNotFound {
                    name: name.to_string(),
                    kind: kind.suffix().to_string(),
                })?;
        let executable = std::fs::canonicalize(&executable)?;

        // The debug-log channel lives in the deployment's private scratch
        // dir, so it is cleaned up with everything else the extension wrote.
        let log_path = env
            .get("TMPDIR")
            .map(|tmpdir| Path::new(tmpdir).join(format!("{name}{}.log", kind.suffix())));

        let mut command = Command::new(&executable);
        command
            .args(argv)
            .env_clear()
            .envs(env)
            .current_dir(repo_root)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        if let Some(log_path) = &log_path {
            command.env(EXTENSION_LOG_VAR, log_path);
        }

        debug!(extension = %executable.display(), ?argv, "running extension");
        let mut child = command.spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("extension stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("extension stderr was not captured"))?;

        let status_stream = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                // Escape literal %s so a format-interpolating reporter
                // cannot be injected through extension output.
                sink.status(&line.replace("%s", "%%"));
            }
        };
        let error_stream = async {
            let mut collected = Vec::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                sink.error(&line);
                collected.push(line);
            }
            collected
        };

        let (_, error_lines, status) = tokio::join!(status_stream, error_stream, child.wait());
        let status = status?;

        if let Some(log_path) = &log_path {
            if let Ok(contents) = std::fs::read_to_string(log_path) {
                for line in contents.lines() {
                    sink.log(line);
                }
            }
        }

        match status.code() {
            Some(0) => {
                info!("{name}{} succeeded", kind.suffix());
                Ok(())
            }
            code => Err(DeployError::ExtensionFailed {
                name: name.to_string(),
                kind: kind.suffix().to_string(),
                // None means the subprocess died on a signal.
                code: code.unwrap_or(-1),
                stderr: error_lines.join("\n"),
            }),
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        status: Mutex<Vec<String>>,
        errors: Mutex<Vec<String>>,
        logs: Mutex<Vec<String>>,
    }

    impl ExtensionOutputSink for RecordingSink {
        fn status(&self, line: &str) {
            self.status.lock().unwrap().push(line.to_string());
        }
        fn error(&self, line: &str) {
            self.errors.lock().unwrap().push(line.to_string());
        }
        fn log(&self, line: &str) {
            self.logs.lock().unwrap().push(line.to_string());
        }
    }

    fn write_script(dir: &Path, filename: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(filename);
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn sink() -> (Arc<RecordingSink>, Arc<dyn ExtensionOutputSink>) {
        let recording = Arc::new(RecordingSink::default());
        let as_sink: Arc<dyn ExtensionOutputSink> = recording.clone();
        (recording, as_sink)
    }

    #[tokio::test]
    async fn stdout_becomes_status_with_percent_escaping() {
        let repo = tempfile::tempdir().unwrap();
        write_script(repo.path(), "tar.write", "echo 'writing 100%s done'\necho second");

        let (recording, as_sink) = sink();
        ExtensionRunner::default()
            .run(
                repo.path(),
                "tar",
                ExtensionKind::Write,
                &["tree".into(), "/out".into()],
                &HashMap::new(),
                &as_sink,
            )
            .await
            .unwrap();

        let status = recording.status.lock().unwrap();
        assert_eq!(*status, vec!["writing 100%% done", "second"]);
    }

    #[tokio::test]
    async fn nonzero_exit_carries_accumulated_stderr() {
        let repo = tempfile::tempdir().unwrap();
        write_script(
            repo.path(),
            "rawdisk.write",
            "echo 'no such device' 1>&2\necho 'giving up' 1>&2\nexit 3",
        );

        let (recording, as_sink) = sink();
        let err = ExtensionRunner::default()
            .run(
                repo.path(),
                "rawdisk",
                ExtensionKind::Write,
                &[],
                &HashMap::new(),
                &as_sink,
            )
            .await
            .unwrap_err();

        match err {
            DeployError::ExtensionFailed {
                name,
                kind,
                code,
                stderr,
            } => {
                assert_eq!(name, "rawdisk");
                assert_eq!(kind, ".write");
                assert_eq!(code, 3);
                assert_eq!(stderr, "no such device\ngiving up");
            }
            other => panic!("unexpected error: {other}"),
        }
        // Stderr was also echoed live.
        assert_eq!(recording.errors.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_extension_reports_not_found() {
        let repo = tempfile::tempdir().unwrap();
        let (_, as_sink) = sink();
        let err = ExtensionRunner::default()
            .run(
                repo.path(),
                "kvm",
                ExtensionKind::Check,
                &[],
                &HashMap::new(),
                &as_sink,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::ExtensionNotFound { .. }));
    }

    #[tokio::test]
    async fn repository_extension_wins_over_bundled() {
        let repo = tempfile::tempdir().unwrap();
        let bundled = tempfile::tempdir().unwrap();
        write_script(repo.path(), "tar.write", "echo from-repo");
        write_script(bundled.path(), "tar.write", "echo from-bundled");

        let (recording, as_sink) = sink();
        ExtensionRunner::new(Some(bundled.path().to_path_buf()))
            .run(
                repo.path(),
                "tar",
                ExtensionKind::Write,
                &[],
                &HashMap::new(),
                &as_sink,
            )
            .await
            .unwrap();

        assert_eq!(*recording.status.lock().unwrap(), vec!["from-repo"]);
    }

    #[tokio::test]
    async fn bundled_extension_is_a_fallback() {
        let repo = tempfile::tempdir().unwrap();
        let bundled = tempfile::tempdir().unwrap();
        write_script(bundled.path(), "set-hostname.configure", "echo bundled-ran");

        let (recording, as_sink) = sink();
        ExtensionRunner::new(Some(bundled.path().to_path_buf()))
            .run(
                repo.path(),
                "set-hostname",
                ExtensionKind::Configure,
                &[],
                &HashMap::new(),
                &as_sink,
            )
            .await
            .unwrap();

        assert_eq!(*recording.status.lock().unwrap(), vec!["bundled-ran"]);
    }

    #[tokio::test]
    async fn log_channel_is_forwarded_at_debug() {
        let repo = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        write_script(
            repo.path(),
            "tar.write",
            "echo 'probing target' >> \"$SYSFORGE_LOG\"\necho 'target ok' >> \"$SYSFORGE_LOG\"",
        );

        let mut env = HashMap::new();
        env.insert(
            "TMPDIR".to_string(),
            scratch.path().to_string_lossy().into_owned(),
        );

        let (recording, as_sink) = sink();
        ExtensionRunner::default()
            .run(
                repo.path(),
                "tar",
                ExtensionKind::Write,
                &[],
                &env,
                &as_sink,
            )
            .await
            .unwrap();

        let logs = recording.logs.lock().unwrap();
        assert_eq!(*logs, vec!["probing target", "target ok"]);
    }

    #[tokio::test]
    async fn extension_receives_argv_env_and_cwd() {
        let repo = tempfile::tempdir().unwrap();
        write_script(repo.path(), "tar.write", "echo \"$1|$2|$HOSTNAME|$(pwd)\"");

        let mut env = HashMap::new();
        env.insert("HOSTNAME".to_string(), "node1".to_string());
        env.insert("PATH".to_string(), std::env::var("PATH").unwrap());

        let (recording, as_sink) = sink();
        ExtensionRunner::default()
            .run(
                repo.path(),
                "tar",
                ExtensionKind::Write,
                &["/tree".into(), "/out/x.tar".into()],
                &env,
                &as_sink,
            )
            .await
            .unwrap();

        let status = recording.status.lock().unwrap();
        let expected_cwd = std::fs::canonicalize(repo.path()).unwrap();
        assert_eq!(
            status[0],
            format!("/tree|/out/x.tar|node1|{}", expected_cwd.display())
        );
    }
}
