//! On-demand beacon builds.
//!
//! Runs the external build tool for one flavor at a time, passing the
//! callback URL as a single argument, and hands back the finished archive.
//! The previous archive of the flavor is moved aside while the tool runs, so
//! only a file this build created can be served. A failed build puts the
//! previous archive back.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use evilmsg_core::config::BuilderConfig;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::flavor::{BeaconFlavor, CallbackEndpoint};
use crate::project_id::{InvalidProjectId, check_project_id};

/// How long to keep reading the tool's pipes once it has exited or been
/// killed. Bounds the wait when a grandchild still holds a pipe open.
const OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// A finished beacon, read while its flavor was still locked.
#[derive(Debug, Clone)]
pub struct BuildArtifact {
    pub project_id: i64,
    pub flavor: BeaconFlavor,
    pub callback_url: String,
    /// Download name, e.g. `agent_linux_7.zip`.
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Builds beacons by invoking the configured tool.
pub struct BeaconBuilder {
    program: PathBuf,
    args: Vec<String>,
    work_dir: PathBuf,
    timeout: Duration,
    callback: CallbackEndpoint,
    /// One lock per flavor; the artifact path of a flavor is shared.
    locks: [Mutex<()>; BeaconFlavor::ALL.len()],
    /// Cancelled when the server shuts down.
    shutdown: CancellationToken,
}

impl BeaconBuilder {
    pub fn new(
        config: &BuilderConfig,
        callback: CallbackEndpoint,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            work_dir: config.work_dir.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            callback,
            locks: std::array::from_fn(|_| Mutex::new(())),
            shutdown,
        }
    }

    /// Override the build timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub const fn callback(&self) -> &CallbackEndpoint {
        &self.callback
    }

    /// Build the `flavor` beacon for `project_id`, cancelled only by server
    /// shutdown (or by dropping the returned future).
    pub async fn build(
        &self,
        flavor: BeaconFlavor,
        project_id: i64,
    ) -> Result<BuildArtifact, BuildError> {
        let cancel = self.shutdown.child_token();
        self.build_with_cancel(flavor, project_id, &cancel).await
    }

    /// Build with an extra cancellation signal. Cancelling kills the
    /// external process and leaves the previous artifact in place.
    pub async fn build_with_cancel(
        &self,
        flavor: BeaconFlavor,
        project_id: i64,
        cancel: &CancellationToken,
    ) -> Result<BuildArtifact, BuildError> {
        let project_id = check_project_id(project_id)?;
        let callback_url = self.callback.url_for(project_id);

        let _guard = tokio::select! {
            guard = self.locks[flavor.index()].lock() => guard,
            () = cancel.cancelled() => return Err(BuildError::failed(BuildFailure::Cancelled, String::new())),
            () = self.shutdown.cancelled() => return Err(BuildError::failed(BuildFailure::Cancelled, String::new())),
        };

        let artifact_path = self.work_dir.join(flavor.artifact_path());
        let stash = ArtifactStash::new(artifact_path.clone()).await.map_err(|e| {
            error!(%flavor, path = %artifact_path.display(), error = %e, "Failed to move previous artifact aside");
            BuildError::failed(BuildFailure::ArtifactUnreadable(e.to_string()), String::new())
        })?;

        info!(project_id, %flavor, %callback_url, "Building beacon");
        let output = self.run_tool(flavor, &callback_url, cancel).await?;
        debug!(project_id, %flavor, output = %output, "Build tool output");

        // The previous archive is aside, so anything here is from this build.
        let bytes = match tokio::fs::read(&artifact_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!(
                    project_id,
                    %flavor,
                    path = %artifact_path.display(),
                    output = %output,
                    "Build finished but produced no artifact"
                );
                return Err(BuildError::failed(BuildFailure::MissingArtifact, output));
            }
            Err(e) => {
                error!(project_id, %flavor, path = %artifact_path.display(), error = %e, "Failed to read artifact");
                return Err(BuildError::failed(
                    BuildFailure::ArtifactUnreadable(e.to_string()),
                    output,
                ));
            }
        };
        stash.commit().await;

        info!(project_id, %flavor, size = bytes.len(), "Beacon built");
        Ok(BuildArtifact {
            project_id,
            flavor,
            callback_url,
            file_name: flavor.download_name(project_id),
            bytes,
        })
    }

    /// Run `<program> [args..] <target> HIT_URL=<url>` and return its
    /// combined output on a zero exit status. Output read before a timeout
    /// or cancellation is kept in the error.
    async fn run_tool(
        &self,
        flavor: BeaconFlavor,
        callback_url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, BuildError> {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(&self.work_dir)
            .args(&self.args)
            .arg(flavor.target())
            .arg(format!("HIT_URL={callback_url}"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            program = %self.program.display(),
            args = ?self.args,
            target = flavor.target(),
            work_dir = %self.work_dir.display(),
            "exec build tool"
        );

        let mut child = cmd.spawn().map_err(|e| {
            error!(program = %self.program.display(), error = %e, "Failed to spawn build tool");
            BuildError::failed(BuildFailure::Spawn(e.to_string()), String::new())
        })?;
        let stdout = PipeCapture::spawn(child.stdout.take());
        let stderr = PipeCapture::spawn(child.stderr.take());

        let waited = tokio::select! {
            res = tokio::time::timeout(self.timeout, child.wait()) => match res {
                Ok(Ok(status)) => Ok(status),
                Ok(Err(e)) => Err(BuildFailure::Spawn(e.to_string())),
                Err(_) => Err(BuildFailure::TimedOut(self.timeout)),
            },
            () = cancel.cancelled() => Err(BuildFailure::Cancelled),
            () = self.shutdown.cancelled() => Err(BuildFailure::Cancelled),
        };

        if waited.is_err()
            && let Err(e) = child.kill().await
        {
            warn!(%flavor, error = %e, "Failed to kill build tool");
        }

        let mut combined = String::from_utf8_lossy(&stdout.finish().await).into_owned();
        combined.push_str(&String::from_utf8_lossy(&stderr.finish().await));

        let status = match waited {
            Ok(status) => status,
            Err(BuildFailure::Cancelled) => {
                warn!(%flavor, output = %combined, "Build cancelled, build tool killed");
                return Err(BuildError::failed(BuildFailure::Cancelled, combined));
            }
            Err(reason) => {
                error!(%flavor, reason = reason.code(), output = %combined, "Build tool did not finish");
                return Err(BuildError::failed(reason, combined));
            }
        };

        if !status.success() {
            error!(
                %flavor,
                %status,
                output = %combined,
                "Build tool failed"
            );
            return Err(BuildError::failed(
                BuildFailure::ExitStatus(status.code()),
                combined,
            ));
        }

        Ok(combined)
    }
}

/// Holds the previous artifact of a flavor aside while a build runs.
/// Dropped without [`Self::commit`], it removes whatever the build left at
/// the artifact path and puts the previous artifact back.
struct ArtifactStash {
    path: PathBuf,
    aside: PathBuf,
    had_previous: bool,
    committed: bool,
}

impl ArtifactStash {
    async fn new(path: PathBuf) -> std::io::Result<Self> {
        let aside = aside_path(&path);
        let had_previous = match tokio::fs::rename(&path, &aside).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e),
        };
        Ok(Self {
            path,
            aside,
            had_previous,
            committed: false,
        })
    }

    /// Keep the new artifact and discard the previous one.
    async fn commit(mut self) {
        self.committed = true;
        if self.had_previous
            && let Err(e) = tokio::fs::remove_file(&self.aside).await
        {
            warn!(path = %self.aside.display(), error = %e, "Failed to remove previous artifact");
        }
    }
}

impl Drop for ArtifactStash {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let restored = if self.had_previous {
            std::fs::rename(&self.aside, &self.path)
        } else {
            match std::fs::remove_file(&self.path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        };
        match restored {
            Ok(()) => debug!(path = %self.path.display(), "Previous artifact restored"),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to restore previous artifact");
            }
        }
    }
}

/// `agents/agent_linux.zip` -> `agents/agent_linux.zip.prev`
fn aside_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".prev");
    path.with_file_name(name)
}

/// Reads one of the tool's pipes in the background. What was read stays
/// available even when the reader has to be abandoned.
struct PipeCapture {
    buf: Arc<std::sync::Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl PipeCapture {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let task = tokio::spawn(async move {
            let Some(mut pipe) = pipe else { return };
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut buf) = sink.lock() {
                            buf.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
        });
        Self { buf, task }
    }

    /// Wait up to [`OUTPUT_GRACE`] for the pipe to close, then take what
    /// was read.
    async fn finish(self) -> Vec<u8> {
        let mut task = self.task;
        if tokio::time::timeout(OUTPUT_GRACE, &mut task).await.is_err() {
            task.abort();
        }
        self.buf
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }
}

/// Why a build produced no usable artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildFailure {
    Spawn(String),
    ExitStatus(Option<i32>),
    MissingArtifact,
    ArtifactUnreadable(String),
    TimedOut(Duration),
    Cancelled,
}

impl BuildFailure {
    /// Stable reason code for logs and metrics.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "spawn_failed",
            Self::ExitStatus(_) => "exit_status",
            Self::MissingArtifact => "missing_artifact",
            Self::ArtifactUnreadable(_) => "artifact_unreadable",
            Self::TimedOut(_) => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(reason) => write!(f, "could not run build tool: {reason}"),
            Self::ExitStatus(Some(code)) => write!(f, "build tool exited with status {code}"),
            Self::ExitStatus(None) => write!(f, "build tool killed by signal"),
            Self::MissingArtifact => write!(f, "build tool produced no artifact"),
            Self::ArtifactUnreadable(reason) => write!(f, "artifact unreadable: {reason}"),
            Self::TimedOut(after) => write!(f, "build timed out after {after:?}"),
            Self::Cancelled => write!(f, "build cancelled"),
        }
    }
}

/// Errors from beacon builds.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    InvalidProjectId(#[from] InvalidProjectId),

    /// `output` is the tool's raw stdout+stderr; log it, never return it to
    /// a network caller.
    #[error("beacon build failed ({}): {reason}", reason.code())]
    BuildFailed { reason: BuildFailure, output: String },
}

impl BuildError {
    fn failed(reason: BuildFailure, output: String) -> Self {
        Self::BuildFailed { reason, output }
    }
}
