//! Owns the Kolibri backend subprocess.
//!
//! At most one process is authoritative. `start()` sends a termination
//! request to the previous process and spawns the replacement without
//! waiting for the old one to exit. Termination is a SIGTERM on unix,
//! escalated to a kill when the process lingers.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};

use crate::error::{LauncherError, Result};

const OUTPUT_TARGET: &str = "kolibri";
const TERM_GRACE: Duration = Duration::from_secs(10);

/// What the orchestrator needs from a backend.
#[async_trait]
pub trait Backend: Send {
    async fn start(&mut self) -> Result<()>;
    async fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Exit code, `None` when the process was ended by a signal.
    Exited(Option<i32>),
}

#[derive(Debug)]
struct RunningBackend {
    pid: Option<u32>,
    terminate: Option<oneshot::Sender<()>>,
    state: watch::Receiver<ProcessState>,
}

impl RunningBackend {
    fn request_termination(&mut self) {
        if let Some(tx) = self.terminate.take() {
            // The monitor may already be gone if the process exited.
            let _ = tx.send(());
        }
    }
}

#[derive(Debug)]
pub struct BackendSupervisor {
    executable: PathBuf,
    env: Vec<(&'static str, OsString)>,
    pid_file: PathBuf,
    current: Option<RunningBackend>,
}

impl BackendSupervisor {
    pub fn new(
        executable: impl Into<PathBuf>,
        env: Vec<(&'static str, OsString)>,
        pid_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executable: executable.into(),
            env,
            pid_file: pid_file.into(),
            current: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.current.as_ref().and_then(|c| c.pid)
    }

    pub fn is_running(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| *c.state.borrow() == ProcessState::Running)
    }

    /// Watches the state of the current process, if one was spawned.
    pub fn exit_watch(&self) -> Option<watch::Receiver<ProcessState>> {
        self.current.as_ref().map(|c| c.state.clone())
    }

    async fn spawn(&mut self) -> Result<()> {
        info!("Running kolibri backend {}", self.executable.display());

        if let Some(mut previous) = self.current.take() {
            info!("Killing previous stalled server");
            previous.request_termination();
        }

        remove_pid_file(&self.pid_file).await;

        let mut command = Command::new(&self.executable);
        command
            .envs(self.env.iter().map(|(k, v)| (*k, v.as_os_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| LauncherError::Spawn {
            path: self.executable.clone(),
            source,
        })?;
        let pid = child.id();
        debug!("Backend spawned with pid {pid:?}");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(relay_output(stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(relay_output(stderr, true));
        }

        let (terminate_tx, terminate_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(ProcessState::Running);
        tokio::spawn(monitor(child, terminate_rx, state_tx));

        self.current = Some(RunningBackend {
            pid,
            terminate: Some(terminate_tx),
            state: state_rx,
        });
        Ok(())
    }
}

#[async_trait]
impl Backend for BackendSupervisor {
    async fn start(&mut self) -> Result<()> {
        self.spawn().await
    }

    async fn stop(&mut self) {
        remove_pid_file(&self.pid_file).await;
        if let Some(current) = self.current.as_mut() {
            current.request_termination();
        }
    }
}

async fn monitor(
    mut child: Child,
    terminate: oneshot::Receiver<()>,
    state: watch::Sender<ProcessState>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = terminate => terminate_child(&mut child).await,
    };

    match status {
        Ok(status) => {
            info!("child process exited with code {:?}", status.code());
            state.send_replace(ProcessState::Exited(status.code()));
        }
        Err(e) => {
            warn!("Lost track of backend process: {e}");
            state.send_replace(ProcessState::Exited(None));
        }
    }
}

/// SIGTERM first so the backend can release its port, SIGKILL if it is still
/// around after [`TERM_GRACE`].
async fn terminate_child(child: &mut Child) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: plain syscall on a pid this task still owns and has not reaped.
        let sent = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if sent == 0 {
            match tokio::time::timeout(TERM_GRACE, child.wait()).await {
                Ok(status) => return status,
                Err(_) => warn!("Backend ignored SIGTERM for {TERM_GRACE:?}, killing it"),
            }
        } else {
            debug!("SIGTERM failed: {}", std::io::Error::last_os_error());
        }
    }

    if let Err(e) = child.start_kill() {
        debug!("Termination request failed: {e}");
    }
    child.wait().await
}

async fn relay_output<R>(reader: R, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            warn!(target: OUTPUT_TARGET, "Kolibri: {line}");
        } else {
            info!(target: OUTPUT_TARGET, "Kolibri: {line}");
        }
    }
}

async fn remove_pid_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("Removed stale {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Cannot remove {}: {e}", path.display()),
    }
}
