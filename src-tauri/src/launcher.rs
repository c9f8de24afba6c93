//! Startup orchestration: locate the volume, seed the home directory, start
//! the backend, and poll it until the window can be pointed at it.
//!
//! All mutable launch state (retry counters, backend handle, resolved paths)
//! lives in one [`Launcher`] driven from a single task.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{oneshot, watch};

use crate::config::LauncherConfig;
use crate::environment::{self, EnvironmentContext};
use crate::error::Result;
use crate::liveness::{HealthProbe, PollAction, PollState, Poller};
use crate::navigation;
use crate::supervisor::Backend;
use crate::version_gate::VersionGate;
use crate::volume::{self, MountSource};

/// Hooks the launcher drives on the application window.
#[async_trait]
pub trait WindowHost: Send + Sync {
    /// Resolves once the page has loaded, so the other hooks find its
    /// script functions defined.
    async fn show_loading(&self, page: &Path) -> Result<()>;
    fn navigate(&self, url: &str) -> Result<()>;
    fn show_retry(&self);
    fn show_error(&self);
    fn signal_first_launch(&self);
    fn clear_cache(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LaunchPhase {
    Starting,
    Seeding,
    WaitingForBackend,
    Ready,
    VolumeMissing,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchStatus {
    pub phase: LaunchPhase,
    pub first_launch: bool,
    pub load_retries: u32,
    pub plugin_version: Option<String>,
}

impl Default for LaunchStatus {
    fn default() -> Self {
        Self {
            phase: LaunchPhase::Starting,
            first_launch: false,
            load_retries: 0,
            plugin_version: None,
        }
    }
}

/// Everything resolved before the backend is started.
#[derive(Debug)]
pub struct Session {
    pub ctx: EnvironmentContext,
    pub gate: VersionGate,
    pub poller: Poller,
    /// The home may be half copied; the marker stays unwritten so the next
    /// launch seeds again.
    pub reseed_failed: bool,
}

pub struct Launcher<W> {
    config: LauncherConfig,
    window: W,
    default_loading: PathBuf,
    status: watch::Sender<LaunchStatus>,
}

impl<W: WindowHost> Launcher<W> {
    pub fn new(
        config: LauncherConfig,
        window: W,
        default_loading: impl Into<PathBuf>,
        status: watch::Sender<LaunchStatus>,
    ) -> Self {
        Self {
            config,
            window,
            default_loading: default_loading.into(),
            status,
        }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    fn set_phase(&self, phase: LaunchPhase) {
        self.status.send_modify(|s| s.phase = phase);
    }

    /// Shows the loading screen and runs the version gate. `None` means the
    /// launch cannot go on; the fatal error has already been shown.
    pub async fn prepare(&mut self, mounts: &impl MountSource) -> Option<Session> {
        let volume = volume::locate(mounts, &self.config.marker_dir).await;

        let screen = navigation::loading_screen(
            volume.as_deref(),
            &self.config.marker_dir,
            &self.config.plugin_name,
            &self.default_loading,
        )
        .await;
        if let Err(e) = self.window.show_loading(&screen).await {
            warn!("Cannot show loading screen {}: {e}", screen.display());
        }

        let Some(ctx) = environment::resolve(volume.as_deref(), &self.config) else {
            error!("Endless Key not found");
            self.window.show_error();
            self.set_phase(LaunchPhase::VolumeMissing);
            return None;
        };

        let gate = match VersionGate::new(&ctx, &self.config.plugin_name) {
            Ok(gate) => gate,
            Err(e) => {
                error!("{e}");
                self.window.show_error();
                self.set_phase(LaunchPhase::Failed);
                return None;
            }
        };

        self.set_phase(LaunchPhase::Seeding);
        let mut poller = Poller::new(
            self.config.ping_timeout,
            self.config.max_retries,
            self.config.tick,
        );

        let (first_launch, reseed_failed) = match gate.check_and_maybe_reseed().await {
            Ok(reseeded) => (reseeded, false),
            Err(e) => {
                // The backend can still create a fresh home on its own.
                error!("Reseeding failed: {e}");
                (false, true)
            }
        };
        if first_launch {
            self.window.clear_cache();
            self.window.signal_first_launch();
            poller.extend_timeout(self.config.first_launch_bonus);
        }

        let plugin_version = gate.plugin_version().await;
        self.status.send_modify(|s| {
            s.first_launch = first_launch;
            s.plugin_version = Some(plugin_version);
        });

        Some(Session {
            ctx,
            gate,
            poller,
            reseed_failed,
        })
    }

    /// Starts the backend and polls until it answers or retries run out.
    pub async fn supervise<B, P>(
        &mut self,
        session: &mut Session,
        backend: &mut B,
        probe: &P,
    ) -> PollState
    where
        B: Backend,
        P: HealthProbe,
    {
        self.set_phase(LaunchPhase::WaitingForBackend);
        if let Err(e) = backend.start().await {
            error!("{e}");
        }

        loop {
            if probe.probe().await {
                session.poller.on_probe_succeeded();
                self.on_backend_up(session).await;
                return PollState::Success;
            }

            match session.poller.on_probe_failed() {
                PollAction::ProbeAfter(delay) => {
                    debug!("Kolibri server not yet started, checking again in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                PollAction::Restart => {
                    let retries = session.poller.retry().load_retries;
                    info!("Kolibri server not starting, retrying ({retries})...");
                    self.window.show_retry();
                    self.status.send_modify(|s| s.load_retries = retries);
                    if let Err(e) = backend.start().await {
                        error!("{e}");
                    }
                }
                PollAction::GiveUp => {
                    error!("Kolibri server did not start, giving up");
                    self.window.show_error();
                    self.set_phase(LaunchPhase::Failed);
                    return PollState::Exhausted;
                }
            }
        }
    }

    async fn on_backend_up(&mut self, session: &Session) {
        let origin = self.config.backend_origin();
        info!("Kolibri server is up at {origin}");
        if let Err(e) = self.window.navigate(&origin) {
            error!("Cannot open {origin}: {e}");
        }
        if session.reseed_failed {
            warn!("Home was not fully seeded, leaving the version marker unset");
        } else if let Err(e) = session.gate.update_version_marker().await {
            warn!("Cannot update version marker: {e}");
        }
        self.set_phase(LaunchPhase::Ready);
    }
}

/// Runs a whole launch and keeps the backend alive until a shutdown request
/// arrives. The request carries an acknowledgement sender that fires once
/// the backend has been stopped.
pub async fn run_until_shutdown<W, B, P, F>(
    mut launcher: Launcher<W>,
    mounts: impl MountSource,
    probe: P,
    make_backend: F,
    mut shutdown: oneshot::Receiver<oneshot::Sender<()>>,
) where
    W: WindowHost,
    B: Backend,
    P: HealthProbe,
    F: FnOnce(&LauncherConfig, &EnvironmentContext) -> B,
{
    let Some(mut session) = launcher.prepare(&mounts).await else {
        if let Ok(ack) = shutdown.await {
            let _ = ack.send(());
        }
        return;
    };

    let mut backend = make_backend(launcher.config(), &session.ctx);
    let interrupted = tokio::select! {
        biased;
        ack = &mut shutdown => Some(ack.ok()),
        state = launcher.supervise(&mut session, &mut backend, &probe) => {
            debug!("Launch finished in state {state:?}");
            None
        }
    };
    let ack = match interrupted {
        Some(ack) => ack,
        None => shutdown.await.ok(),
    };

    info!("Shutting down Kolibri backend");
    backend.stop().await;
    if let Some(ack) = ack {
        let _ = ack.send(());
    }
}
