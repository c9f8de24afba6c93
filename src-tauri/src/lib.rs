pub mod config;
pub mod environment;
pub mod error;
pub mod launcher;
pub mod liveness;
pub mod navigation;
pub mod supervisor;
pub mod version_gate;
pub mod volume;
#[cfg(feature = "desktop")]
mod window;

pub use config::LauncherConfig;
pub use error::{LauncherError, Result};
pub use launcher::{LaunchPhase, LaunchStatus, Launcher, WindowHost};

use log::info;

/// Makes the start of each run easy to spot in a shared log file.
pub fn log_startup_banner() {
    info!("");
    info!("**************************************");
    info!("*   Kolibri Launcher Initializing    *");
    info!("**************************************");
    info!("");
    info!("Started at: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
}

#[cfg(feature = "desktop")]
mod desktop {
    use std::sync::Mutex;
    use std::time::Duration;

    use log::{error, warn};
    use tauri::{AppHandle, Manager, RunEvent};
    use tauri_plugin_log::{RotationStrategy, Target, TargetKind};
    use tokio::sync::{oneshot, watch};

    use crate::config::{LauncherConfig, LOG_FILE_NAME};
    use crate::launcher::{run_until_shutdown, LaunchStatus, Launcher};
    use crate::liveness::HttpProbe;
    use crate::supervisor::BackendSupervisor;
    use crate::volume::SystemMounts;
    use crate::window::{create_main_window, DEFAULT_LOADING_PAGE};

    const LOG_MAX_BYTES: u128 = 5 * 1024 * 1024;
    const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

    struct StatusChannel(watch::Receiver<LaunchStatus>);

    struct ShutdownSignal(Mutex<Option<oneshot::Sender<oneshot::Sender<()>>>>);

    #[tauri::command]
    fn launcher_status(status: tauri::State<'_, StatusChannel>) -> LaunchStatus {
        status.0.borrow().clone()
    }

    #[cfg_attr(mobile, tauri::mobile_entry_point)]
    pub fn run() {
        let config = LauncherConfig::from_env().unwrap_or_else(|e| {
            eprintln!("Ignoring launcher overrides: {e}");
            LauncherConfig::default()
        });
        let (status_tx, status_rx) = watch::channel(LaunchStatus::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tauri::Builder::default()
            .plugin(tauri_plugin_opener::init())
            .manage(StatusChannel(status_rx))
            .manage(ShutdownSignal(Mutex::new(Some(shutdown_tx))))
            .invoke_handler(tauri::generate_handler![launcher_status])
            .setup(move |app| {
                app.handle().plugin(
                    tauri_plugin_log::Builder::default()
                        .level(log::LevelFilter::Info)
                        .level_for("reqwest", log::LevelFilter::Warn)
                        .level_for("hyper_util", log::LevelFilter::Warn)
                        .clear_targets()
                        .targets([
                            Target::new(TargetKind::Stdout),
                            Target::new(TargetKind::Folder {
                                path: config.log_dir.clone(),
                                file_name: Some(LOG_FILE_NAME.to_string()),
                            }),
                        ])
                        .max_file_size(LOG_MAX_BYTES)
                        .rotation_strategy(RotationStrategy::KeepAll)
                        .build(),
                )?;
                crate::log_startup_banner();

                let window = create_main_window(app.handle(), config.backend_origin())?;
                let launcher = Launcher::new(
                    config.clone(),
                    window,
                    DEFAULT_LOADING_PAGE,
                    status_tx,
                );
                let probe = HttpProbe::new(config.health_url());
                tauri::async_runtime::spawn(run_until_shutdown(
                    launcher,
                    SystemMounts,
                    probe,
                    |config, ctx| {
                        BackendSupervisor::new(
                            config.backend_executable.clone(),
                            ctx.child_env(),
                            config.pid_file(),
                        )
                    },
                    shutdown_rx,
                ));
                Ok(())
            })
            .build(tauri::generate_context!())
            .expect("error while building tauri application")
            .run(|app, event| {
                if let RunEvent::Exit = event {
                    shutdown_backend(app);
                }
            });
    }

    /// Asks the launch task to stop the backend and waits briefly for it.
    fn shutdown_backend(app: &AppHandle) {
        let signal = app.state::<ShutdownSignal>();
        let sender = match signal.0.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(sender) = sender else { return };

        let (ack_tx, ack_rx) = oneshot::channel();
        if sender.send(ack_tx).is_err() {
            error!("Launch task is gone, backend not stopped");
            return;
        }
        tauri::async_runtime::block_on(async {
            if tokio::time::timeout(SHUTDOWN_GRACE, ack_rx).await.is_err() {
                warn!("Backend shutdown timed out");
            }
        });
    }
}

#[cfg(feature = "desktop")]
pub use desktop::run;
