//! End to end launches against a fake volume, a shell script backend and a
//! local HTTP listener standing in for Kolibri's health endpoint.

mod common;

use std::path::PathBuf;
use std::time::Duration;

use common::{KeyFixture, RecordingWindow};
use launcher_lib::launcher::run_until_shutdown;
use launcher_lib::liveness::HttpProbe;
use launcher_lib::supervisor::BackendSupervisor;
use launcher_lib::{LaunchPhase, LaunchStatus, Launcher, LauncherConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};

const WAIT: Duration = Duration::from_secs(15);

/// Answers every request with 200 until the test ends.
async fn serve_health() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{}")
                    .await;
            });
        }
    });
    port
}

/// A port nothing listens on.
fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

struct Running {
    status: watch::Receiver<LaunchStatus>,
    shutdown: oneshot::Sender<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl Running {
    async fn wait_for_phase(&mut self, phase: LaunchPhase) {
        tokio::time::timeout(WAIT, self.status.wait_for(|s| s.phase == phase))
            .await
            .expect("launch did not reach the expected phase")
            .unwrap();
    }

    async fn shutdown(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.shutdown.send(ack_tx).unwrap();
        tokio::time::timeout(WAIT, ack_rx).await.unwrap().unwrap();
        self.task.await.unwrap();
    }
}

fn launch(config: LauncherConfig, window: RecordingWindow, mounts: Vec<PathBuf>) -> Running {
    let (status_tx, status_rx) = watch::channel(LaunchStatus::default());
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let probe = HttpProbe::new(format!(
        "http://127.0.0.1:{}/api/public/info",
        config.backend_port
    ));
    let launcher = Launcher::new(config, window, "_load.html", status_tx);
    let task = tokio::spawn(run_until_shutdown(
        launcher,
        mounts,
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
    Running {
        status: status_rx,
        shutdown: shutdown_tx,
        task,
    }
}

async fn wait_for_file(path: &std::path::Path) -> String {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if let Ok(contents) = tokio::fs::read_to_string(path).await {
            if contents.ends_with('\n') {
                return contents;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "{} never written", path.display());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(unix)]
#[tokio::test]
async fn first_launch_seeds_home_and_opens_backend() {
    let key = KeyFixture::new("4.1.0");
    let scripts = tempfile::TempDir::new().unwrap();
    let env_dump = scripts.path().join("env.txt");
    let backend = common::fake_backend(
        scripts.path(),
        &format!(
            "printf '%s|%s|%s|%s\\n' \"$KOLIBRI_HOME\" \"$PYTHONPATH\" \"$KOLIBRI_CONTENT_FALLBACK_DIRS\" \"$KOLIBRI_HTTP_PORT\" > '{}'\nexec sleep 30",
            env_dump.display()
        ),
    );
    let port = serve_health().await;
    let config = LauncherConfig {
        backend_port: port,
        backend_executable: backend,
        tick: Duration::from_millis(50),
        ..key.config()
    };
    let home = config.home_dir.clone();
    std::fs::create_dir_all(&home).unwrap();
    std::fs::write(config.pid_file(), "999").unwrap();

    let window = RecordingWindow::default();
    let mut running = launch(config, window.clone(), key.mounts());
    running.wait_for_phase(LaunchPhase::Ready).await;

    let status = running.status.borrow().clone();
    assert!(status.first_launch);
    assert_eq!(status.plugin_version.as_deref(), Some("4.1.0"));
    assert_eq!(window.count("clear_cache"), 1);
    assert_eq!(window.count("first_launch"), 1);
    assert_eq!(window.count(&format!("navigate http://localhost:{port}")), 1);
    assert_eq!(window.count("error"), 0);

    assert!(home.join("options.ini").exists());
    assert!(!home.join("server.pid").exists());
    assert_eq!(std::fs::read_to_string(home.join("version")).unwrap(), "4.1.0");

    let env = wait_for_file(&env_dump).await;
    let fields: Vec<&str> = env.trim_end().split('|').collect();
    let data = key.volume.path().join("KOLIBRI_DATA");
    assert_eq!(fields[0], home.display().to_string());
    assert_eq!(fields[1], data.join("extensions").display().to_string());
    assert_eq!(fields[2], data.join("content").display().to_string());
    assert_eq!(fields[3], port.to_string());

    running.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn second_launch_keeps_existing_home() {
    let key = KeyFixture::new("4.1.0");
    let scripts = tempfile::TempDir::new().unwrap();
    let backend = common::fake_backend(scripts.path(), "exec sleep 30");
    let port = serve_health().await;
    let config = LauncherConfig {
        backend_port: port,
        backend_executable: backend,
        tick: Duration::from_millis(50),
        ..key.config()
    };
    let home = config.home_dir.clone();

    let first = RecordingWindow::default();
    let mut running = launch(config.clone(), first.clone(), key.mounts());
    running.wait_for_phase(LaunchPhase::Ready).await;
    running.shutdown().await;

    std::fs::write(home.join("learner-progress.json"), "{}").unwrap();

    let second = RecordingWindow::default();
    let mut running = launch(config, second.clone(), key.mounts());
    running.wait_for_phase(LaunchPhase::Ready).await;
    assert!(!running.status.borrow().first_launch);
    assert_eq!(second.count("first_launch"), 0);
    assert_eq!(second.count("clear_cache"), 0);
    assert!(home.join("learner-progress.json").exists());
    running.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn custom_loading_screen_is_shown() {
    let key = KeyFixture::new("4.1.0");
    let page = key.install_custom_loading_screen();
    let scripts = tempfile::TempDir::new().unwrap();
    let backend = common::fake_backend(scripts.path(), "exec sleep 30");
    let port = serve_health().await;
    let config = LauncherConfig {
        backend_port: port,
        backend_executable: backend,
        tick: Duration::from_millis(50),
        ..key.config()
    };

    let window = RecordingWindow::default();
    let mut running = launch(config, window.clone(), key.mounts());
    running.wait_for_phase(LaunchPhase::Ready).await;
    assert_eq!(window.events()[0], format!("loading {}", page.display()));
    running.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn unreachable_backend_ends_in_failure() {
    let key = KeyFixture::new("4.1.0");
    let scripts = tempfile::TempDir::new().unwrap();
    let backend = common::fake_backend(scripts.path(), "exec sleep 30");
    let config = LauncherConfig {
        backend_port: closed_port(),
        backend_executable: backend,
        tick: Duration::from_millis(10),
        ping_timeout: 3,
        first_launch_bonus: 0,
        max_retries: 1,
        ..key.config()
    };
    let version_file = config.version_file();

    let window = RecordingWindow::default();
    let mut running = launch(config, window.clone(), key.mounts());
    running.wait_for_phase(LaunchPhase::Failed).await;

    assert_eq!(window.count("retry"), 1);
    assert_eq!(window.count("error"), 1);
    assert_eq!(window.count("navigate"), 0);
    assert_eq!(running.status.borrow().load_retries, 1);
    assert!(!version_file.exists());
    running.shutdown().await;
}

#[tokio::test]
async fn missing_volume_never_starts_backend() {
    let key = KeyFixture::new("4.1.0");
    let config = LauncherConfig {
        backend_executable: PathBuf::from("/nonexistent/Kolibri"),
        ..key.config()
    };

    let window = RecordingWindow::default();
    let mut running = launch(config, window.clone(), vec![key.home.path().to_path_buf()]);
    running.wait_for_phase(LaunchPhase::VolumeMissing).await;

    assert_eq!(
        window.events(),
        vec!["loading _load.html".to_string(), "error".to_string()]
    );
    running.shutdown().await;
}

#[test]
fn status_serializes_in_camel_case() {
    let status = LaunchStatus {
        phase: LaunchPhase::WaitingForBackend,
        first_launch: true,
        load_retries: 2,
        plugin_version: Some("4.1.0".to_string()),
    };
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "phase": "waitingForBackend",
            "firstLaunch": true,
            "loadRetries": 2,
            "pluginVersion": "4.1.0",
        })
    );
}
