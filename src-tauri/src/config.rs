use std::path::PathBuf;
use std::time::Duration;

use crate::error::{LauncherError, Result};

pub const BACKEND_HOST: &str = "localhost";
pub const DEFAULT_BACKEND_PORT: u16 = 5000;
pub const HEALTH_PATH: &str = "/api/public/info";
pub const DEFAULT_PING_TIMEOUT: u32 = 20;
pub const FIRST_LAUNCH_BONUS: u32 = 20;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const MARKER_DIR: &str = "KOLIBRI_DATA";
pub const PLUGIN_NAME: &str = "kolibri_explore_plugin";
pub const HOME_DIR_NAME: &str = ".endless-key";
pub const VERSION_FILE: &str = "version";
pub const PID_FILE: &str = "server.pid";
pub const LOG_FILE_NAME: &str = "kolibri-app";
pub const APP_DATA_DIR_NAME: &str = "endless-key-launcher";

const PORT_ENV: &str = "KOLIBRI_LAUNCHER_PORT";
const PING_TIMEOUT_ENV: &str = "KOLIBRI_LAUNCHER_PING_TIMEOUT";
const MAX_RETRIES_ENV: &str = "KOLIBRI_LAUNCHER_MAX_RETRIES";
const HOME_ENV: &str = "KOLIBRI_LAUNCHER_HOME";
const BACKEND_ENV: &str = "KOLIBRI_LAUNCHER_BACKEND";
const LOG_DIR_ENV: &str = "KOLIBRI_LAUNCHER_LOG_DIR";

const PING_TIMEOUT_MAX: u32 = 600;
const MAX_RETRIES_MAX: u32 = 20;

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub backend_port: u16,
    /// Number of failed ticks tolerated before a restart.
    pub ping_timeout: u32,
    /// Extra ticks granted while a freshly seeded home is being imported.
    pub first_launch_bonus: u32,
    pub max_retries: u32,
    pub tick: Duration,
    pub marker_dir: String,
    pub plugin_name: String,
    pub home_dir: PathBuf,
    /// Kept outside `home_dir`, which is wiped on every reseed.
    pub log_dir: PathBuf,
    pub backend_executable: PathBuf,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            backend_port: DEFAULT_BACKEND_PORT,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            first_launch_bonus: FIRST_LAUNCH_BONUS,
            max_retries: DEFAULT_MAX_RETRIES,
            tick: Duration::from_secs(1),
            marker_dir: MARKER_DIR.to_string(),
            plugin_name: PLUGIN_NAME.to_string(),
            home_dir: default_home_dir(),
            log_dir: default_log_dir(),
            backend_executable: default_backend_executable(),
        }
    }
}

impl LauncherConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds a config from defaults plus whatever `lookup` returns for the
    /// override variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = parse_var::<u16>(&lookup, PORT_ENV)? {
            if port == 0 {
                return Err(LauncherError::Config {
                    var: PORT_ENV.to_string(),
                    reason: "port must be non-zero".to_string(),
                });
            }
            config.backend_port = port;
        }
        if let Some(ticks) = parse_var::<u32>(&lookup, PING_TIMEOUT_ENV)? {
            config.ping_timeout = ticks.clamp(1, PING_TIMEOUT_MAX);
        }
        if let Some(retries) = parse_var::<u32>(&lookup, MAX_RETRIES_ENV)? {
            config.max_retries = retries.min(MAX_RETRIES_MAX);
        }
        if let Some(home) = lookup(HOME_ENV).filter(|v| !v.trim().is_empty()) {
            config.home_dir = PathBuf::from(home.trim());
        }
        if let Some(logs) = lookup(LOG_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            config.log_dir = PathBuf::from(logs.trim());
        }
        if let Some(backend) = lookup(BACKEND_ENV).filter(|v| !v.trim().is_empty()) {
            config.backend_executable = PathBuf::from(backend.trim());
        }

        Ok(config)
    }

    pub fn backend_origin(&self) -> String {
        format!("http://{}:{}", BACKEND_HOST, self.backend_port)
    }

    pub fn health_url(&self) -> String {
        format!("{}{}", self.backend_origin(), HEALTH_PATH)
    }

    pub fn version_file(&self) -> PathBuf {
        self.home_dir.join(VERSION_FILE)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.home_dir.join(PID_FILE)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| LauncherError::Config {
            var: var.to_string(),
            reason: format!("{raw:?}: {e}"),
        })
}

fn default_home_dir() -> PathBuf {
    // No home directory (service accounts, stripped containers): fall back to temp
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(HOME_DIR_NAME)
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DATA_DIR_NAME)
        .join("logs")
}

/// The bundled backend lives next to the launcher executable.
fn default_backend_executable() -> PathBuf {
    let base = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    let name = if cfg!(windows) { "Kolibri.exe" } else { "Kolibri" };
    base.join("Kolibri").join(name)
}
