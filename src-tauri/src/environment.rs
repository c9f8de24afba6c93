//! Paths derived from the located data volume, and the environment handed to
//! the backend process.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use log::info;

use crate::config::LauncherConfig;

pub const CONTENT_FALLBACK_ENV: &str = "KOLIBRI_CONTENT_FALLBACK_DIRS";
pub const EXTENSIONS_ENV: &str = "PYTHONPATH";
pub const HOME_ENV: &str = "KOLIBRI_HOME";
pub const PORT_ENV: &str = "KOLIBRI_HTTP_PORT";

const EXTENSIONS_DIR: &str = "extensions";
const CONTENT_DIR: &str = "content";
const SEED_HOME_DIR: &str = "preseeded_kolibri_home";

/// Resolved once per launch and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentContext {
    pub volume: PathBuf,
    pub data_dir: PathBuf,
    pub extensions_dir: PathBuf,
    pub content_fallback_dir: PathBuf,
    pub seed_home_dir: PathBuf,
    pub home_dir: PathBuf,
    pub backend_port: u16,
}

impl EnvironmentContext {
    /// Variables set on the backend command. The child inherits the rest of
    /// the launcher's environment unchanged.
    pub fn child_env(&self) -> Vec<(&'static str, OsString)> {
        vec![
            (
                CONTENT_FALLBACK_ENV,
                self.content_fallback_dir.clone().into_os_string(),
            ),
            (EXTENSIONS_ENV, self.extensions_dir.clone().into_os_string()),
            (HOME_ENV, self.home_dir.clone().into_os_string()),
            (PORT_ENV, OsString::from(self.backend_port.to_string())),
        ]
    }
}

/// `None` when no volume was found: the launch cannot proceed this session.
pub fn resolve(volume: Option<&Path>, config: &LauncherConfig) -> Option<EnvironmentContext> {
    let volume = volume?;
    let data_dir = volume.join(&config.marker_dir);
    let context = EnvironmentContext {
        volume: volume.to_path_buf(),
        extensions_dir: data_dir.join(EXTENSIONS_DIR),
        content_fallback_dir: data_dir.join(CONTENT_DIR),
        seed_home_dir: data_dir.join(SEED_HOME_DIR),
        data_dir,
        home_dir: config.home_dir.clone(),
        backend_port: config.backend_port,
    };

    info!(
        "Environment: extensions={} content={} home={}",
        context.extensions_dir.display(),
        context.content_fallback_dir.display(),
        context.home_dir.display()
    );
    Some(context)
}
