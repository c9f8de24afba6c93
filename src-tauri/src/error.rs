//! Error type shared by the launcher components.
//!
//! Probing failures (missing marker directory, missing loading screen,
//! missing plugin metadata) never surface here: each has a fallback and is
//! handled where it happens. What remains are the failures that stop a
//! launch step outright.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LauncherError>;

#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid value for {var}: {reason}")]
    Config { var: String, reason: String },

    #[error("failed to spawn backend {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to seed {} from {}: {reason}", to.display(), from.display())]
    Seed {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },

    #[error("invalid plugin name pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("window error: {0}")]
    Window(String),
}
