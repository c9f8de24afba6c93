//! Link routing and loading screen selection for the main window.

use std::path::{Path, PathBuf};

use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Allow,
    OpenExternal,
}

/// Local files, the backend itself and relative links stay in the window.
/// Every other absolute http(s) URL goes to the system browser. Applies to
/// in-place navigation and to requests for a new window alike.
pub fn navigation_decision(url: &str, backend_origin: &str) -> Navigation {
    let url = url.trim();
    if url.starts_with("file:") || url.starts_with(backend_origin) || !is_absolute_http(url) {
        Navigation::Allow
    } else {
        Navigation::OpenExternal
    }
}

fn is_absolute_http(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

pub fn custom_loading_screen(volume: &Path, marker_dir: &str, plugin_name: &str) -> PathBuf {
    volume
        .join(marker_dir)
        .join("extensions")
        .join(plugin_name)
        .join("loadingScreen")
        .join("index.html")
}

/// The plugin's own loading screen when the volume provides one, otherwise
/// the bundled default.
pub async fn loading_screen(
    volume: Option<&Path>,
    marker_dir: &str,
    plugin_name: &str,
    default: &Path,
) -> PathBuf {
    let Some(volume) = volume else {
        return default.to_path_buf();
    };

    let custom = custom_loading_screen(volume, marker_dir, plugin_name);
    if tokio::fs::metadata(&custom).await.is_ok() {
        custom
    } else {
        info!("Loading screen not found {}", custom.display());
        default.to_path_buf()
    }
}
