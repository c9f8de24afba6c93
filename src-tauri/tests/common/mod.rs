//! Fixtures shared by the launch flow integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use launcher_lib::{LauncherConfig, Result, WindowHost};
use tempfile::TempDir;

/// Window host that records every hook call.
#[derive(Clone, Default)]
pub struct RecordingWindow {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingWindow {
    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl WindowHost for RecordingWindow {
    async fn show_loading(&self, page: &Path) -> Result<()> {
        self.record(format!("loading {}", page.display()));
        Ok(())
    }
    fn navigate(&self, url: &str) -> Result<()> {
        self.record(format!("navigate {url}"));
        Ok(())
    }
    fn show_retry(&self) {
        self.record("retry".to_string());
    }
    fn show_error(&self) {
        self.record("error".to_string());
    }
    fn signal_first_launch(&self) {
        self.record("first_launch".to_string());
    }
    fn clear_cache(&self) {
        self.record("clear_cache".to_string());
    }
}

/// A fake Endless Key volume plus an empty user home.
pub struct KeyFixture {
    pub volume: TempDir,
    pub home: TempDir,
}

impl KeyFixture {
    pub fn new(plugin_version: &str) -> Self {
        let volume = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        let data = volume.path().join("KOLIBRI_DATA");
        std::fs::create_dir_all(
            data.join("extensions")
                .join(format!("kolibri_explore_plugin-{plugin_version}.dist-info")),
        )
        .unwrap();
        std::fs::create_dir_all(data.join("content")).unwrap();
        let seed = data.join("preseeded_kolibri_home");
        std::fs::create_dir_all(seed.join("content")).unwrap();
        std::fs::write(seed.join("options.ini"), "[Deployment]\nHTTP_PORT = 5000\n").unwrap();
        Self { volume, home }
    }

    pub fn mounts(&self) -> Vec<PathBuf> {
        vec![self.home.path().to_path_buf(), self.volume.path().to_path_buf()]
    }

    pub fn config(&self) -> LauncherConfig {
        LauncherConfig {
            home_dir: self.home.path().join(".endless-key"),
            ..LauncherConfig::default()
        }
    }

    pub fn install_custom_loading_screen(&self) -> PathBuf {
        let page = self
            .volume
            .path()
            .join("KOLIBRI_DATA/extensions/kolibri_explore_plugin/loadingScreen/index.html");
        std::fs::create_dir_all(page.parent().unwrap()).unwrap();
        std::fs::write(&page, "<html></html>").unwrap();
        page
    }
}

/// Writes an executable shell script standing in for the bundled backend.
#[cfg(unix)]
pub fn fake_backend(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("Kolibri");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
