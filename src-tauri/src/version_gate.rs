//! Decides whether the local Kolibri home must be reseeded from the volume.
//!
//! Versions are compared as plain strings, so `"1.2.0"` sorts after
//! `"1.10.0"`. Reseeding happens only when the persisted marker sorts before
//! the version found on the volume.

use std::path::{Path, PathBuf};

use log::{error, info, warn};
use regex::Regex;
use walkdir::WalkDir;

use crate::environment::EnvironmentContext;
use crate::error::{LauncherError, Result};

/// Stands for "no plugin present" on either side of the comparison.
pub const NULL_PLUGIN_VERSION: &str = "0";

#[derive(Debug, Clone)]
pub struct VersionGate {
    extensions_dir: PathBuf,
    seed_home_dir: PathBuf,
    home_dir: PathBuf,
    version_file: PathBuf,
    pattern: Regex,
}

impl VersionGate {
    pub fn new(ctx: &EnvironmentContext, plugin_name: &str) -> Result<Self> {
        let pattern = format!(r"^{}-(\d+\.\d+\.\d+)\.dist-info$", regex::escape(plugin_name));
        Ok(Self {
            extensions_dir: ctx.extensions_dir.clone(),
            seed_home_dir: ctx.seed_home_dir.clone(),
            home_dir: ctx.home_dir.clone(),
            version_file: ctx.home_dir.join(crate::config::VERSION_FILE),
            pattern: Regex::new(&pattern)?,
        })
    }

    /// Version advertised by the `<plugin>-X.Y.Z.dist-info` entry in the
    /// extensions directory, or `"0"`. The whole entry name must match, so
    /// backups and prefixed copies are ignored.
    pub async fn plugin_version(&self) -> String {
        let mut entries = match tokio::fs::read_dir(&self.extensions_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Cannot read {}: {e}", self.extensions_dir.display());
                return NULL_PLUGIN_VERSION.to_string();
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(caps) = self.pattern.captures(name) {
                return caps[1].to_string();
            }
        }

        NULL_PLUGIN_VERSION.to_string()
    }

    pub async fn persisted_version(&self) -> String {
        match tokio::fs::read_to_string(&self.version_file).await {
            Ok(contents) => contents.trim().to_string(),
            Err(_) => {
                info!("No version file found in {}", self.home_dir.display());
                NULL_PLUGIN_VERSION.to_string()
            }
        }
    }

    /// Replaces the home directory with the seed template when the volume
    /// carries a newer plugin. Returns whether a reseed happened; the caller
    /// is responsible for dropping cached UI state in that case.
    pub async fn check_and_maybe_reseed(&self) -> Result<bool> {
        info!("Checking launcher version file");
        let plugin_version = self.plugin_version().await;
        let home_version = self.persisted_version().await;

        info!("{home_version} < {plugin_version}");
        if !needs_reseed(&home_version, &plugin_version) {
            return Ok(false);
        }

        info!("Newer version, replacing {}", self.home_dir.display());
        self.reseed().await?;
        Ok(true)
    }

    /// Records the currently discovered plugin version as seeded.
    pub async fn update_version_marker(&self) -> Result<()> {
        let version = self.plugin_version().await;
        tokio::fs::create_dir_all(&self.home_dir).await?;
        tokio::fs::write(&self.version_file, version.as_bytes()).await?;
        info!("Version marker set to {version}");
        Ok(())
    }

    async fn reseed(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.home_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if tokio::fs::metadata(&self.seed_home_dir).await.is_err() {
            warn!(
                "Seed template {} missing, starting with an empty home",
                self.seed_home_dir.display()
            );
            tokio::fs::create_dir_all(&self.home_dir).await?;
            return Ok(());
        }

        let from = self.seed_home_dir.clone();
        let to = self.home_dir.clone();
        tokio::task::spawn_blocking(move || copy_tree(&from, &to))
            .await
            .map_err(|e| LauncherError::Seed {
                from: self.seed_home_dir.clone(),
                to: self.home_dir.clone(),
                reason: e.to_string(),
            })?
    }
}

/// Plain string ordering, not semantic versioning.
pub fn needs_reseed(home_version: &str, plugin_version: &str) -> bool {
    home_version < plugin_version
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    let seed_err = |reason: String| LauncherError::Seed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        reason,
    };

    for entry in WalkDir::new(from).follow_links(true) {
        let entry = entry.map_err(|e| seed_err(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| seed_err(e.to_string()))?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
