//! Finds the external volume that carries the Kolibri data directory.

use std::path::{Path, PathBuf};

use log::{debug, info};
use sysinfo::Disks;
use tokio::task::JoinSet;

/// Source of candidate mount points.
pub trait MountSource {
    fn mount_points(&self) -> Vec<PathBuf>;
}

/// Mount points of every disk the OS reports, first mount point per disk.
#[derive(Debug, Default)]
pub struct SystemMounts;

impl MountSource for SystemMounts {
    fn mount_points(&self) -> Vec<PathBuf> {
        let disks = Disks::new_with_refreshed_list();
        let mut points: Vec<PathBuf> = Vec::new();
        for disk in disks.list() {
            let point = disk.mount_point().to_path_buf();
            if !points.contains(&point) {
                points.push(point);
            }
        }
        points
    }
}

impl MountSource for Vec<PathBuf> {
    fn mount_points(&self) -> Vec<PathBuf> {
        self.clone()
    }
}

/// Probes every mount point concurrently and returns the first one whose
/// marker directory exists. The remaining probes are aborted.
pub async fn locate(mounts: &impl MountSource, marker_dir: &str) -> Option<PathBuf> {
    let candidates = mounts.mount_points();
    if candidates.is_empty() {
        info!("No mounted volumes to search");
        return None;
    }

    let mut probes = JoinSet::new();
    for mount in candidates {
        let marker = mount.join(marker_dir);
        probes.spawn(async move {
            info!("Looking for the data volume on {}", mount.display());
            if is_dir(&marker).await {
                Some(mount)
            } else {
                debug!("{} doesn't exist, trying next", marker.display());
                None
            }
        });
    }

    while let Some(joined) = probes.join_next().await {
        if let Ok(Some(found)) = joined {
            probes.abort_all();
            info!("Found data volume at {}", found.display());
            return Some(found);
        }
    }

    info!("No volume contains {marker_dir}");
    None
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}
