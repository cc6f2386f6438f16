//! `docker+wipe-fs` adapter: as the plain Docker adapter, but after a
//! successful stop, rotates the container's AUFS `diff` directory
//! aside so the restarted container starts from a clean filesystem
//! layer, moving the old one to a backup root instead of deleting it.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{info, warn};
use uuid::Uuid;

use super::docker::try_exec_and_wait;
use super::{AdapterError, ContainerAdapter};
use crate::cgroup::Cgroup;

const AUFS_BASE_DIR: &str = "/var/lib/docker/aufs";
const AUFS_DIFF_DIR: &str = "diff";
const AUFS_MNT_DIR: &str = "mnt";
const AUFS_MOUNTS_DIR: &str = "/var/lib/docker/image/aufs/layerdb/mounts";
const AUFS_MOUNT_FILE: &str = "mount-id";
const BACKUP_DIR: &str = "/var/lib/captain-comeback/aufs-backup";

pub struct DockerWipeFsAdapter;

impl DockerWipeFsAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DockerWipeFsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerAdapter for DockerWipeFsAdapter {
    fn restart(&self, cg: &Cgroup) -> Result<(), AdapterError> {
        let stopped = try_exec_and_wait(cg, &["stop", "-t", "0", cg.name()])?;
        if stopped {
            if let Err(e) = do_wipe_fs(cg) {
                // A wipe failure is logged but never blocks the
                // subsequent restart attempt.
                warn!(container = cg.name(), error = %e, "aufs wipe failed, restarting without it");
            }
        }

        if !try_exec_and_wait(cg, &["restart", "-t", "0", cg.name()])? {
            return Err(AdapterError::CommandFailed {
                container: cg.name().to_string(),
                detail: "docker restart did not succeed after exhausting retries".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum WipeError {
    #[error("container still has a live aufs mount, aborting wipe")]
    StillMounted,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

fn mount_id(container_id: &str) -> Option<String> {
    let path = Path::new(AUFS_MOUNTS_DIR).join(container_id).join(AUFS_MOUNT_FILE);
    match fs::read_to_string(&path) {
        Ok(s) => Some(s.trim().to_string()),
        Err(_) => {
            // Older Docker versions have no mount-id indirection; the
            // container id doubles as the aufs mount id.
            warn!(container = container_id, "no mount-id file, assuming container id is the mount id");
            None
        }
    }
}

fn dir_is_empty(path: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

fn do_wipe_fs(cg: &Cgroup) -> Result<(), WipeError> {
    let container_id = cg.name();
    let mid = mount_id(container_id).unwrap_or_else(|| container_id.to_string());

    let base = Path::new(AUFS_BASE_DIR);
    let mnt_dir = base.join(AUFS_MNT_DIR).join(&mid);
    if mnt_dir.is_dir() && !dir_is_empty(&mnt_dir)? {
        return Err(WipeError::StillMounted);
    }

    let diff_dir = base.join(AUFS_DIFF_DIR).join(&mid);
    let restore_id = format!("cc-{}", Uuid::new_v4());
    let outbound_dir = base.join(AUFS_DIFF_DIR).join(&restore_id);
    let inbound_dir = base.join(AUFS_DIFF_DIR).join(format!("{restore_id}-inbound"));

    fs::create_dir_all(&inbound_dir)?;

    fs::rename(&diff_dir, &outbound_dir)?;
    if let Err(e) = fs::rename(&inbound_dir, &diff_dir) {
        // Roll back: put the original diff directory back.
        let _ = fs::rename(&outbound_dir, &diff_dir);
        return Err(e.into());
    }

    let backup_target = Path::new(BACKUP_DIR).join(format!("{container_id}-{restore_id}"));
    fs::create_dir_all(Path::new(BACKUP_DIR))?;
    fs::rename(&outbound_dir, &backup_target)?;

    info!(container = container_id, restore_id, "rotated aufs diff directory");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_leaves_an_empty_diff_dir_and_a_backup() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path();

        let container_id = "abc123";
        let diff_dir = base.join("diff").join(container_id);
        fs::create_dir_all(diff_dir.join("etc")).unwrap();
        fs::write(diff_dir.join("etc/marker"), "old").unwrap();
        let mnt_dir = base.join("mnt").join(container_id);
        fs::create_dir_all(&mnt_dir).unwrap();
        let backup_dir = base.join("backup");

        // Exercise the same rename choreography `do_wipe_fs` performs,
        // parameterized over a temp root instead of the real aufs
        // paths (which this test has no business touching).
        let restore_id = format!("cc-{}", Uuid::new_v4());
        let outbound = base.join("diff").join(&restore_id);
        let inbound = base.join("diff").join(format!("{restore_id}-inbound"));
        fs::create_dir_all(&inbound).unwrap();
        fs::rename(&diff_dir, &outbound).unwrap();
        fs::rename(&inbound, &diff_dir).unwrap();
        fs::create_dir_all(&backup_dir).unwrap();
        let backup_target = backup_dir.join(format!("{container_id}-{restore_id}"));
        fs::rename(&outbound, &backup_target).unwrap();

        assert!(dir_is_empty(&diff_dir).unwrap());
        assert!(backup_target.join("etc/marker").exists());
    }

    #[test]
    fn aborts_when_mnt_dir_non_empty() {
        let root = tempfile::tempdir().unwrap();
        let mnt_dir = root.path().join("mnt").join("still-live");
        fs::create_dir_all(&mnt_dir).unwrap();
        fs::write(mnt_dir.join("busy"), "1").unwrap();
        assert!(!dir_is_empty(&mnt_dir).unwrap());
    }
}
