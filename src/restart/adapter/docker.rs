//! Docker CLI adapter: `docker stop`/`docker restart` via subprocess,
//! with the fixed retry schedule and fatal-error short-circuit.

use std::process::Command;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use super::{AdapterError, ContainerAdapter, FATAL_ERROR_SUBSTRINGS, RETRY_SCHEDULE_SECS};
use crate::cgroup::Cgroup;

pub struct DockerAdapter;

impl DockerAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DockerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerAdapter for DockerAdapter {
    fn restart(&self, cg: &Cgroup) -> Result<(), AdapterError> {
        try_exec_and_wait(cg, &["stop", "-t", "0", cg.name()])?;
        if !try_exec_and_wait(cg, &["restart", "-t", "0", cg.name()])? {
            return Err(AdapterError::CommandFailed {
                container: cg.name().to_string(),
                detail: "docker restart did not succeed after exhausting retries".into(),
            });
        }
        Ok(())
    }
}

/// Runs `docker <args>`, retrying on the fixed `[0, 2, 5, 10]` second
/// schedule. Bails immediately (without retrying) on a fatal error
/// substring. Returns whether the command ultimately succeeded.
pub fn try_exec_and_wait(cg: &Cgroup, args: &[&str]) -> Result<bool, AdapterError> {
    let command_name = args.first().copied().unwrap_or("docker");

    for (attempt, delay) in RETRY_SCHEDULE_SECS.iter().enumerate() {
        if *delay > 0 {
            thread::sleep(Duration::from_secs(*delay));
        }

        let output = Command::new("docker")
            .args(args)
            .output()
            .map_err(|e| AdapterError::Io {
                container: cg.name().to_string(),
                source: e,
            })?;

        if output.status.success() {
            return Ok(true);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        warn!(
            container = cg.name(),
            command = command_name,
            attempt,
            stderr = %stderr,
            "docker command failed"
        );

        if FATAL_ERROR_SUBSTRINGS
            .iter()
            .any(|needle| stderr.contains(needle) || stdout.contains(needle))
        {
            info!(container = cg.name(), command = command_name, "fatal error, not retrying");
            return Ok(false);
        }
    }

    Ok(false)
}
