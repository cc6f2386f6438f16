//! Daemon configuration.
//!
//! There is no configuration file: the CLI flags themselves are the
//! configuration surface, with validated defaults in the same
//! `default_*` style the rest of this codebase uses for configuration
//! structs.

mod validate;

pub use validate::{validate_grace_period, validate_sync_interval};

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

pub fn default_root_cg() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup/memory/docker")
}

pub fn default_activity_dir() -> PathBuf {
    PathBuf::from("/var/log/container-activity")
}

pub const DEFAULT_SYNC_INTERVAL_SECS: f64 = 1.0;
pub const DEFAULT_RESTART_GRACE_PERIOD_SECS: i64 = 10;

#[derive(Parser, Debug)]
#[command(name = "captain-comeback")]
#[command(about = "Userland OOM manager and restart orchestrator for container hosts")]
#[command(version)]
pub struct Cli {
    /// Root directory under which each subdirectory is a memory
    /// cgroup to supervise.
    #[arg(long, default_value_os_t = default_root_cg())]
    pub root_cg: PathBuf,

    /// Directory to write per-container activity logs into.
    #[arg(long, default_value_os_t = default_activity_dir())]
    pub activity: PathBuf,

    /// Seconds between filesystem reconciliation passes. Negative
    /// values fall back to the default.
    #[arg(long, default_value_t = DEFAULT_SYNC_INTERVAL_SECS)]
    pub sync_interval: f64,

    /// Seconds to wait after SIGTERM before sending SIGKILL. Negative
    /// values fall back to the default.
    #[arg(long, default_value_t = DEFAULT_RESTART_GRACE_PERIOD_SECS)]
    pub restart_grace_period: i64,

    /// Enable debug-level logging.
    #[arg(long)]
    pub debug: bool,

    /// Restart a single container by id, then exit, instead of
    /// running the supervision loop.
    #[arg(long, value_name = "CONTAINER_ID")]
    pub restart: Option<String>,
}

/// Resolved, validated daemon configuration.
pub struct Config {
    pub root_cg: PathBuf,
    pub activity_dir: PathBuf,
    pub sync_interval: Duration,
    pub restart_grace_period: Duration,
    pub debug: bool,
    pub restart_one: Option<String>,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Self {
        let sync_interval = validate_sync_interval(cli.sync_interval);
        let restart_grace_period = validate_grace_period(cli.restart_grace_period);

        Self {
            root_cg: cli.root_cg,
            activity_dir: cli.activity,
            sync_interval: Duration::from_secs_f64(sync_interval),
            restart_grace_period: Duration::from_secs(restart_grace_period as u64),
            debug: cli.debug,
            restart_one: cli.restart,
        }
    }
}
