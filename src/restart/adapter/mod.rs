//! Pluggable container-runtime adapters. The restart engine never
//! branches on which adapter is in use; each variant implements the
//! same one-method contract.

mod docker;
mod null;
mod wipe_fs;

pub use docker::DockerAdapter;
pub use null::NullAdapter;
pub use wipe_fs::DockerWipeFsAdapter;

use crate::cgroup::Cgroup;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("runtime command failed for {container}: {detail}")]
    CommandFailed { container: String, detail: String },

    #[error("i/o error invoking runtime for {container}: {source}")]
    Io {
        container: String,
        #[source]
        source: std::io::Error,
    },
}

/// A strategy for handing a cgroup's restart off to the container
/// runtime that actually owns the container's lifecycle.
pub trait ContainerAdapter: Send + Sync {
    fn restart(&self, cg: &Cgroup) -> Result<(), AdapterError>;
}

/// Seconds to wait between retries of a runtime command, per the
/// fixed schedule this daemon uses for all runtime calls.
pub const RETRY_SCHEDULE_SECS: &[u64] = &[0, 2, 5, 10];

/// Substrings that, when seen in a failed runtime command's output,
/// mean the failure is permanent and retrying is pointless.
pub const FATAL_ERROR_SUBSTRINGS: &[&str] = &["No such container", "no such id"];
