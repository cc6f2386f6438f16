//! Cgroup supervision: a path-based handle ([`Cgroup`]) safe to pass
//! across threads, and the fd-owning [`Monitor`] that arms kernel
//! notification channels for it.

mod handle;
mod monitor;
mod ps;

pub use handle::{Cgroup, CgroupError, UNLIMITED_THRESHOLD};
pub use monitor::{Monitor, MonitorError};
pub use ps::ProcessRow;
