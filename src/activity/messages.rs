//! Messages carried on the activity queue.

use std::time::Duration;

use crate::cgroup::{Cgroup, ProcessRow};

/// Activity-queue message: the tagged sum of everything that produces
/// a human- and machine-readable log line.
#[derive(Debug, Clone)]
pub enum ActivityMessage {
    /// A new cgroup was discovered (container started).
    NewCgroup(Cgroup),

    /// A previously tracked cgroup disappeared (container exited).
    StaleCgroup(Cgroup),

    /// A restart was triggered; carries the process snapshot taken at
    /// the moment the restart began.
    RestartCgroup(Cgroup, Vec<ProcessRow>),

    /// A restart's grace period elapsed with processes still present.
    RestartTimeout(Cgroup, Duration),

    /// Shut down the activity consumer loop.
    Exit,
}
