//! Messages carried on the job queue.

use crate::cgroup::Cgroup;

/// Job-queue message: the tagged sum of everything that can ask the
/// restart engine to act.
#[derive(Debug, Clone)]
pub enum JobMessage {
    /// The kernel reported `under_oom == 1`: this cgroup needs a
    /// restart.
    RestartRequested(Cgroup),

    /// A restart worker finished (successfully or not) and this
    /// cgroup should be released from the engine's `running` set.
    RestartComplete(Cgroup),

    /// A `memory.pressure_level` critical notification fired. Logged
    /// as a diagnostic signal; does not by itself trigger a restart.
    MemoryPressure(Cgroup),
}
