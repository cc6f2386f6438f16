//! The restart procedure run by each per-cgroup worker thread.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{info, warn};

use super::adapter::ContainerAdapter;
use super::messages::JobMessage;
use crate::activity::messages::ActivityMessage;
use crate::cgroup::Cgroup;

/// The grace-period wait is split into this many polls, matching the
/// contract the original restart loop used.
const RESTART_STATE_POLLS: u32 = 20;

/// Runs the full restart procedure for one cgroup: signal, relieve
/// memory pressure, wait out the grace period, hand off to the
/// runtime adapter. Always publishes `RestartComplete`, even on
/// failure, so the engine's `running` set cannot leak.
pub fn restart(
    grace_period: Duration,
    adapter: &dyn ContainerAdapter,
    cg: &Cgroup,
    job_queue: &Sender<JobMessage>,
    activity_queue: &Sender<ActivityMessage>,
) {
    let _complete_guard = scopeguard::guard((), |_| {
        let _ = job_queue.send(JobMessage::RestartComplete(cg.clone()));
    });

    let ps_table = cg.ps_table().unwrap_or_default();
    let _ = activity_queue.send(ActivityMessage::RestartCgroup(cg.clone(), ps_table));

    signal_cg(cg, Signal::SIGTERM);
    let _signaled_at = Instant::now();

    relieve_memory_pressure(cg);

    if !wait_for_exit(cg, grace_period) {
        warn!(container = cg.name(), grace_period = ?grace_period, "grace period elapsed, sending SIGKILL");
        let _ = activity_queue.send(ActivityMessage::RestartTimeout(cg.clone(), grace_period));
        signal_cg(cg, Signal::SIGKILL);
    }

    if let Err(e) = adapter.restart(cg) {
        warn!(container = cg.name(), error = %e, "runtime restart failed");
    }
}

/// Sends `sig` to every pid currently in the cgroup. A pid that has
/// already exited (`ESRCH`) is not an error; anything else is logged.
fn signal_cg(cg: &Cgroup, sig: Signal) {
    let pids = match cg.pids() {
        Ok(pids) => pids,
        Err(e) => {
            warn!(container = cg.name(), error = %e, "could not read pids to signal");
            return;
        }
    };
    for pid in pids {
        match signal::kill(Pid::from_raw(pid), sig) {
            Ok(()) => {}
            Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => warn!(container = cg.name(), pid, signal = ?sig, error = %e, "kill failed"),
        }
    }
}

/// Raises the cgroup's memory limit by a tenth of itself if the host
/// has the headroom, giving shutdown hooks room to run after SIGTERM.
fn relieve_memory_pressure(cg: &Cgroup) {
    let limit = match cg.memory_limit_in_bytes() {
        Ok(limit) if limit > 0 => limit,
        _ => return,
    };
    let free = match host_free_memory_bytes() {
        Ok(free) => free,
        Err(e) => {
            warn!(container = cg.name(), error = %e, "could not read host free memory");
            return;
        }
    };

    let extra = limit / 10;
    if free > extra {
        if let Err(e) = cg.set_memory_limit_in_bytes(limit + extra) {
            warn!(container = cg.name(), error = %e, "failed to raise memory limit for shutdown headroom");
        }
    }
}

fn host_free_memory_bytes() -> Result<i64, procfs::ProcError> {
    use procfs::Current;
    let meminfo = procfs::Meminfo::current()?;
    Ok(meminfo.mem_free as i64)
}

/// Polls the cgroup's process list until it is empty or the grace
/// period elapses. Returns `true` if the cgroup emptied out (or the
/// directory disappeared) within budget.
fn wait_for_exit(cg: &Cgroup, grace_period: Duration) -> bool {
    let poll_interval = grace_period / RESTART_STATE_POLLS;
    let deadline = Instant::now() + grace_period;

    loop {
        match cg.pids() {
            Ok(pids) if pids.is_empty() => return true,
            Ok(_) => {}
            Err(e) if e.is_stale() => {
                info!(container = cg.name(), "cgroup directory vanished, container exited cleanly");
                return true;
            }
            Err(e) => {
                warn!(container = cg.name(), error = %e, "error polling pids during grace wait");
            }
        }

        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(poll_interval.min(deadline.saturating_duration_since(Instant::now())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restart::adapter::NullAdapter;
    use crossbeam_channel::unbounded;
    use std::fs;

    fn fixture(pids: &[i32]) -> (tempfile::TempDir, Cgroup) {
        let dir = tempfile::tempdir().unwrap();
        let procs = pids.iter().map(|p| p.to_string()).collect::<Vec<_>>().join("\n");
        fs::write(dir.path().join("cgroup.procs"), procs).unwrap();
        fs::write(dir.path().join("memory.limit_in_bytes"), "1048576\n").unwrap();
        (dir, Cgroup::new(dir.path()))
    }

    #[test]
    fn wait_for_exit_returns_true_once_pids_drain() {
        let (dir, cg) = fixture(&[]);
        assert!(wait_for_exit(&cg, Duration::from_millis(200)));
        drop(dir);
    }

    #[test]
    fn wait_for_exit_times_out_when_pids_remain() {
        let (_dir, cg) = fixture(&[999_999]);
        assert!(!wait_for_exit(&cg, Duration::from_millis(100)));
    }

    #[test]
    fn wait_for_exit_treats_vanished_directory_as_success() {
        let dir = tempfile::tempdir().unwrap();
        let cg = Cgroup::new(dir.path().join("gone"));
        assert!(wait_for_exit(&cg, Duration::from_millis(100)));
    }

    #[test]
    fn restart_always_publishes_complete() {
        let (_dir, cg) = fixture(&[]);
        let (job_tx, job_rx) = unbounded();
        let (activity_tx, activity_rx) = unbounded();
        let adapter = NullAdapter::new();

        restart(Duration::from_millis(200), &adapter, &cg, &job_tx, &activity_tx);

        let mut saw_restart_cgroup = false;
        let mut saw_complete = false;
        while let Ok(msg) = activity_rx.try_recv() {
            if matches!(msg, ActivityMessage::RestartCgroup(..)) {
                saw_restart_cgroup = true;
            }
        }
        while let Ok(msg) = job_rx.try_recv() {
            if matches!(msg, JobMessage::RestartComplete(_)) {
                saw_complete = true;
            }
        }
        assert!(saw_restart_cgroup);
        assert!(saw_complete);
    }
}
