//! The fd-owning half of cgroup supervision.
//!
//! A [`Monitor`] arms the kernel notification channels for one cgroup
//! and classifies wakeups into job-queue messages. It is created,
//! mutated, and destroyed exclusively by the [`crate::index::Index`]
//! thread; it never crosses a thread boundary itself — the
//! [`super::handle::Cgroup`] it wraps is what gets cloned into
//! messages.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};

use crossbeam_channel::Sender;
use nix::sys::eventfd::{EfdFlags, EventFd};
use tracing::{debug, warn};

use super::handle::{Cgroup, CgroupError, UNLIMITED_THRESHOLD};
use crate::restart::messages::JobMessage;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("cgroup i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("eventfd error: {0}")]
    Eventfd(#[from] nix::Error),

    #[error(transparent)]
    Cgroup(#[from] CgroupError),
}

struct OpenState {
    oom_control: File,
    event_oom: EventFd,
    pressure_level: File,
    event_pressure: EventFd,
}

/// Owns the kernel handles for one memory cgroup: `memory.oom_control`
/// and `memory.pressure_level` read handles, and the two eventfds
/// armed against them via `cgroup.event_control`.
///
/// Lifecycle is Closed -> Open -> Closed, enforced by assertion:
/// reopening an already-open monitor, or closing an already-closed
/// one, is a programmer error.
pub struct Monitor {
    cg: Cgroup,
    state: Option<OpenState>,
}

impl Monitor {
    pub fn new(cg: Cgroup) -> Self {
        Self { cg, state: None }
    }

    pub fn cgroup(&self) -> &Cgroup {
        &self.cg
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Opens every handle this monitor needs. All-or-nothing: on any
    /// failure, whatever was already acquired is released before
    /// returning.
    pub fn open(&mut self) -> Result<(), MonitorError> {
        assert!(self.state.is_none(), "Monitor::open called while already open");

        let result = (|| -> Result<OpenState, MonitorError> {
            let oom_control = File::open(self.cg.path().join("memory.oom_control"))?;
            let event_oom = EventFd::from_value_and_flags(0, EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC)?;
            arm_event_control(&self.cg, event_oom.as_raw_fd(), oom_control.as_raw_fd(), None)?;

            let pressure_level = File::open(self.cg.path().join("memory.pressure_level"))?;
            let event_pressure =
                EventFd::from_value_and_flags(0, EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC)?;
            if let Err(e) = arm_event_control(
                &self.cg,
                event_pressure.as_raw_fd(),
                pressure_level.as_raw_fd(),
                Some("critical"),
            ) {
                return Err(e);
            }

            Ok(OpenState {
                oom_control,
                event_oom,
                pressure_level,
                event_pressure,
            })
        })();

        match result {
            Ok(state) => {
                self.state = Some(state);
                Ok(())
            }
            Err(e) => {
                // Nothing to explicitly release: each handle above is a
                // local File/EventFd that is dropped (and thus closed)
                // when `result` itself goes out of scope, since `state`
                // was never assigned.
                Err(e)
            }
        }
    }

    /// Releases every handle, in reverse acquisition order.
    pub fn close(&mut self) {
        let state = self
            .state
            .take()
            .expect("Monitor::close called while already closed");
        drop(state.event_pressure);
        drop(state.pressure_level);
        drop(state.event_oom);
        drop(state.oom_control);
    }

    /// The two event descriptors, `(oom, pressure)`. Only valid while
    /// open.
    pub fn event_fds(&self) -> (RawFd, RawFd) {
        let state = self.state.as_ref().expect("monitor not open");
        (state.event_oom.as_raw_fd(), state.event_pressure.as_raw_fd())
    }

    /// Central wakeup classifier. `fd` is `Some` when called in
    /// response to poller readiness, `None` during a periodic sync
    /// sweep.
    pub fn wakeup(
        &self,
        job_queue: &Sender<JobMessage>,
        fd: Option<RawFd>,
        raise_for_stale: bool,
    ) -> Result<(), MonitorError> {
        let state = self.state.as_ref().expect("monitor not open");

        if let Some(fd) = fd {
            if fd == state.event_pressure.as_raw_fd() {
                let usage = self.cg.memory_usage_in_bytes().ok();
                let limit = self.cg.memory_limit_in_bytes().ok();
                debug!(
                    cgroup = self.cg.name(),
                    usage_bytes = ?usage,
                    limit_bytes = ?limit,
                    "memory pressure observed"
                );
                let _ = job_queue.send(JobMessage::MemoryPressure(self.cg.clone()));
                return Ok(());
            }
        }

        let status = match self.cg.oom_control_status() {
            Ok(status) => status,
            Err(e) if e.is_stale() => {
                warn!(cgroup = self.cg.name(), error = %e, "cgroup went stale");
                if raise_for_stale {
                    return Err(e.into());
                }
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if status.get("oom_kill_disable").map(String::as_str) == Some("0") {
            self.on_oom_killer_enabled()?;
        }
        if status.get("under_oom").map(String::as_str) == Some("1") {
            self.on_oom_event(job_queue);
        }
        Ok(())
    }

    fn on_oom_killer_enabled(&self) -> Result<(), MonitorError> {
        let limit = match self.cg.memory_limit_in_bytes() {
            Ok(limit) => limit,
            Err(e) if e.is_stale() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if limit < 0 || limit > UNLIMITED_THRESHOLD {
            return Ok(());
        }
        // The handle opened in `open()` is read-only; reopen for write
        // rather than mutate it.
        let path = self.cg.path().join("memory.oom_control");
        let mut f = OpenOptions::new().write(true).open(&path)?;
        f.write_all(b"1\n")?;
        Ok(())
    }

    fn on_oom_event(&self, job_queue: &Sender<JobMessage>) {
        // Best-effort diagnostic read; failures are not fatal.
        let _ = self.cg.memory_stat();
        debug!(cgroup = self.cg.name(), "under_oom observed, requesting restart");
        let _ = job_queue.send(JobMessage::RestartRequested(self.cg.clone()));
    }
}

fn arm_event_control(
    cg: &Cgroup,
    event_fd: RawFd,
    target_fd: RawFd,
    arg: Option<&str>,
) -> Result<(), MonitorError> {
    let line = match arg {
        Some(arg) => format!("{event_fd} {target_fd} {arg}\n"),
        None => format!("{event_fd} {target_fd}\n"),
    };
    let path = cg.path().join("cgroup.event_control");
    let mut f = OpenOptions::new().append(true).open(&path)?;
    f.write_all(line.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, Cgroup) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("memory.oom_control"), "oom_kill_disable 0\nunder_oom 0\n").unwrap();
        fs::write(dir.path().join("memory.pressure_level"), "").unwrap();
        fs::write(dir.path().join("cgroup.event_control"), "").unwrap();
        fs::write(dir.path().join("memory.limit_in_bytes"), "1048576\n").unwrap();
        let cg = Cgroup::new(dir.path());
        (dir, cg)
    }

    #[test]
    fn open_arms_both_event_control_lines() {
        let (dir, cg) = fixture();
        let mut monitor = Monitor::new(cg);
        monitor.open().unwrap();
        let content = fs::read_to_string(dir.path().join("cgroup.event_control")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("critical"));
        monitor.close();
    }

    #[test]
    #[should_panic]
    fn reopen_without_close_is_a_programmer_error() {
        let (_dir, cg) = fixture();
        let mut monitor = Monitor::new(cg);
        monitor.open().unwrap();
        let _ = monitor.open();
    }

    #[test]
    fn wakeup_disables_oom_killer_when_limit_is_set() {
        let (dir, cg) = fixture();
        let mut monitor = Monitor::new(cg);
        monitor.open().unwrap();
        let (tx, _rx) = unbounded();
        monitor.wakeup(&tx, None, false).unwrap();
        let content = fs::read_to_string(dir.path().join("memory.oom_control")).unwrap();
        assert!(content.lines().any(|l| l == "1"));
        monitor.close();
    }

    #[test]
    fn wakeup_is_noop_when_killer_already_disabled() {
        let (dir, cg) = fixture();
        fs::write(dir.path().join("memory.oom_control"), "oom_kill_disable 1\nunder_oom 0\n").unwrap();
        let mut monitor = Monitor::new(cg);
        monitor.open().unwrap();
        let (tx, rx) = unbounded();
        monitor.wakeup(&tx, None, false).unwrap();
        assert!(rx.try_recv().is_err());
        monitor.close();
    }

    #[test]
    fn wakeup_raises_when_stale_and_asked_to() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("memory.oom_control"), "oom_kill_disable 0\nunder_oom 0\n").unwrap();
        fs::write(dir.path().join("memory.pressure_level"), "").unwrap();
        fs::write(dir.path().join("cgroup.event_control"), "").unwrap();
        let cg = Cgroup::new(dir.path());
        let mut monitor = Monitor::new(cg);
        monitor.open().unwrap();
        fs::remove_file(dir.path().join("memory.oom_control")).unwrap();
        let (tx, _rx) = unbounded();
        assert!(monitor.wakeup(&tx, None, true).is_err());
        assert!(monitor.wakeup(&tx, None, false).is_ok());
        monitor.close();
    }

    #[test]
    fn wakeup_on_pressure_fd_enqueues_memory_pressure() {
        let (_dir, cg) = fixture();
        let mut monitor = Monitor::new(cg.clone());
        monitor.open().unwrap();
        let (_, pressure_fd) = monitor.event_fds();
        let (tx, rx) = unbounded();
        monitor.wakeup(&tx, Some(pressure_fd), false).unwrap();
        match rx.try_recv() {
            Ok(JobMessage::MemoryPressure(got)) => assert_eq!(got.path(), cg.path()),
            other => panic!("expected MemoryPressure, got {other:?}"),
        }
        monitor.close();
    }
}
