//! The single-threaded index of every cgroup monitor currently under
//! supervision, and the epoll multiplexer that waits on all of their
//! event descriptors at once.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::Sender;
use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use tracing::{debug, warn};

use crate::activity::messages::ActivityMessage;
use crate::cgroup::{Cgroup, Monitor, MonitorError};
use crate::restart::messages::JobMessage;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("epoll error: {0}")]
    Epoll(#[from] nix::Error),

    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

pub struct Index {
    root_cg: PathBuf,
    job_queue: Sender<JobMessage>,
    activity_queue: Sender<ActivityMessage>,
    poller: Option<Epoll>,
    by_path: HashMap<PathBuf, Monitor>,
    by_fd: HashMap<RawFd, PathBuf>,
}

impl Index {
    pub fn new(
        root_cg: PathBuf,
        job_queue: Sender<JobMessage>,
        activity_queue: Sender<ActivityMessage>,
    ) -> Self {
        Self {
            root_cg,
            job_queue,
            activity_queue,
            poller: None,
            by_path: HashMap::new(),
            by_fd: HashMap::new(),
        }
    }

    pub fn open(&mut self) -> Result<(), IndexError> {
        assert!(self.poller.is_none(), "Index::open called while already open");
        self.poller = Some(Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?);
        Ok(())
    }

    pub fn close(&mut self) {
        let paths: Vec<PathBuf> = self.by_path.keys().cloned().collect();
        for path in paths {
            self.deregister(&path);
        }
        self.poller = None;
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    fn poller(&self) -> &Epoll {
        self.poller.as_ref().expect("Index not open")
    }

    fn borrow(fd: RawFd) -> BorrowedFd<'static> {
        // Safety: the fd is owned by a Monitor held in `by_path` for
        // at least as long as this borrow is used (register/deregister
        // calls never outlive that monitor's lifetime).
        unsafe { BorrowedFd::borrow_raw(fd) }
    }

    pub fn register(&mut self, cg: Cgroup) -> Result<(), IndexError> {
        let mut monitor = Monitor::new(cg.clone());
        monitor.open()?;
        self.insert(cg, monitor)
    }

    /// Wires an already-open monitor into the maps and poller. Shared
    /// by `register` and `sync`'s discovery loop, which opens the
    /// monitor itself so an open failure can be logged and skipped
    /// without aborting the whole sync pass.
    fn insert(&mut self, cg: Cgroup, monitor: Monitor) -> Result<(), IndexError> {
        let path = cg.path().to_path_buf();
        let (oom_fd, pressure_fd) = monitor.event_fds();

        for fd in [oom_fd, pressure_fd] {
            let event = EpollEvent::new(EpollFlags::EPOLLIN, fd as u64);
            self.poller().add(Self::borrow(fd), event)?;
            self.by_fd.insert(fd, path.clone());
        }

        self.by_path.insert(path, monitor);
        let _ = self.activity_queue.send(ActivityMessage::NewCgroup(cg));
        Ok(())
    }

    /// Enqueues `StaleCgroup` before touching the poller or maps, so a
    /// sync racing on another fd for this same cgroup cannot re-enter
    /// a half-torn-down monitor.
    pub fn deregister(&mut self, path: &Path) {
        let Some(monitor) = self.by_path.get(path) else {
            return;
        };
        let cg = monitor.cgroup().clone();
        let _ = self.activity_queue.send(ActivityMessage::StaleCgroup(cg));

        let (oom_fd, pressure_fd) = monitor.event_fds();
        for fd in [oom_fd, pressure_fd] {
            if let Err(e) = self.poller().delete(Self::borrow(fd)) {
                warn!(fd, error = %e, "failed to unregister fd from poller");
            }
            self.by_fd.remove(&fd);
        }

        if let Some(mut monitor) = self.by_path.remove(path) {
            monitor.close();
        }
    }

    /// Reconciles the in-memory index against the filesystem: wakes
    /// every tracked monitor (catching the runtime's create-cgroup/
    /// set-limit race), then discovers and registers new
    /// sub-cgroups.
    pub fn sync(&mut self) -> Result<(), IndexError> {
        let existing: Vec<PathBuf> = self.by_path.keys().cloned().collect();
        for path in existing {
            let Some(monitor) = self.by_path.get(&path) else {
                continue;
            };
            match monitor.wakeup(&self.job_queue, None, true) {
                Ok(()) => {}
                Err(_) => {
                    debug!(path = %path.display(), "sync: cgroup went stale, deregistering");
                    self.deregister(&path);
                }
            }
        }

        let entries = match fs::read_dir(&self.root_cg) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(root = %self.root_cg.display(), error = %e, "failed to list root cgroup directory");
                return Ok(());
            }
        };

        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if !path.is_dir() || self.by_path.contains_key(&path) {
                continue;
            }

            let cg = Cgroup::new(path.clone());
            let mut monitor = Monitor::new(cg.clone());
            if let Err(e) = monitor.open() {
                warn!(path = %path.display(), error = %e, "cgroup disappeared before it could be opened");
                continue;
            }

            self.insert(cg, monitor)?;
            if let Some(monitor) = self.by_path.get(&path) {
                let _ = monitor.wakeup(&self.job_queue, None, false);
            }
        }

        Ok(())
    }

    /// Waits up to `timeout` for readiness on any registered fd,
    /// dispatching each ready fd to its owning monitor. `EINTR` is
    /// swallowed, not propagated.
    pub fn poll(&mut self, timeout: Duration) -> Result<(), IndexError> {
        let mut events = [EpollEvent::empty(); 16];
        let epoll_timeout = EpollTimeout::try_from(timeout).unwrap_or(EpollTimeout::NONE);

        let n = match self.poller().wait(&mut events, epoll_timeout) {
            Ok(n) => n,
            Err(Errno::EINTR) => {
                debug!("poll interrupted (EINTR), retrying next cycle");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        for event in &events[..n] {
            let flags = event.events();
            assert!(
                flags.contains(EpollFlags::EPOLLIN),
                "poller reported a non-readable event: {flags:?}"
            );
            let fd = event.data() as RawFd;

            let Some(path) = self.by_fd.get(&fd).cloned() else {
                continue;
            };
            if let Some(monitor) = self.by_path.get(&path) {
                if let Err(e) = monitor.wakeup(&self.job_queue, Some(fd), false) {
                    warn!(path = %path.display(), error = %e, "wakeup failed");
                }
            }

            // Acknowledge the eventfd by reading and discarding its
            // 8-byte counter.
            let mut buf = [0u8; 8];
            let _ = nix::unistd::read(fd, &mut buf);
        }

        Ok(())
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        if self.poller.is_some() {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::fs;

    fn make_subcgroup(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("memory.oom_control"), "oom_kill_disable 1\nunder_oom 0\n").unwrap();
        fs::write(dir.join("memory.pressure_level"), "").unwrap();
        fs::write(dir.join("cgroup.event_control"), "").unwrap();
        fs::write(dir.join("memory.limit_in_bytes"), "1048576\n").unwrap();
        fs::write(dir.join("cgroup.procs"), "").unwrap();
        dir
    }

    #[test]
    fn sync_discovers_and_retires_subcgroups() {
        let root = tempfile::tempdir().unwrap();
        let (job_tx, _job_rx) = unbounded();
        let (activity_tx, activity_rx) = unbounded();
        let mut index = Index::new(root.path().to_path_buf(), job_tx, activity_tx);
        index.open().unwrap();

        make_subcgroup(root.path(), "abc");
        make_subcgroup(root.path(), "def");
        index.sync().unwrap();
        assert_eq!(index.len(), 2);

        let mut new_cgroups = 0;
        while let Ok(ActivityMessage::NewCgroup(_)) = activity_rx.try_recv() {
            new_cgroups += 1;
        }
        assert_eq!(new_cgroups, 2);

        fs::remove_dir_all(root.path().join("abc")).unwrap();
        index.sync().unwrap();
        assert_eq!(index.len(), 1);

        index.close();
    }
}
