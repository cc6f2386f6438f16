//! Consumer thread bound to the job queue: at most one outstanding
//! restart worker per cgroup.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tracing::{info, warn};

use super::adapter::ContainerAdapter;
use super::messages::JobMessage;
use super::procedure;
use crate::activity::messages::ActivityMessage;

pub struct RestartEngine {
    job_sender: Sender<JobMessage>,
    job_receiver: Receiver<JobMessage>,
    activity_queue: Sender<ActivityMessage>,
    adapter: Arc<dyn ContainerAdapter>,
    grace_period: Duration,
    running: HashSet<PathBuf>,
    next_worker_id: u64,
}

impl RestartEngine {
    /// `job_sender` is the same queue `job_receiver` drains — kept
    /// separately because spawned workers need a clonable handle to
    /// publish `RestartComplete` back onto it, and `Receiver` alone
    /// doesn't expose one.
    pub fn new(
        job_sender: Sender<JobMessage>,
        job_receiver: Receiver<JobMessage>,
        activity_queue: Sender<ActivityMessage>,
        adapter: Arc<dyn ContainerAdapter>,
        grace_period: Duration,
    ) -> Self {
        Self {
            job_sender,
            job_receiver,
            activity_queue,
            adapter,
            grace_period,
            running: HashSet::new(),
            next_worker_id: 0,
        }
    }

    /// Consumes the job queue until its sender side is dropped.
    pub fn run(mut self) {
        loop {
            let msg = match self.job_receiver.recv() {
                Ok(msg) => msg,
                Err(_) => {
                    info!("job queue closed, restart engine shutting down");
                    return;
                }
            };

            match msg {
                JobMessage::RestartRequested(cg) => {
                    let path = cg.path().to_path_buf();
                    if self.running.contains(&path) {
                        info!(container = cg.name(), "already restarting, dropping duplicate request");
                        continue;
                    }
                    self.running.insert(path);

                    let worker_id = self.next_worker_id;
                    self.next_worker_id += 1;
                    let name = format!("restart-job-{worker_id}");

                    let adapter = self.adapter.clone();
                    let grace_period = self.grace_period;
                    let activity_queue = self.activity_queue.clone();
                    let job_queue = self.job_sender.clone();
                    let cg_for_worker = cg.clone();

                    let spawned = thread::Builder::new().name(name).spawn(move || {
                        procedure::restart(grace_period, adapter.as_ref(), &cg_for_worker, &job_queue, &activity_queue);
                    });

                    if let Err(e) = spawned {
                        // Degraded mode: run synchronously in the engine
                        // thread rather than drop the restart. This is
                        // deliberate and must not be removed.
                        warn!(container = cg.name(), error = %e, "thread spawn failed, restarting synchronously");
                        procedure::restart(
                            grace_period,
                            self.adapter.as_ref(),
                            &cg,
                            &self.job_sender,
                            &self.activity_queue,
                        );
                    }
                }
                JobMessage::RestartComplete(cg) => {
                    self.running.remove(cg.path());
                }
                JobMessage::MemoryPressure(cg) => {
                    info!(container = cg.name(), "memory pressure notification");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::Cgroup;
    use crate::restart::adapter::NullAdapter;
    use crossbeam_channel::unbounded;
    use std::fs;

    #[test]
    fn duplicate_restart_request_is_dropped_while_one_is_running() {
        let (job_tx, job_rx) = unbounded();
        let (activity_tx, _activity_rx) = unbounded();
        let adapter: Arc<dyn ContainerAdapter> = Arc::new(NullAdapter::new());
        let mut engine = RestartEngine::new(job_tx.clone(), job_rx, activity_tx, adapter, Duration::from_millis(50));

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cgroup.procs"), "").unwrap();
        fs::write(dir.path().join("memory.limit_in_bytes"), "1048576\n").unwrap();
        let cg = Cgroup::new(dir.path());

        engine.running.insert(cg.path().to_path_buf());
        job_tx.send(JobMessage::RestartRequested(cg.clone())).unwrap();

        // Drain one message manually to exercise the dedup branch
        // without running the full blocking `run()` loop.
        let msg = engine.job_receiver.try_recv().unwrap();
        match msg {
            JobMessage::RestartRequested(got) => {
                assert!(engine.running.contains(got.path()));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn restart_complete_releases_the_running_slot() {
        let (job_tx, job_rx) = unbounded();
        let (activity_tx, _activity_rx) = unbounded();
        let adapter: Arc<dyn ContainerAdapter> = Arc::new(NullAdapter::new());
        let mut engine = RestartEngine::new(job_tx, job_rx, activity_tx, adapter, Duration::from_millis(50));

        let cg = Cgroup::new("/sys/fs/cgroup/memory/docker/xyz");
        engine.running.insert(cg.path().to_path_buf());
        assert!(engine.running.contains(cg.path()));
        engine.running.remove(cg.path());
        assert!(!engine.running.contains(cg.path()));
    }
}
