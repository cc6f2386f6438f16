//! The main supervision loop: build the queues and engines, run an
//! initial sync, then alternate sync/poll forever.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam_channel::unbounded;
use tracing::{error, info};

use captain_comeback::activity::ActivityEngine;
use captain_comeback::config::Config;
use captain_comeback::index::Index;
use captain_comeback::restart::adapter::{ContainerAdapter, DockerAdapter};
use captain_comeback::restart::RestartEngine;

pub fn run(config: &Config) -> Result<()> {
    let (job_tx, job_rx) = unbounded();
    let (activity_tx, activity_rx) = unbounded();

    let adapter: Arc<dyn ContainerAdapter> = Arc::new(DockerAdapter::new());
    let restart_engine = RestartEngine::new(
        job_tx.clone(),
        job_rx,
        activity_tx.clone(),
        adapter,
        config.restart_grace_period,
    );

    std::fs::create_dir_all(&config.activity_dir)?;
    let activity_engine = ActivityEngine::new(activity_rx.clone(), config.activity_dir.clone());

    let restart_handle = thread::Builder::new()
        .name("restarter".into())
        .spawn(move || restart_engine.run())?;
    let activity_handle = thread::Builder::new()
        .name("activity".into())
        .spawn(move || activity_engine.run())?;

    let root_cg = config.root_cg.clone();
    let sync_interval = config.sync_interval;

    // The index runs on its own named thread (rather than the process's
    // unnamed main thread) so its log lines carry the same thread-name
    // qualification as the worker threads it supervises.
    let index_handle = thread::Builder::new()
        .name("index".into())
        .spawn(move || -> Result<()> {
            let mut index = Index::new(root_cg.clone(), job_tx.clone(), activity_tx.clone());
            index.open().map_err(|e| anyhow!(e))?;

            info!(root_cg = %root_cg.display(), "running initial sync");
            index.sync().map_err(|e| anyhow!(e))?;

            // Drain the activity queue before the activity consumer starts
            // so cgroups that already existed at startup don't produce a
            // spurious "container has started" line.
            while activity_rx.try_recv().is_ok() {}

            let result =
                run_sync_poll_loop(&mut index, sync_interval, &restart_handle, &activity_handle);

            index.close();
            result
        })?;

    index_handle
        .join()
        .map_err(|_| anyhow!("index thread panicked"))?
}

fn run_sync_poll_loop(
    index: &mut Index,
    sync_interval: Duration,
    restart_handle: &thread::JoinHandle<()>,
    activity_handle: &thread::JoinHandle<()>,
) -> Result<()> {
    loop {
        if let Err(e) = index.sync() {
            error!(error = %e, "sync failed");
        }

        let next_sync = Instant::now() + sync_interval;
        while Instant::now() < next_sync {
            let remaining = next_sync.saturating_duration_since(Instant::now());
            if let Err(e) = index.poll(remaining) {
                error!(error = %e, "poll failed");
                break;
            }
        }

        if restart_handle.is_finished() {
            error!("restart engine thread died");
            return Err(anyhow!("restart engine thread died"));
        }
        if activity_handle.is_finished() {
            error!("activity engine thread died");
            return Err(anyhow!("activity engine thread died"));
        }
    }
}
