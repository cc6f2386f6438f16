//! One-shot `--restart <container_id>` path: restart a single cgroup
//! synchronously, then exit.

use anyhow::{anyhow, Result};
use crossbeam_channel::unbounded;
use tracing::info;

use captain_comeback::cgroup::Cgroup;
use captain_comeback::config::Config;
use captain_comeback::restart::adapter::DockerAdapter;
use captain_comeback::restart;

pub fn run(config: &Config, container_id: &str) -> Result<()> {
    let path = config.root_cg.join(container_id);
    if !path.is_dir() {
        return Err(anyhow!("no such cgroup: {}", path.display()));
    }

    let cg = Cgroup::new(path);
    let adapter = DockerAdapter::new();
    let (job_tx, job_rx) = unbounded();
    let (activity_tx, activity_rx) = unbounded();

    info!(container = cg.name(), "restarting container");
    restart::restart(config.restart_grace_period, &adapter, &cg, &job_tx, &activity_tx);

    drop(job_tx);
    drop(activity_tx);
    while job_rx.try_recv().is_ok() {}
    while let Ok(msg) = activity_rx.try_recv() {
        info!(?msg, "drained leftover activity message");
    }

    Ok(())
}
