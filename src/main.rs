//! Captain Comeback: userland OOM manager and restart orchestrator.

use anyhow::Result;
use clap::Parser;
use tracing::error;

mod cmd;

use captain_comeback::config::{Cli, Config};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_cli(cli);

    let log_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_thread_names(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("captain_comeback={log_level}").into()),
        )
        .init();

    let result = match &config.restart_one {
        Some(container_id) => cmd::restart_one::run(&config, container_id),
        None => cmd::root::run(&config),
    };

    if let Err(e) = result {
        error!(error = %e, "daemon exited with an error");
        std::process::exit(1);
    }

    Ok(())
}
