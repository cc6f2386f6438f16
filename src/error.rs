//! Top-level daemon error type.

use thiserror::Error;

use crate::cgroup::{CgroupError, MonitorError};
use crate::index::IndexError;
use crate::restart::adapter::AdapterError;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("cgroup error: {0}")]
    Cgroup(#[from] CgroupError),

    #[error("monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("a worker thread terminated unexpectedly")]
    WorkerDied,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
