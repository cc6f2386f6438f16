//! No-op adapter: process signals have already been delivered by the
//! restart procedure; this adapter makes no runtime call at all. Used
//! in tests and for cgroups where the grace-period SIGKILL is
//! sufficient on its own.

use super::{AdapterError, ContainerAdapter};
use crate::cgroup::Cgroup;

#[derive(Default)]
pub struct NullAdapter;

impl NullAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ContainerAdapter for NullAdapter {
    fn restart(&self, _cg: &Cgroup) -> Result<(), AdapterError> {
        Ok(())
    }
}
