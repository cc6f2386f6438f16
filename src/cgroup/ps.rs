//! Per-process snapshot rows, used by the restart procedure and the
//! activity log's ps table.

use procfs::process::Process;
use procfs::ProcResult;

/// One row of a process-table snapshot.
#[derive(Debug, Clone)]
pub struct ProcessRow {
    pub pid: i32,
    pub ppid: i32,
    pub rss_bytes: u64,
    pub vsz_bytes: u64,
    /// Single-character kernel process state (R, S, D, Z, T, t, X, ...).
    pub status: char,
    pub cmdline: Vec<String>,
}

impl ProcessRow {
    pub fn from_process(proc: &Process) -> ProcResult<Self> {
        let stat = proc.stat()?;
        let page_size = procfs::page_size();
        let cmdline = proc.cmdline().unwrap_or_default();
        Ok(Self {
            pid: stat.pid,
            ppid: stat.ppid,
            rss_bytes: (stat.rss as u64).saturating_mul(page_size),
            vsz_bytes: stat.vsize,
            status: stat.state,
            cmdline,
        })
    }

    pub fn rss_kib(&self) -> u64 {
        self.rss_bytes / 1024
    }

    pub fn vsz_kib(&self) -> u64 {
        self.vsz_bytes / 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kib_conversion_is_decimal_never_scientific() {
        let row = ProcessRow {
            pid: 1,
            ppid: 0,
            rss_bytes: 2 * 1024 * 1024 * 1024,
            vsz_bytes: 0,
            status: 'R',
            cmdline: vec![],
        };
        assert_eq!(row.rss_kib(), 2_097_152);
        assert_eq!(format!("{}", row.rss_kib()), "2097152");
    }
}
