//! Lightweight, cloneable handle to a memory cgroup.
//!
//! A [`Cgroup`] carries only a path. It owns no kernel handles and is
//! cheap to move across thread boundaries — the value that flows
//! through the job and activity queues, and the value restart workers
//! operate on. The eventfd-owning side lives in [`super::monitor::Monitor`]
//! and never leaves the index thread.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use procfs::process::Process;
use procfs::ProcError;

use super::ps::ProcessRow;

/// 10^15 bytes: treated as "effectively unlimited" by the kernel OOM
/// killer disable logic.
pub const UNLIMITED_THRESHOLD: i64 = 1_000_000_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum CgroupError {
    #[error("cgroup {path} is stale: {source}")]
    Stale { path: PathBuf, source: io::Error },

    #[error("i/o error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("malformed content in {path}: {detail}")]
    Malformed { path: PathBuf, detail: String },
}

impl CgroupError {
    /// True for the class of errors that mean "the cgroup directory is
    /// gone", as opposed to a genuine I/O failure.
    pub fn is_stale(&self) -> bool {
        matches!(self, CgroupError::Stale { .. })
    }

    fn from_io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => CgroupError::Stale {
                path: path.to_path_buf(),
                source,
            },
            _ => CgroupError::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

/// Identifies a memory cgroup by its absolute directory path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cgroup {
    path: PathBuf,
}

impl Cgroup {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final path component, the container id in practice.
    pub fn name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("")
    }

    fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn memory_usage_in_bytes(&self) -> Result<i64, CgroupError> {
        self.read_int("memory.usage_in_bytes")
    }

    pub fn memory_limit_in_bytes(&self) -> Result<i64, CgroupError> {
        self.read_int("memory.limit_in_bytes")
    }

    pub fn set_memory_limit_in_bytes(&self, value: i64) -> Result<(), CgroupError> {
        let path = self.file("memory.limit_in_bytes");
        fs::write(&path, format!("{value}\n")).map_err(|e| CgroupError::from_io(&path, e))
    }

    /// The memory cgroup's textual diagnostics, read best-effort; an
    /// empty string if the file cannot be read.
    pub fn memory_stat(&self) -> String {
        let path = self.file("memory.stat");
        fs::read_to_string(&path).unwrap_or_default()
    }

    /// Parses `memory.oom_control` as a `key value` table, one pair per
    /// line.
    pub fn oom_control_status(&self) -> Result<HashMap<String, String>, CgroupError> {
        let path = self.file("memory.oom_control");
        let content = fs::read_to_string(&path).map_err(|e| CgroupError::from_io(&path, e))?;
        Ok(parse_kv_table(&content))
    }

    /// Process ids currently in the cgroup, from `cgroup.procs`.
    ///
    /// Deliberately `cgroup.procs` (process-level), not `tasks`
    /// (thread-level).
    pub fn pids(&self) -> Result<Vec<i32>, CgroupError> {
        let path = self.file("cgroup.procs");
        let content = fs::read_to_string(&path).map_err(|e| CgroupError::from_io(&path, e))?;
        let mut pids = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.parse::<i32>() {
                Ok(pid) => pids.push(pid),
                Err(_) => {
                    return Err(CgroupError::Malformed {
                        path,
                        detail: format!("non-integer pid {line:?}"),
                    })
                }
            }
        }
        Ok(pids)
    }

    /// A per-pid snapshot of every process currently in the cgroup.
    /// Pids that have exited between listing and inspection are
    /// silently skipped.
    pub fn ps_table(&self) -> Result<Vec<ProcessRow>, CgroupError> {
        let pids = self.pids()?;
        let mut rows = Vec::with_capacity(pids.len());
        for pid in pids {
            match Process::new(pid) {
                Ok(proc) => match ProcessRow::from_process(&proc) {
                    Ok(row) => rows.push(row),
                    Err(ProcError::NotFound(_)) => continue,
                    Err(_) => continue,
                },
                Err(ProcError::NotFound(_)) => continue,
                Err(_) => continue,
            }
        }
        Ok(rows)
    }

    fn read_int(&self, name: &str) -> Result<i64, CgroupError> {
        let path = self.file(name);
        let content = fs::read_to_string(&path).map_err(|e| CgroupError::from_io(&path, e))?;
        content
            .trim()
            .parse::<i64>()
            .map_err(|_| CgroupError::Malformed {
                path,
                detail: format!("not an integer: {:?}", content.trim()),
            })
    }
}

fn parse_kv_table(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        if let (Some(k), Some(v)) = (parts.next(), parts.next()) {
            map.insert(k.to_string(), v.to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_oom_control_table() {
        let table = parse_kv_table("oom_kill_disable 0\nunder_oom 0\n");
        assert_eq!(table.get("oom_kill_disable").map(String::as_str), Some("0"));
        assert_eq!(table.get("under_oom").map(String::as_str), Some("0"));
    }

    #[test]
    fn name_is_final_path_component() {
        let cg = Cgroup::new("/sys/fs/cgroup/memory/docker/abc123");
        assert_eq!(cg.name(), "abc123");
    }

    #[test]
    fn reads_pids_from_cgroup_procs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cgroup.procs"), "1\n2\n3\n").unwrap();
        let cg = Cgroup::new(dir.path());
        assert_eq!(cg.pids().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn stale_when_directory_missing() {
        let cg = Cgroup::new("/nonexistent/path/for/captain-comeback-tests");
        let err = cg.pids().unwrap_err();
        assert!(err.is_stale());
    }

    #[test]
    fn set_then_read_memory_limit_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("memory.limit_in_bytes"), "0\n").unwrap();
        let cg = Cgroup::new(dir.path());
        cg.set_memory_limit_in_bytes(4096).unwrap();
        assert_eq!(cg.memory_limit_in_bytes().unwrap(), 4096);
    }
}
