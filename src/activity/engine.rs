//! Consumer thread bound to the activity queue: writes per-container
//! JSON log lines and mirrors them through the process logger.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use crossbeam_channel::Receiver;
use serde::Serialize;
use tracing::info;

use super::messages::ActivityMessage;
use super::status;
use crate::cgroup::ProcessRow;

#[derive(Serialize)]
struct ActivityRecord<'a> {
    log: &'a str,
    time: String,
}

pub struct ActivityEngine {
    activity_queue: Receiver<ActivityMessage>,
    activity_dir: PathBuf,
}

impl ActivityEngine {
    pub fn new(activity_queue: Receiver<ActivityMessage>, activity_dir: PathBuf) -> Self {
        Self {
            activity_queue,
            activity_dir,
        }
    }

    /// Consumes the activity queue until an `Exit` message arrives or
    /// the sender side is dropped.
    pub fn run(self) {
        loop {
            let msg = match self.activity_queue.recv() {
                Ok(msg) => msg,
                Err(_) => return,
            };

            match msg {
                ActivityMessage::NewCgroup(cg) => {
                    self.log_activity(cg.name(), "container has started");
                }
                ActivityMessage::StaleCgroup(cg) => {
                    self.log_activity(cg.name(), "container has exited");
                }
                ActivityMessage::RestartCgroup(cg, ps_table) => {
                    self.log_activity(cg.name(), "container exceeded its memory allocation");
                    self.log_activity(cg.name(), "container is restarting:");
                    self.log_activity(cg.name(), &render_ps_table(&ps_table));
                }
                ActivityMessage::RestartTimeout(cg, grace_period) => {
                    self.log_activity(
                        cg.name(),
                        &format!(
                            "container did not exit within {} seconds grace period",
                            grace_period.as_secs()
                        ),
                    );
                }
                ActivityMessage::Exit => {
                    info!("shutting down");
                    return;
                }
            }
        }
    }

    fn log_activity(&self, cg_name: &str, text: &str) {
        let record = ActivityRecord {
            log: text,
            time: Utc::now().to_rfc3339(),
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(_) => return,
        };

        let path = self.activity_dir.join(format!("{cg_name}-json.log"));
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
            let _ = writeln!(file, "{line}");
        }

        for line in text.lines().filter(|l| !l.is_empty()) {
            info!(container = cg_name, "{}", line);
        }
    }
}

/// Renders the process table with columns `PID, PPID, VSZ, RSS, STAT,
/// COMMAND`. VSZ/RSS are KiB, plain decimal integers. COMMAND is
/// shell-quoted so embedded spaces/specials stay unambiguous.
fn render_ps_table(rows: &[ProcessRow]) -> String {
    let headers = ["PID", "PPID", "VSZ", "RSS", "STAT", "COMMAND"];
    let mut table_rows: Vec<[String; 6]> = Vec::with_capacity(rows.len());
    for row in rows {
        table_rows.push([
            row.pid.to_string(),
            row.ppid.to_string(),
            row.vsz_kib().to_string(),
            row.rss_kib().to_string(),
            status::display_code(row.status),
            shell_words::join(row.cmdline.iter().map(String::as_str)),
        ]);
    }

    let mut widths = [0usize; 6];
    for (i, h) in headers.iter().enumerate() {
        widths[i] = h.len();
    }
    for row in &table_rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let mut out = String::new();
    for (i, h) in headers.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:<width$}", h, width = widths[i]));
    }
    for row in &table_rows {
        out.push('\n');
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&format!("{:<width$}", cell, width = widths[i]));
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pid: i32, ppid: i32, rss: u64, cmd: &[&str]) -> ProcessRow {
        ProcessRow {
            pid,
            ppid,
            rss_bytes: rss,
            vsz_bytes: rss * 2,
            status: 'R',
            cmdline: cmd.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn table_has_header_and_one_line_per_process() {
        let rows = vec![row(10, 1, 1024, &["sleep", "infinity"])];
        let table = render_ps_table(&rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("PID"));
        assert!(lines[1].contains("10"));
        assert!(lines[1].contains("sleep infinity"));
    }

    #[test]
    fn rss_never_renders_in_scientific_notation() {
        let rows = vec![row(1, 0, 2 * 1024 * 1024 * 1024, &["proc"])];
        let table = render_ps_table(&rows);
        assert!(table.contains("2097152"));
        assert!(!table.contains('e'));
    }

    #[test]
    fn command_column_quotes_each_argument_individually() {
        let one_arg = render_ps_table(&[row(1, 0, 0, &["echo", "hello world"])]);
        let two_args = render_ps_table(&[row(1, 0, 0, &["echo", "hello", "world"])]);
        assert_ne!(one_arg, two_args);
        assert!(one_arg.contains("echo 'hello world'"));
        assert!(two_args.contains("echo hello world"));
    }
}
