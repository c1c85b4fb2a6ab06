use serde::Serialize;
use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub const LOG_LINES: usize = 200;
pub const ERR_LOG_LINES: usize = 50;
pub const NO_LOGS: &str = "(No logs found)";

/// Only this much of the end of a log file is read when tailing.
const TAIL_WINDOW: u64 = 512 * 1024;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceLogs {
    pub logs: String,
    pub err_logs: String,
}

/// Recent output of `<log_dir>/<name>.log` and `<log_dir>/<name>.err.log`.
pub async fn read_instance_logs(log_dir: &Path, instance: &str) -> InstanceLogs {
    let logs = tail_lines(&log_dir.join(format!("{}.log", instance)), LOG_LINES)
        .await
        .unwrap_or_else(|| NO_LOGS.to_string());
    let err_logs = tail_lines(&log_dir.join(format!("{}.err.log", instance)), ERR_LOG_LINES)
        .await
        .unwrap_or_default();
    InstanceLogs { logs, err_logs }
}

/// Last `n` lines of a file, or `None` when it cannot be read.
pub async fn tail_lines(path: &Path, n: usize) -> Option<String> {
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let len = file.metadata().await.ok()?.len();
    let start = len.saturating_sub(TAIL_WINDOW);
    file.seek(SeekFrom::Start(start)).await.ok()?;

    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf).await.ok()?;
    let text = String::from_utf8_lossy(&buf);

    // A window that starts mid-file begins with a partial line.
    let text = if start > 0 {
        text.split_once('\n').map(|(_, rest)| rest).unwrap_or("")
    } else {
        &text
    };
    Some(last_lines(text, n))
}

fn last_lines(text: &str, n: usize) -> String {
    let body = text.strip_suffix('\n').unwrap_or(text);
    if body.is_empty() {
        return String::new();
    }
    let lines: Vec<&str> = body.split('\n').collect();
    let mut out = lines[lines.len().saturating_sub(n)..].join("\n");
    if text.ends_with('\n') {
        out.push('\n');
    }
    out
}
