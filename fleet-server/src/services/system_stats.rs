//! Host load, memory and data directory usage for the dashboard.

use crate::utils::format::format_bytes;
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStats {
    /// 1-minute load average, two decimals
    pub load: Option<String>,
    pub memory_percent: Option<f64>,
    pub disk_usage: String,
}

pub async fn collect(data_dir: &Path) -> HostStats {
    let load = tokio::fs::read_to_string("/proc/loadavg")
        .await
        .ok()
        .and_then(|s| parse_loadavg(&s))
        .map(|l| format!("{:.2}", l));
    let memory_percent = tokio::fs::read_to_string("/proc/meminfo")
        .await
        .ok()
        .and_then(|s| parse_meminfo(&s));
    let disk_usage = format_bytes(dir_size(data_dir.to_path_buf()).await);

    HostStats {
        load,
        memory_percent,
        disk_usage,
    }
}

fn parse_loadavg(raw: &str) -> Option<f64> {
    raw.split_whitespace().next()?.parse().ok()
}

/// Used memory (`MemTotal - MemAvailable`) as a percentage with one decimal.
fn parse_meminfo(raw: &str) -> Option<f64> {
    let field = |key: &str| -> Option<f64> {
        raw.lines()
            .find(|l| l.starts_with(key))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:").or_else(|| field("MemFree:"))?;
    if total <= 0.0 {
        return None;
    }
    Some(((total - available) * 1000.0 / total).round() / 10.0)
}

/// Total size of regular files under `dir`; unreadable entries are skipped.
pub async fn dir_size(dir: PathBuf) -> u64 {
    tokio::task::spawn_blocking(move || {
        WalkDir::new(&dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    })
    .await
    .unwrap_or(0)
}
