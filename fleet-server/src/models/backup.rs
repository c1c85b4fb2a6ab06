use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

pub const ARTIFACT_PREFIX: &str = "backup-";
pub const ARTIFACT_EXT: &str = ".zip";
const NAME_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupArtifact {
    pub name: String,
    pub size_bytes: u64,
    /// Human readable size
    pub size: String,
    pub created: DateTime<Utc>,
}

/// `backup-2024-05-01T10-11-12-345Z.zip`
pub fn artifact_name_for(ts: DateTime<Utc>) -> String {
    format!("{}{}{}", ARTIFACT_PREFIX, ts.format(NAME_TIME_FORMAT), ARTIFACT_EXT)
}

/// Recover the creation time encoded in an artifact name.
pub fn parse_artifact_time(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix(ARTIFACT_PREFIX)?.strip_suffix(ARTIFACT_EXT)?;
    NaiveDateTime::parse_from_str(stamp, NAME_TIME_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

/// Plain file names ending in `.zip`; anything that could escape the backup directory is rejected.
pub fn is_valid_artifact_name(name: &str) -> bool {
    name.ends_with(ARTIFACT_EXT)
        && name.len() > ARTIFACT_EXT.len()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
}
