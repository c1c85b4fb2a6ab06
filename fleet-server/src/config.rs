use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub bind_addr: String,
    /// Root holding `instances.json`, `health_history.json`, `config.json`
    /// and one data directory per instance.
    pub data_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub log_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub port_range: PortRange,
    pub script_timeout: Duration,
    pub probe_timeout: Duration,
    pub proxy_timeout: Duration,
    pub admin_token: Option<String>,
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    pub fn contains(&self, port: u16) -> bool {
        port >= self.min && port <= self.max
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self { min: 30000, max: 39999 }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(std::env::var(key).unwrap_or_else(|_| default.into()))
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let defaults = PortRange::default();
        Self {
            port: env_parse("FLEET_PORT").unwrap_or(3001),
            bind_addr: std::env::var("FLEET_BIND").unwrap_or_else(|_| "127.0.0.1".into()),
            data_dir: env_path("FLEET_DATA_DIR", "/var/fleet/data"),
            backups_dir: env_path("FLEET_BACKUP_DIR", "/var/fleet/backups"),
            log_dir: env_path("FLEET_LOG_DIR", "/var/log/fleet"),
            scripts_dir: env_path("FLEET_SCRIPTS_DIR", "/usr/local/bin"),
            port_range: PortRange {
                min: env_parse("FLEET_PORT_MIN").unwrap_or(defaults.min),
                max: env_parse("FLEET_PORT_MAX").unwrap_or(defaults.max),
            },
            script_timeout: Duration::from_secs(
                env_parse("FLEET_SCRIPT_TIMEOUT_SECS").unwrap_or(300),
            ),
            probe_timeout: Duration::from_millis(
                env_parse("FLEET_PROBE_TIMEOUT_MS").unwrap_or(2000),
            ),
            proxy_timeout: Duration::from_secs(env_parse("FLEET_PROXY_TIMEOUT_SECS").unwrap_or(30)),
            admin_token: std::env::var("FLEET_ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        }
    }

    /// Configuration rooted at `root`, used by tests and local runs.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            port: 0,
            bind_addr: "127.0.0.1".into(),
            data_dir: root.join("data"),
            backups_dir: root.join("backups"),
            log_dir: root.join("logs"),
            scripts_dir: root.join("bin"),
            port_range: PortRange::default(),
            script_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_millis(2000),
            proxy_timeout: Duration::from_secs(30),
            admin_token: None,
            log_level: "info".into(),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.data_dir.join("instances.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("health_history.json")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn instance_dir(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }
}

/// Monitoring and notification settings stored in `<data_dir>/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSettings {
    #[serde(default)]
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub monitoring: MonitoringSettings,
    #[serde(default)]
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    #[serde(default)]
    pub webhook_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSettings {
    /// Seconds between health ticks
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Samples kept per instance
    #[serde(default = "default_history_retention")]
    pub history_retention_count: usize,
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_history_retention() -> usize {
    100
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            history_retention_count: default_history_retention(),
        }
    }
}

impl MonitorSettings {
    /// Load settings, falling back to defaults when the file is missing or corrupt.
    pub async fn load(path: &Path) -> Self {
        let mut settings: MonitorSettings =
            crate::utils::atomic_file::read_json_or_default(path).await;
        if settings.monitoring.interval_seconds == 0 {
            settings.monitoring.interval_seconds = default_interval_seconds();
        }
        if settings.monitoring.history_retention_count == 0 {
            settings.monitoring.history_retention_count = default_history_retention();
        }
        settings
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.monitoring.interval_seconds)
    }
}

/// The environment token wins over the one in the settings file; empty means disabled.
pub fn resolve_admin_token(config: &AppConfig, settings: &MonitorSettings) -> Option<String> {
    config
        .admin_token
        .clone()
        .or_else(|| settings.admin_token.clone())
        .filter(|t| !t.is_empty())
}
