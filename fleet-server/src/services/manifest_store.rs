//! Authoritative store for instance metadata.
//!
//! Reads are lock-free snapshots of the on-disk document. Every mutation goes
//! through [`ManifestStore::update`], which holds the writer lock across the
//! whole read-modify-write so two concurrent creates can never both pass the
//! port check against a stale read.

use crate::config::PortRange;
use crate::models::instance::{InstanceRecord, Manifest};
use crate::utils::atomic_file::{read_json_or_default, write_json_atomic};
use std::path::PathBuf;
use tokio::sync::Mutex;

#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    #[error("Instance name must be 1-64 characters of letters, digits, '-' or '_'")]
    InvalidName,

    #[error("Instance {0} already exists")]
    AlreadyExists(String),

    #[error("Instance {0} not found")]
    NotFound(String),

    #[error("Port must be a number")]
    InvalidPort,

    #[error("Port must be between {} and {}", .0.min, .0.max)]
    PortOutOfRange(PortRange),

    #[error("Port {0} is already in use")]
    PortInUse(u16),

    #[error("No free port left between {} and {}", .0.min, .0.max)]
    PortsExhausted(PortRange),

    #[error("Failed to persist manifest: {0}")]
    Persist(#[from] anyhow::Error),
}

pub struct ManifestStore {
    path: PathBuf,
    ports: PortRange,
    writer: Mutex<()>,
}

impl ManifestStore {
    pub fn new(path: PathBuf, ports: PortRange) -> Self {
        Self {
            path,
            ports,
            writer: Mutex::new(()),
        }
    }

    pub fn port_range(&self) -> PortRange {
        self.ports
    }

    /// Snapshot of the manifest; a missing or corrupt document is an empty manifest.
    pub async fn load(&self) -> Manifest {
        read_json_or_default(&self.path).await
    }

    /// Persist a full manifest, replacing the document atomically.
    ///
    /// Callers that derive the new manifest from a previous `load` should use
    /// [`ManifestStore::update`] instead.
    pub async fn save(&self, manifest: &Manifest) -> anyhow::Result<()> {
        let _guard = self.writer.lock().await;
        write_json_atomic(&self.path, manifest).await
    }

    pub async fn get(&self, name: &str) -> Option<InstanceRecord> {
        self.load().await.remove(name)
    }

    /// Serialized read-modify-write. Nothing is written when `f` fails.
    pub async fn update<T, F>(&self, f: F) -> Result<T, ManifestError>
    where
        F: FnOnce(&mut Manifest) -> Result<T, ManifestError>,
    {
        let _guard = self.writer.lock().await;
        let mut manifest = self.load().await;
        let out = f(&mut manifest)?;
        write_json_atomic(&self.path, &manifest).await?;
        Ok(out)
    }

    /// Reserve a new record under the writer lock; returns the stored record.
    pub async fn insert_new(
        &self,
        name: &str,
        requested_port: Option<u16>,
        version: Option<String>,
        memory_limit: Option<String>,
    ) -> Result<InstanceRecord, ManifestError> {
        let ports = self.ports;
        self.update(|manifest| {
            if manifest.contains_key(name) {
                return Err(ManifestError::AlreadyExists(name.to_string()));
            }
            let port = allocate_port(ports, manifest, requested_port)?;
            let mut record = InstanceRecord::new(port);
            record.version = version;
            record.memory_limit = memory_limit;
            manifest.insert(name.to_string(), record.clone());
            Ok(record)
        })
        .await
    }

    /// Mutate an existing record.
    pub async fn modify<F>(&self, name: &str, f: F) -> Result<InstanceRecord, ManifestError>
    where
        F: FnOnce(&mut InstanceRecord),
    {
        self.update(|manifest| {
            let record = manifest
                .get_mut(name)
                .ok_or_else(|| ManifestError::NotFound(name.to_string()))?;
            f(record);
            Ok(record.clone())
        })
        .await
    }

    pub async fn remove(&self, name: &str) -> Result<Option<InstanceRecord>, ManifestError> {
        self.update(|manifest| Ok(manifest.remove(name))).await
    }
}

/// Validate `requested` or pick the smallest free port in range.
pub fn allocate_port(
    range: PortRange,
    manifest: &Manifest,
    requested: Option<u16>,
) -> Result<u16, ManifestError> {
    let in_use = |port: u16| manifest.values().any(|r| r.port == port);

    match requested {
        Some(port) => {
            if !range.contains(port) {
                return Err(ManifestError::PortOutOfRange(range));
            }
            if in_use(port) {
                return Err(ManifestError::PortInUse(port));
            }
            Ok(port)
        }
        None => (range.min..=range.max)
            .find(|p| !in_use(*p))
            .ok_or(ManifestError::PortsExhausted(range)),
    }
}

/// Interpret the loosely typed `port` field of a create request.
pub fn parse_requested_port(
    raw: Option<&serde_json::Value>,
    range: PortRange,
) -> Result<Option<u16>, ManifestError> {
    let value = match raw {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(serde_json::Value::String(s)) => {
            s.trim().parse::<i64>().map_err(|_| ManifestError::InvalidPort)?
        }
        Some(serde_json::Value::Number(n)) => n.as_i64().ok_or(ManifestError::InvalidPort)?,
        Some(_) => return Err(ManifestError::InvalidPort),
    };
    u16::try_from(value)
        .map(Some)
        .map_err(|_| ManifestError::PortOutOfRange(range))
}
