//! Periodic health monitoring with edge-triggered notifications.
//!
//! Every tick snapshots the manifest once, probes all instances concurrently,
//! appends one sample per instance to its bounded history, notifies only when
//! an instance's observation differs from the previous tick's, and persists the
//! whole history document once at the end.

use crate::models::health::{
    push_bounded, HealthSample, HistoryDocument, NotificationEvent, Transition,
};
use crate::services::manifest_store::ManifestStore;
use crate::utils::atomic_file::{read_json_or_default, write_json_atomic};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const HEALTH_PATH: &str = "/api/health";

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `true` when the instance on `port` answered healthy. Errors and timeouts are `false`.
    async fn probe(&self, port: u16) -> bool;
}

/// Probes `GET http://127.0.0.1:<port>/api/health` with a bounded timeout.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{}{}", port, HEALTH_PATH);
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(port, error = %e, "Health probe failed");
                return false;
            }
        };
        if !resp.status().is_success() {
            tracing::debug!(
                port,
                status = %resp.status(),
                "Health probe returned non-success status"
            );
            return false;
        }
        match resp.json::<serde_json::Value>().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(port, error = %e, "Health probe returned malformed body");
                false
            }
        }
    }
}

pub trait NotificationSink: Send + Sync {
    /// Hand off an event for delivery. Must not block the caller.
    fn send(&self, event: &NotificationEvent) -> anyhow::Result<()>;
}

/// Slack/Discord style webhook. Delivery happens in a spawned task; failures
/// are logged, never retried.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, url: url.into() })
    }

    pub fn payload(event: &NotificationEvent) -> serde_json::Value {
        serde_json::json!({
            "content": format!("[Fleet] {}: {}", event.transition.severity(), event.message),
            "username": "Fleet Monitor",
        })
    }
}

impl NotificationSink for WebhookSink {
    fn send(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Ok(());
        }
        let url = reqwest::Url::parse(&self.url)?;
        let request = self.client.post(url).json(&Self::payload(event));
        let instance = event.instance_name.clone();
        tokio::spawn(async move {
            match request.send().await {
                Ok(resp) if !resp.status().is_success() => {
                    tracing::warn!(
                        instance = %instance,
                        status = %resp.status(),
                        "Notification rejected by webhook"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(instance = %instance, error = %e, "Notification failed"),
            }
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Completed {
        probed: usize,
        events: Vec<NotificationEvent>,
    },
    /// A previous tick was still running
    Skipped,
}

#[derive(Default)]
struct MonitorState {
    history: HistoryDocument,
    last_status: HashMap<String, bool>,
}

pub struct HealthMonitor {
    manifest: Arc<ManifestStore>,
    probe: Arc<dyn HealthProbe>,
    sink: Arc<dyn NotificationSink>,
    history_path: PathBuf,
    retention: usize,
    state: Mutex<MonitorState>,
    tick_guard: Mutex<()>,
}

impl HealthMonitor {
    /// Build a monitor, loading any previously persisted history.
    pub async fn load(
        manifest: Arc<ManifestStore>,
        probe: Arc<dyn HealthProbe>,
        sink: Arc<dyn NotificationSink>,
        history_path: PathBuf,
        retention: usize,
    ) -> Self {
        let history: HistoryDocument = read_json_or_default(&history_path).await;
        Self {
            manifest,
            probe,
            sink,
            history_path,
            retention: retention.max(1),
            state: Mutex::new(MonitorState {
                history,
                last_status: HashMap::new(),
            }),
            tick_guard: Mutex::new(()),
        }
    }

    pub async fn history(&self, instance: &str) -> Vec<HealthSample> {
        let state = self.state.lock().await;
        state
            .history
            .get(instance)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop everything known about a removed instance.
    pub async fn forget(&self, instance: &str) {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.last_status.remove(instance);
            if state.history.remove(instance).is_none() {
                return;
            }
            state.history.clone()
        };
        if let Err(e) = write_json_atomic(&self.history_path, &snapshot).await {
            tracing::error!(error = %e, "Failed to save health history");
        }
    }

    /// Live probe of a single port, sharing the monitor's probe.
    pub async fn probe_port(&self, port: u16) -> bool {
        self.probe.probe(port).await
    }

    pub async fn tick(&self) -> TickOutcome {
        let Ok(_running) = self.tick_guard.try_lock() else {
            tracing::warn!("Previous health tick still running, skipping");
            return TickOutcome::Skipped;
        };

        let manifest = self.manifest.load().await;
        let timestamp = Utc::now();

        // One task per instance so a misbehaving probe cannot take the others down.
        let probes = manifest.iter().map(|(name, record)| {
            let probe = self.probe.clone();
            let port = record.port;
            let name = name.clone();
            async move {
                let healthy = match tokio::spawn(async move { probe.probe(port).await }).await {
                    Ok(h) => h,
                    Err(e) => {
                        tracing::error!(instance = %name, error = %e, "Health probe task failed");
                        false
                    }
                };
                (name, healthy)
            }
        });
        let results = join_all(probes).await;

        let mut events = Vec::new();
        let snapshot = {
            let mut state = self.state.lock().await;
            // Instances that left the manifest start over if they come back.
            state.last_status.retain(|name, _| manifest.contains_key(name));
            state.history.retain(|name, _| manifest.contains_key(name));

            for (name, healthy) in &results {
                let history = state.history.entry(name.clone()).or_default();
                push_bounded(
                    history,
                    HealthSample {
                        timestamp,
                        healthy: *healthy,
                    },
                    self.retention,
                );

                let previous = state.last_status.insert(name.clone(), *healthy);
                let transition = match previous {
                    Some(true) if !*healthy => Some(Transition::Down),
                    Some(false) if *healthy => Some(Transition::Recovered),
                    _ => None,
                };
                if let Some(transition) = transition {
                    match transition {
                        Transition::Down => tracing::warn!(instance = %name, "Instance went DOWN"),
                        Transition::Recovered => {
                            tracing::info!(instance = %name, "Instance RECOVERED")
                        }
                    }
                    let event = NotificationEvent::new(name, transition);
                    if let Err(e) = self.sink.send(&event) {
                        tracing::warn!(
                            instance = %name,
                            error = %e,
                            "Failed to hand off notification"
                        );
                    }
                    events.push(event);
                }
            }
            state.history.clone()
        };

        if let Err(e) = write_json_atomic(&self.history_path, &snapshot).await {
            tracing::error!(error = %e, "Failed to save health history");
        }

        TickOutcome::Completed {
            probed: results.len(),
            events,
        }
    }

    /// Run ticks every `period` until `cancel` fires. Ticks never overlap.
    pub fn spawn(self: Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval_secs = period.as_secs(), "Starting health monitor");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; wait a full period before probing.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                }
            }
            tracing::info!("Health monitor stopped");
        })
    }
}
