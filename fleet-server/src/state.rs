use crate::config::{resolve_admin_token, AppConfig, MonitorSettings};
use crate::services::backup_manager::BackupManager;
use crate::services::health_monitor::{
    HealthMonitor, HealthProbe, HttpProbe, NotificationSink, WebhookSink,
};
use crate::services::importer::InstanceImporter;
use crate::services::lifecycle::{LifecycleGateway, ScriptLifecycle};
use crate::services::manifest_store::ManifestStore;
use crate::services::proxy::ProxyRouter;
use crate::services::scripts::ScriptRunner;
use crate::services::versions::VersionCatalog;
use std::sync::Arc;

pub struct AppState {
    pub config: AppConfig,
    pub settings: MonitorSettings,
    pub admin_token: Option<String>,
    pub manifest: Arc<ManifestStore>,
    pub lifecycle: Arc<dyn LifecycleGateway>,
    pub monitor: Arc<HealthMonitor>,
    pub backups: BackupManager,
    pub proxy: ProxyRouter,
    pub versions: VersionCatalog,
    pub importer: InstanceImporter,
}

impl AppState {
    /// Production wiring: scripts on disk, HTTP probes, webhook notifications.
    pub async fn new(config: AppConfig, settings: MonitorSettings) -> anyhow::Result<Self> {
        let runner = ScriptRunner::new(config.scripts_dir.clone(), config.script_timeout);
        let lifecycle: Arc<dyn LifecycleGateway> = Arc::new(ScriptLifecycle::new(runner));
        let probe: Arc<dyn HealthProbe> = Arc::new(HttpProbe::new(config.probe_timeout)?);
        let sink: Arc<dyn NotificationSink> =
            Arc::new(WebhookSink::new(settings.notifications.webhook_url.clone())?);
        Self::with_collaborators(config, settings, lifecycle, probe, sink).await
    }

    pub async fn with_collaborators(
        config: AppConfig,
        settings: MonitorSettings,
        lifecycle: Arc<dyn LifecycleGateway>,
        probe: Arc<dyn HealthProbe>,
        sink: Arc<dyn NotificationSink>,
    ) -> anyhow::Result<Self> {
        let manifest = Arc::new(ManifestStore::new(config.manifest_path(), config.port_range));
        let monitor = Arc::new(
            HealthMonitor::load(
                manifest.clone(),
                probe,
                sink,
                config.history_path(),
                settings.monitoring.history_retention_count,
            )
            .await,
        );
        let backups = BackupManager::new(
            config.data_dir.clone(),
            config.backups_dir.clone(),
            lifecycle.clone(),
        );
        let proxy = ProxyRouter::new(manifest.clone(), config.proxy_timeout)?;
        let runner = ScriptRunner::new(config.scripts_dir.clone(), config.script_timeout);
        let versions = VersionCatalog::new(runner.clone());
        let importer = InstanceImporter::new(runner, config.backups_dir.clone());
        let admin_token = resolve_admin_token(&config, &settings);

        Ok(Self {
            config,
            settings,
            admin_token,
            manifest,
            lifecycle,
            monitor,
            backups,
            proxy,
            versions,
            importer,
        })
    }
}
