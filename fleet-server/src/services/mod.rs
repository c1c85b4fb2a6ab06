pub mod backup_manager;
pub mod health_monitor;
pub mod importer;
pub mod lifecycle;
pub mod logs;
pub mod manifest_store;
pub mod proxy;
pub mod scripts;
pub mod system_stats;
pub mod versions;
