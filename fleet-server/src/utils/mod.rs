//! Utility modules for the fleet server.

pub mod atomic_file;
pub mod format;
pub mod logger;
