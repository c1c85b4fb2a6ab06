//! Shared fixtures for unit tests.

use crate::services::lifecycle::{LifecycleGateway, LifecycleOp};
use crate::services::scripts::ScriptOutput;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Write an executable `/bin/sh` script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// In-memory lifecycle gateway recording every call.
#[derive(Default)]
pub struct FakeLifecycle {
    calls: Mutex<Vec<(LifecycleOp, String)>>,
    args: Mutex<Vec<Vec<String>>>,
    failing: Mutex<HashSet<LifecycleOp>>,
}

impl FakeLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, op: LifecycleOp) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn calls(&self) -> Vec<(LifecycleOp, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_args(&self) -> Option<Vec<String>> {
        self.args.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LifecycleGateway for FakeLifecycle {
    async fn invoke(&self, op: LifecycleOp, instance: &str, args: &[String]) -> ScriptOutput {
        self.calls.lock().unwrap().push((op, instance.to_string()));
        self.args.lock().unwrap().push(args.to_vec());
        if self.failing.lock().unwrap().contains(&op) {
            ScriptOutput {
                ok: false,
                exit_code: Some(1),
                stdout: String::new(),
                stderr: format!("{} failed for {}", op, instance),
                error: None,
            }
        } else {
            ScriptOutput {
                ok: true,
                exit_code: Some(0),
                ..Default::default()
            }
        }
    }
}
