//! Lifecycle gateway: the add/remove/start/stop capability set backed by the
//! external instance management scripts.

use crate::services::scripts::{ScriptOutput, ScriptRunner};
use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleOp {
    Add,
    Remove,
    Start,
    Stop,
}

impl LifecycleOp {
    pub fn script_name(&self) -> &'static str {
        match self {
            LifecycleOp::Add => "add-instance.sh",
            LifecycleOp::Remove => "remove-instance.sh",
            LifecycleOp::Start => "start-instance.sh",
            LifecycleOp::Stop => "stop-instance.sh",
        }
    }
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleOp::Add => "add",
            LifecycleOp::Remove => "remove",
            LifecycleOp::Start => "start",
            LifecycleOp::Stop => "stop",
        };
        f.write_str(s)
    }
}

#[async_trait]
pub trait LifecycleGateway: Send + Sync {
    /// Run one lifecycle operation. Failures come back as `ok == false` with the
    /// captured output; nothing is retried here.
    async fn invoke(&self, op: LifecycleOp, instance: &str, args: &[String]) -> ScriptOutput;

    async fn start(&self, instance: &str) -> ScriptOutput {
        self.invoke(LifecycleOp::Start, instance, &[]).await
    }

    async fn stop(&self, instance: &str) -> ScriptOutput {
        self.invoke(LifecycleOp::Stop, instance, &[]).await
    }

    /// Stop then start. A failed stop is logged and the start is still attempted.
    async fn restart(&self, instance: &str) -> ScriptOutput {
        let stopped = self.stop(instance).await;
        if !stopped.ok {
            tracing::warn!(instance, error = %stopped.diagnostic(), "Stop failed during restart, starting anyway");
        }
        self.start(instance).await
    }
}

/// Gateway that shells out to `<scripts_dir>/<op>-instance.sh <name> [args...]`.
pub struct ScriptLifecycle {
    runner: ScriptRunner,
}

impl ScriptLifecycle {
    pub fn new(runner: ScriptRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl LifecycleGateway for ScriptLifecycle {
    async fn invoke(&self, op: LifecycleOp, instance: &str, args: &[String]) -> ScriptOutput {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(instance.to_string());
        argv.extend_from_slice(args);
        let out = self.runner.run(op.script_name(), &argv).await;
        if out.ok {
            tracing::info!(instance, op = %op, "Lifecycle operation succeeded");
        } else {
            tracing::error!(instance, op = %op, error = %out.diagnostic(), "Lifecycle operation failed");
        }
        out
    }
}

/// Arguments handed to the add script.
#[derive(Debug, Default)]
pub struct AddArgs<'a> {
    pub email: Option<&'a str>,
    pub password: Option<&'a str>,
    pub port: u16,
    pub memory: Option<&'a str>,
    pub version: Option<&'a str>,
}

impl AddArgs<'_> {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(email) = self.email {
            args.push("--email".into());
            args.push(email.into());
        }
        if let Some(password) = self.password {
            args.push("--password".into());
            args.push(password.into());
        }
        args.push("--port".into());
        args.push(self.port.to_string());
        if let Some(memory) = self.memory {
            args.push("--memory".into());
            args.push(memory.into());
        }
        if let Some(version) = self.version {
            args.push("--version".into());
            args.push(version.into());
        }
        args
    }
}
