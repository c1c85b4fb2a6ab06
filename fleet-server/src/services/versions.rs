//! Release catalog backed by `manage-versions.sh`.

use crate::services::scripts::{ScriptOutput, ScriptRunner};

const VERSIONS_SCRIPT: &str = "manage-versions.sh";

pub struct VersionCatalog {
    runner: ScriptRunner,
}

impl VersionCatalog {
    pub fn new(runner: ScriptRunner) -> Self {
        Self { runner }
    }

    async fn run(&self, args: &[&str]) -> ScriptOutput {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.runner.run(VERSIONS_SCRIPT, &args).await
    }

    pub async fn latest(&self) -> Result<String, String> {
        let out = self.run(&["latest"]).await;
        if !out.ok {
            return Err(out.diagnostic());
        }
        Ok(out.stdout.trim().to_string())
    }

    pub async fn available(&self) -> Result<Vec<String>, String> {
        let out = self.run(&["available"]).await;
        if !out.ok {
            return Err(out.diagnostic());
        }
        Ok(parse_lines(&out.stdout))
    }

    /// Installed releases; a failing script means none are installed.
    pub async fn installed(&self) -> Vec<String> {
        let out = self.run(&["installed"]).await;
        if out.ok {
            parse_lines(&out.stdout)
        } else {
            Vec::new()
        }
    }

    pub async fn download(&self, version: &str) -> ScriptOutput {
        self.run(&["download", version]).await
    }

    pub async fn delete(&self, version: &str) -> ScriptOutput {
        self.run(&["delete", version]).await
    }
}

fn parse_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Version tags are passed as script arguments, keep them boring.
pub fn is_valid_version(version: &str) -> bool {
    !version.is_empty()
        && version.len() <= 64
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'))
}
