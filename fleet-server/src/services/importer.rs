//! Instance import from an uploaded archive via `import-instance.sh`.

use crate::services::scripts::ScriptRunner;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const IMPORT_SCRIPT: &str = "import-instance.sh";

#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Diagnostic of the failed import script
    #[error("{0}")]
    Script(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct InstanceImporter {
    runner: ScriptRunner,
    staging_dir: PathBuf,
}

impl InstanceImporter {
    pub fn new(runner: ScriptRunner, staging_dir: PathBuf) -> Self {
        Self {
            runner,
            staging_dir,
        }
    }

    /// Spool `upload` to a staging file, hand it to the import script and
    /// remove the staging file whatever the outcome.
    pub async fn import<S, E>(&self, name: &str, upload: S) -> Result<(), ImportError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let staged = self
            .staging_dir
            .join(format!(".import-{}.partial", uuid::Uuid::new_v4().simple()));

        let spooled = spool(&staged, upload).await;
        let result = match spooled {
            Ok(bytes) => {
                tracing::info!(instance = name, bytes, "Import upload received");
                let args = vec![staged.to_string_lossy().to_string(), name.to_string()];
                let out = self.runner.run(IMPORT_SCRIPT, &args).await;
                if out.ok {
                    tracing::info!(instance = name, "Instance imported");
                    Ok(())
                } else {
                    Err(ImportError::Script(out.diagnostic()))
                }
            }
            Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_file(&staged).await {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(file = %staged.display(), error = %e, "Failed to remove import upload");
            }
        }
        result
    }
}

async fn spool<S, E>(dest: &Path, upload: S) -> Result<u64, ImportError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;
    tokio::pin!(upload);
    while let Some(chunk) = upload.next().await {
        let chunk = chunk.map_err(|e| ImportError::Upload(e.to_string()))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}
