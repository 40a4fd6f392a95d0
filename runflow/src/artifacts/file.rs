//! Filesystem-backed artifact sink.

use super::{artifact_ref, encode, validate_name, ArtifactRef, ArtifactSink, LogRow};
use crate::errors::ArtifactError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Writes `<root>/<run_id>/<name>.json` and appends to `<root>/<run_id>.jsonl`.
#[derive(Debug)]
pub struct FileArtifactSink {
    root: PathBuf,
    append_lock: Mutex<()>,
}

impl FileArtifactSink {
    /// Creates a sink rooted at `root`. Directories are created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            append_lock: Mutex::new(()),
        }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf, ArtifactError> {
        validate_name(run_id)?;
        Ok(self.root.join(run_id))
    }

    fn row_log(&self, run_id: &str) -> Result<PathBuf, ArtifactError> {
        validate_name(run_id)?;
        Ok(self.root.join(format!("{run_id}.jsonl")))
    }
}

#[async_trait]
impl ArtifactSink for FileArtifactSink {
    async fn write_artifact(
        &self,
        run_id: &str,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<ArtifactRef, ArtifactError> {
        validate_name(name)?;
        let dir = self.run_dir(run_id)?;
        fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{name}.json"));
        let bytes = encode(value)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => ArtifactError::AlreadyExists(name.to_string()),
                _ => ArtifactError::Io(e),
            })?;
        file.write_all(&bytes).await?;
        file.flush().await?;

        debug!(run_id = %run_id, artifact = %name, path = %path.display(), "artifact written");
        Ok(artifact_ref(name, path.display().to_string(), &bytes))
    }

    async fn append_row(&self, row: LogRow) -> Result<(), ArtifactError> {
        let path = self.row_log(&row.run_id)?;
        let mut line = serde_json::to_vec(&row.redacted())?;
        line.push(b'\n');

        let _guard = self.append_lock.lock().await;
        fs::create_dir_all(&self.root).await?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
