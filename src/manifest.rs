//! Thin serialized wrapper over an append-only JSON Lines manifest file.
//! At most one encoder writes at any instant; callers share a
//! [`ManifestWriter`] behind an `Arc` and call [`ManifestWriter::write`]
//! from as many tasks as they like.

use crate::Record;
use anyhow::{Context, Error};
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub struct ManifestWriter {
    file: Mutex<File>,
}

impl ManifestWriter {
    pub async fn create(path: &Path) -> Result<Self, Error> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("failed to open manifest {}", path.display()))?;

        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Appends one record as a single newline-terminated JSON line. Field
    /// ordering in the JSON text is not significant.
    pub async fn write(&self, record: &Record) -> Result<(), Error> {
        let mut line = serde_json::to_vec(record).context("failed to serialize record")?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .context("failed to append to manifest")?;
        Ok(())
    }

    /// Flushes buffered writes and syncs to disk. Recommended but not
    /// required for durability; called once at shutdown.
    pub async fn close(self) -> Result<(), Error> {
        let mut file = self.file.into_inner();
        file.flush().await.context("failed to flush manifest")?;
        file.sync_all().await.context("failed to sync manifest")?;
        Ok(())
    }
}
