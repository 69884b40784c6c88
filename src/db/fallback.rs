//! Fallback record store: one flat file holding the whole collection.
//!
//! Used only for client records when the primary store is unavailable or
//! over quota. The collection is read and replaced as a whole; upsert and
//! delete are read-modify-write passes. Writes go through a temp file and
//! rename so a failed write never truncates the existing collection.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use crate::db::{ClientRecord, ClientStore, StorageTier};
use crate::error::StoreError;

/// Single-file JSON store for client records.
pub struct FallbackStore {
    path: PathBuf,
}

impl FallbackStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole collection. A missing or zero-length file is an
    /// empty collection, not a failure.
    async fn read_all(&self) -> Result<Vec<ClientRecord>, StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StoreError::Read(format!(
                    "read {}: {err}",
                    self.path.display()
                )));
            }
        };
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&raw).map_err(|e| {
            StoreError::Serialization(format!("decode {}: {e}", self.path.display()))
        })
    }

    /// Replace the whole collection atomically (temp file + rename).
    async fn write_all(&self, records: &[ClientRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io_write_err("create dir", parent, e))?;
        }

        let encoded = serde_json::to_vec(records).map_err(|e| {
            StoreError::Serialization(format!("encode {}: {e}", self.path.display()))
        })?;

        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &encoded)
            .await
            .map_err(|e| map_io_write_err("write", &temp_path, e))?;
        tokio::fs::rename(&temp_path, &self.path).await.map_err(|e| {
            warn!(
                from = %temp_path.display(),
                to = %self.path.display(),
                error = %e,
                "fallback store: rename failed"
            );
            map_io_write_err("rename", &self.path, e)
        })
    }
}

#[async_trait]
impl ClientStore for FallbackStore {
    fn tier(&self) -> StorageTier {
        StorageTier::Fallback
    }

    async fn upsert_client(&self, record: &ClientRecord) -> Result<(), StoreError> {
        let mut records = self.read_all().await?;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        self.write_all(&records).await
    }

    async fn list_clients(&self) -> Result<Vec<ClientRecord>, StoreError> {
        self.read_all().await
    }

    async fn delete_client(&self, id: i64) -> Result<bool, StoreError> {
        let mut records = self.read_all().await?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }
        self.write_all(&records).await?;
        Ok(true)
    }
}

fn is_disk_full(err: &std::io::Error) -> bool {
    // ENOSPC surfaces as raw code 28 on platforms where the kind is
    // reported as Other.
    matches!(
        err.kind(),
        ErrorKind::StorageFull | ErrorKind::QuotaExceeded
    ) || err.raw_os_error() == Some(28)
}

fn map_io_write_err(op: &str, path: &Path, err: std::io::Error) -> StoreError {
    if is_disk_full(&err) {
        StoreError::QuotaExceeded(format!("{op} {}: {err}", path.display()))
    } else {
        StoreError::Write(format!("{op} {}: {err}", path.display()))
    }
}
