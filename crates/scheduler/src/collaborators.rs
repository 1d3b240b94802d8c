//! Contracts for the storage and export services a sync hands its data to,
//! plus local cleanup of downloaded artifacts.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use finsync_core::EntityKey;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::SyncError;
use crate::types::DateRange;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub number_masked: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub date: NaiveDate,
    pub description: String,
    /// Signed amount in the account currency's minor unit.
    pub amount: i64,
    #[serde(default)]
    pub balance: Option<i64>,
    #[serde(default)]
    pub merchant: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncMetadata {
    pub execution_id: Uuid,
    pub range: DateRange,
    pub attempt: u32,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub inserted: usize,
    pub skipped: usize,
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn import_transactions(
        &self,
        entity: &EntityKey,
        account: &AccountInfo,
        rows: &[TransactionRow],
        meta: &SyncMetadata,
    ) -> Result<ImportResult, SyncError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResult {
    pub success: bool,
    #[serde(default)]
    pub url: Option<String>,
}

/// Spreadsheet (or equivalent) snapshot export.
#[async_trait]
pub trait ExportService: Send + Sync {
    async fn export_snapshot(&self) -> Result<ExportResult, SyncError>;
}

/// Downloaded files live under `<root>/<kind>/<id>/`.
#[derive(Debug, Clone)]
pub struct DownloadArtifacts {
    root: PathBuf,
}

impl DownloadArtifacts {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn dir_for(&self, key: &EntityKey) -> PathBuf {
        self.root.join(key.kind.as_str()).join(&key.id)
    }

    /// Remove the files downloaded for `key`. Returns how many were removed.
    pub async fn cleanup(&self, key: &EntityKey) -> std::io::Result<usize> {
        let dir = self.dir_for(key);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        debug!(entity = %key, removed, dir = %dir.display(), "artifacts removed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cleanup_removes_only_that_entity() {
        let root = tempfile::tempdir().unwrap();
        let artifacts = DownloadArtifacts::new(root.path().to_path_buf());
        let shinhan = EntityKey::card("shinhan");
        let hyundai = EntityKey::card("hyundai");

        for key in [&shinhan, &hyundai] {
            let dir = artifacts.dir_for(key);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("statement.xls"), b"x").unwrap();
        }
        std::fs::write(artifacts.dir_for(&shinhan).join("receipt.pdf"), b"y").unwrap();

        assert_eq!(artifacts.cleanup(&shinhan).await.unwrap(), 2);
        assert_eq!(std::fs::read_dir(artifacts.dir_for(&shinhan)).unwrap().count(), 0);
        assert!(artifacts.dir_for(&hyundai).join("statement.xls").exists());
    }

    #[tokio::test]
    async fn cleanup_of_missing_dir_is_zero() {
        let root = tempfile::tempdir().unwrap();
        let artifacts = DownloadArtifacts::new(root.path().to_path_buf());
        assert_eq!(artifacts.cleanup(&EntityKey::bank("woori")).await.unwrap(), 0);
    }
}
