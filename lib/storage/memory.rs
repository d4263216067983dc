//! In-process [`StorageDriver`]: the grounding/test substrate, selected by
//! `KEPPEL_DRIVER_STORAGE={"type":"in-memory"}`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;

use crate::storage::{BlobInfo, BlobStream, ManifestInfo, StorageContents, StorageDriver, TrivyReportInfo};
use crate::{KeppelError, KeppelResult};

#[derive(Debug, Default)]
struct AccountState {
    /// Finalized blobs, keyed by storage id.
    blobs: HashMap<String, Vec<u8>>,
    /// In-progress uploads, keyed by storage id, tracking the last chunk number accepted.
    uploads: HashMap<String, (u64, Vec<u8>)>,
    manifests: HashMap<(String, String), Vec<u8>>,
    trivy_reports: HashMap<(String, String, String), Vec<u8>>,
}

/// A complete, in-memory [`StorageDriver`]. Every account is an isolated entry in an internal
/// map; nothing survives process restart.
#[derive(Debug, Default)]
pub struct MemoryStorageDriver {
    accounts: Mutex<HashMap<String, AccountState>>,
}

impl MemoryStorageDriver {
    /// Builds an empty driver.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageDriver for MemoryStorageDriver {
    async fn append_to_blob(
        &self,
        account_name: &str,
        storage_id: &str,
        chunk_number: u64,
        _size_hint: Option<u64>,
        chunk: Bytes,
    ) -> KeppelResult<()> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.entry(account_name.to_string()).or_default();

        if account.blobs.contains_key(storage_id) {
            return Err(KeppelError::Conflict("append-after-finalize".into()));
        }

        let entry = account
            .uploads
            .entry(storage_id.to_string())
            .or_insert((0, Vec::new()));

        let expected = entry.0 + 1;
        if chunk_number != expected {
            return Err(KeppelError::RangeInvalid(format!("expected chunk {expected}")));
        }

        entry.0 = chunk_number;
        entry.1.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finalize_blob(
        &self,
        account_name: &str,
        storage_id: &str,
        _chunk_count: u64,
    ) -> KeppelResult<()> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.entry(account_name.to_string()).or_default();

        if account.blobs.contains_key(storage_id) {
            return Ok(()); // idempotent
        }

        let (_, bytes) = account
            .uploads
            .remove(storage_id)
            .unwrap_or((0, Vec::new()));
        account.blobs.insert(storage_id.to_string(), bytes);
        Ok(())
    }

    async fn abort_blob_upload(
        &self,
        account_name: &str,
        storage_id: &str,
        _chunk_count: u64,
    ) -> KeppelResult<()> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.entry(account_name.to_string()).or_default();

        if account.blobs.contains_key(storage_id) {
            return Err(KeppelError::Conflict("already finalized".into()));
        }
        account.uploads.remove(storage_id);
        Ok(())
    }

    async fn read_blob(&self, account_name: &str, storage_id: &str) -> KeppelResult<(BlobStream, u64)> {
        let accounts = self.accounts.lock().unwrap();
        let bytes = accounts
            .get(account_name)
            .and_then(|a| a.blobs.get(storage_id))
            .ok_or_else(|| KeppelError::NotFound(format!("blob {storage_id:?}")))?
            .clone();

        let size = bytes.len() as u64;
        let stream = stream::once(async move { Ok(Bytes::from(bytes)) });
        Ok((Box::pin(stream), size))
    }

    async fn url_for_blob(&self, _account_name: &str, _storage_id: &str) -> KeppelResult<String> {
        Err(KeppelError::NotImplemented(
            "in-memory driver has no direct URLs".into(),
        ))
    }

    async fn delete_blob(&self, account_name: &str, storage_id: &str) -> KeppelResult<()> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.entry(account_name.to_string()).or_default();
        account
            .blobs
            .remove(storage_id)
            .map(|_| ())
            .ok_or_else(|| KeppelError::NotFound(format!("blob {storage_id:?}")))
    }

    async fn read_manifest(&self, account_name: &str, repo_name: &str, digest: &str) -> KeppelResult<Bytes> {
        let accounts = self.accounts.lock().unwrap();
        accounts
            .get(account_name)
            .and_then(|a| a.manifests.get(&(repo_name.to_string(), digest.to_string())))
            .map(|b| Bytes::from(b.clone()))
            .ok_or_else(|| KeppelError::NotFound(format!("manifest {repo_name}@{digest}")))
    }

    async fn write_manifest(
        &self,
        account_name: &str,
        repo_name: &str,
        digest: &str,
        content: Bytes,
    ) -> KeppelResult<()> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.entry(account_name.to_string()).or_default();
        account
            .manifests
            .insert((repo_name.to_string(), digest.to_string()), content.to_vec());
        Ok(())
    }

    async fn delete_manifest(&self, account_name: &str, repo_name: &str, digest: &str) -> KeppelResult<()> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.entry(account_name.to_string()).or_default();
        account
            .manifests
            .remove(&(repo_name.to_string(), digest.to_string()));
        Ok(())
    }

    async fn read_trivy_report(
        &self,
        account_name: &str,
        repo_name: &str,
        digest: &str,
        format: &str,
    ) -> KeppelResult<Bytes> {
        let accounts = self.accounts.lock().unwrap();
        accounts
            .get(account_name)
            .and_then(|a| {
                a.trivy_reports
                    .get(&(repo_name.to_string(), digest.to_string(), format.to_string()))
            })
            .map(|b| Bytes::from(b.clone()))
            .ok_or_else(|| KeppelError::NotFound(format!("trivy report {repo_name}@{digest} ({format})")))
    }

    async fn write_trivy_report(
        &self,
        account_name: &str,
        repo_name: &str,
        digest: &str,
        format: &str,
        content: Bytes,
    ) -> KeppelResult<()> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.entry(account_name.to_string()).or_default();
        account.trivy_reports.insert(
            (repo_name.to_string(), digest.to_string(), format.to_string()),
            content.to_vec(),
        );
        Ok(())
    }

    async fn delete_trivy_report(
        &self,
        account_name: &str,
        repo_name: &str,
        digest: &str,
        format: &str,
    ) -> KeppelResult<()> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.entry(account_name.to_string()).or_default();
        account
            .trivy_reports
            .remove(&(repo_name.to_string(), digest.to_string(), format.to_string()));
        Ok(())
    }

    async fn list_storage_contents(&self, account_name: &str) -> KeppelResult<StorageContents> {
        let accounts = self.accounts.lock().unwrap();
        let Some(account) = accounts.get(account_name) else {
            return Ok(StorageContents::default());
        };

        Ok(StorageContents {
            blobs: account
                .blobs
                .iter()
                .map(|(storage_id, bytes)| BlobInfo {
                    storage_id: storage_id.clone(),
                    size_bytes: bytes.len() as i64,
                })
                .collect(),
            manifests: account
                .manifests
                .keys()
                .map(|(repo_name, digest)| ManifestInfo {
                    repo_name: repo_name.clone(),
                    digest: digest.clone(),
                })
                .collect(),
            trivy_reports: account
                .trivy_reports
                .keys()
                .map(|(repo_name, digest, format)| TrivyReportInfo {
                    repo_name: repo_name.clone(),
                    digest: digest.clone(),
                    format: format.clone(),
                })
                .collect(),
        })
    }

    async fn can_setup_account(&self, _account_name: &str) -> KeppelResult<()> {
        Ok(())
    }

    async fn cleanup_account(&self, account_name: &str) -> KeppelResult<()> {
        self.accounts.lock().unwrap().remove(account_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_out_of_order_chunks() {
        let driver = MemoryStorageDriver::new();
        driver
            .append_to_blob("acc", "sid1", 1, None, Bytes::from_static(b"a"))
            .await
            .unwrap();

        let err = driver
            .append_to_blob("acc", "sid1", 3, None, Bytes::from_static(b"b"))
            .await
            .unwrap_err();
        assert!(matches!(err, KeppelError::RangeInvalid(_)));
    }

    #[tokio::test]
    async fn finalize_then_read_roundtrips_bytes() {
        let driver = MemoryStorageDriver::new();
        driver
            .append_to_blob("acc", "sid1", 1, None, Bytes::from_static(b"hello "))
            .await
            .unwrap();
        driver
            .append_to_blob("acc", "sid1", 2, None, Bytes::from_static(b"world"))
            .await
            .unwrap();
        driver.finalize_blob("acc", "sid1", 2).await.unwrap();

        let (mut stream, size) = driver.read_blob("acc", "sid1").await.unwrap();
        assert_eq!(size, 11);
        let mut collected = Vec::new();
        while let Some(chunk) = futures::StreamExt::next(&mut stream).await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"hello world");
    }

    #[tokio::test]
    async fn append_after_finalize_fails() {
        let driver = MemoryStorageDriver::new();
        driver
            .append_to_blob("acc", "sid1", 1, None, Bytes::from_static(b"a"))
            .await
            .unwrap();
        driver.finalize_blob("acc", "sid1", 1).await.unwrap();

        let err = driver
            .append_to_blob("acc", "sid1", 2, None, Bytes::from_static(b"b"))
            .await
            .unwrap_err();
        assert!(matches!(err, KeppelError::Conflict(_)));
    }

    #[tokio::test]
    async fn accounts_are_isolated() {
        let driver = MemoryStorageDriver::new();
        driver
            .write_manifest("acc1", "repo", "sha256:aaa", Bytes::from_static(b"m"))
            .await
            .unwrap();

        assert!(driver.read_manifest("acc2", "repo", "sha256:aaa").await.is_err());
        assert!(driver.read_manifest("acc1", "repo", "sha256:aaa").await.is_ok());
    }
}
