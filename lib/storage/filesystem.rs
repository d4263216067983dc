//! Real but intentionally minimal POSIX-filesystem [`StorageDriver`]: one subdirectory per
//! account under a configured root. Exists so the crate runs end-to-end without an object-storage
//! dependency; not hardened against concurrent external mutation of its directory tree.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::storage::{BlobInfo, BlobStream, ManifestInfo, StorageContents, StorageDriver, TrivyReportInfo};
use crate::{KeppelError, KeppelResult};

/// A filesystem-backed [`StorageDriver`] rooted at a configured directory.
#[derive(Debug, Clone)]
pub struct FilesystemStorageDriver {
    root: PathBuf,
}

impl FilesystemStorageDriver {
    /// Builds a driver rooted at `root`, which is created on first use if absent.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn account_dir(&self, account_name: &str) -> PathBuf {
        self.root.join(account_name)
    }

    fn blob_path(&self, account_name: &str, storage_id: &str) -> PathBuf {
        self.account_dir(account_name).join("blobs").join(storage_id)
    }

    fn upload_path(&self, account_name: &str, storage_id: &str) -> PathBuf {
        self.account_dir(account_name)
            .join("uploads")
            .join(storage_id)
    }

    fn manifest_path(&self, account_name: &str, repo_name: &str, digest: &str) -> PathBuf {
        self.account_dir(account_name)
            .join("manifests")
            .join(repo_name)
            .join(sanitize_digest(digest))
    }

    fn trivy_path(&self, account_name: &str, repo_name: &str, digest: &str, format: &str) -> PathBuf {
        self.account_dir(account_name)
            .join("trivy")
            .join(repo_name)
            .join(format!("{}.{format}", sanitize_digest(digest)))
    }

    async fn ensure_parent(path: &Path) -> KeppelResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

/// Replaces `:` (illegal in some filesystems) in a digest like `sha256:abcd...` with `_`.
fn sanitize_digest(digest: &str) -> String {
    digest.replace(':', "_")
}

#[async_trait]
impl StorageDriver for FilesystemStorageDriver {
    async fn append_to_blob(
        &self,
        account_name: &str,
        storage_id: &str,
        chunk_number: u64,
        _size_hint: Option<u64>,
        chunk: Bytes,
    ) -> KeppelResult<()> {
        if self.blob_path(account_name, storage_id).exists() {
            return Err(KeppelError::Conflict("append-after-finalize".into()));
        }

        let upload_path = self.upload_path(account_name, storage_id);
        let marker_path = upload_path.with_extension("chunk");
        Self::ensure_parent(&upload_path).await?;

        let last_chunk: u64 = match fs::read_to_string(&marker_path).await {
            Ok(text) => text.trim().parse().unwrap_or(0),
            Err(_) => 0,
        };

        if chunk_number != last_chunk + 1 {
            return Err(KeppelError::RangeInvalid(format!("expected chunk {}", last_chunk + 1)));
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&upload_path)
            .await?;
        file.write_all(&chunk).await?;
        fs::write(&marker_path, chunk_number.to_string()).await?;
        Ok(())
    }

    async fn finalize_blob(
        &self,
        account_name: &str,
        storage_id: &str,
        _chunk_count: u64,
    ) -> KeppelResult<()> {
        let blob_path = self.blob_path(account_name, storage_id);
        if blob_path.exists() {
            return Ok(()); // idempotent
        }

        let upload_path = self.upload_path(account_name, storage_id);
        Self::ensure_parent(&blob_path).await?;
        fs::rename(&upload_path, &blob_path).await?;
        let _ = fs::remove_file(upload_path.with_extension("chunk")).await;
        Ok(())
    }

    async fn abort_blob_upload(
        &self,
        account_name: &str,
        storage_id: &str,
        _chunk_count: u64,
    ) -> KeppelResult<()> {
        if self.blob_path(account_name, storage_id).exists() {
            return Err(KeppelError::Conflict("already finalized".into()));
        }

        let upload_path = self.upload_path(account_name, storage_id);
        let _ = fs::remove_file(&upload_path).await;
        let _ = fs::remove_file(upload_path.with_extension("chunk")).await;
        Ok(())
    }

    async fn read_blob(&self, account_name: &str, storage_id: &str) -> KeppelResult<(BlobStream, u64)> {
        let path = self.blob_path(account_name, storage_id);
        let metadata = fs::metadata(&path)
            .await
            .map_err(|_| KeppelError::NotFound(format!("blob {storage_id:?}")))?;
        let file = fs::File::open(&path).await?;
        let stream = ReaderStream::new(file).map(|r| r.map_err(KeppelError::from));
        Ok((Box::pin(stream), metadata.len()))
    }

    async fn url_for_blob(&self, _account_name: &str, _storage_id: &str) -> KeppelResult<String> {
        Err(KeppelError::NotImplemented(
            "filesystem driver has no direct URLs".into(),
        ))
    }

    async fn delete_blob(&self, account_name: &str, storage_id: &str) -> KeppelResult<()> {
        fs::remove_file(self.blob_path(account_name, storage_id))
            .await
            .map_err(|_| KeppelError::NotFound(format!("blob {storage_id:?}")))
    }

    async fn read_manifest(&self, account_name: &str, repo_name: &str, digest: &str) -> KeppelResult<Bytes> {
        let path = self.manifest_path(account_name, repo_name, digest);
        fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|_| KeppelError::NotFound(format!("manifest {repo_name}@{digest}")))
    }

    async fn write_manifest(
        &self,
        account_name: &str,
        repo_name: &str,
        digest: &str,
        content: Bytes,
    ) -> KeppelResult<()> {
        let path = self.manifest_path(account_name, repo_name, digest);
        Self::ensure_parent(&path).await?;
        fs::write(&path, content).await?;
        Ok(())
    }

    async fn delete_manifest(&self, account_name: &str, repo_name: &str, digest: &str) -> KeppelResult<()> {
        let _ = fs::remove_file(self.manifest_path(account_name, repo_name, digest)).await;
        Ok(())
    }

    async fn read_trivy_report(
        &self,
        account_name: &str,
        repo_name: &str,
        digest: &str,
        format: &str,
    ) -> KeppelResult<Bytes> {
        let path = self.trivy_path(account_name, repo_name, digest, format);
        fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|_| KeppelError::NotFound(format!("trivy report {repo_name}@{digest} ({format})")))
    }

    async fn write_trivy_report(
        &self,
        account_name: &str,
        repo_name: &str,
        digest: &str,
        format: &str,
        content: Bytes,
    ) -> KeppelResult<()> {
        let path = self.trivy_path(account_name, repo_name, digest, format);
        Self::ensure_parent(&path).await?;
        fs::write(&path, content).await?;
        Ok(())
    }

    async fn delete_trivy_report(
        &self,
        account_name: &str,
        repo_name: &str,
        digest: &str,
        format: &str,
    ) -> KeppelResult<()> {
        let _ = fs::remove_file(self.trivy_path(account_name, repo_name, digest, format)).await;
        Ok(())
    }

    async fn list_storage_contents(&self, account_name: &str) -> KeppelResult<StorageContents> {
        let mut contents = StorageContents::default();
        let account_dir = self.account_dir(account_name);
        if !account_dir.exists() {
            return Ok(contents);
        }

        let blobs_dir = account_dir.join("blobs");
        if let Ok(mut entries) = fs::read_dir(&blobs_dir).await {
            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                contents.blobs.push(BlobInfo {
                    storage_id: entry.file_name().to_string_lossy().into_owned(),
                    size_bytes: metadata.len() as i64,
                });
            }
        }

        let manifests_dir = account_dir.join("manifests");
        if let Ok(mut repos) = fs::read_dir(&manifests_dir).await {
            while let Some(repo_entry) = repos.next_entry().await? {
                let repo_name = repo_entry.file_name().to_string_lossy().into_owned();
                let mut digests = fs::read_dir(repo_entry.path()).await?;
                while let Some(digest_entry) = digests.next_entry().await? {
                    let digest = digest_entry.file_name().to_string_lossy().replace('_', ":");
                    contents.manifests.push(ManifestInfo {
                        repo_name: repo_name.clone(),
                        digest,
                    });
                }
            }
        }

        let trivy_dir = account_dir.join("trivy");
        if let Ok(mut repos) = fs::read_dir(&trivy_dir).await {
            while let Some(repo_entry) = repos.next_entry().await? {
                let repo_name = repo_entry.file_name().to_string_lossy().into_owned();
                let mut files = fs::read_dir(repo_entry.path()).await?;
                while let Some(file_entry) = files.next_entry().await? {
                    let file_name = file_entry.file_name().to_string_lossy().into_owned();
                    if let Some((digest_part, format)) = file_name.rsplit_once('.') {
                        contents.trivy_reports.push(TrivyReportInfo {
                            repo_name: repo_name.clone(),
                            digest: digest_part.replace('_', ":"),
                            format: format.to_string(),
                        });
                    }
                }
            }
        }

        Ok(contents)
    }

    async fn can_setup_account(&self, account_name: &str) -> KeppelResult<()> {
        fs::create_dir_all(self.account_dir(account_name)).await?;
        Ok(())
    }

    async fn cleanup_account(&self, account_name: &str) -> KeppelResult<()> {
        let dir = self.account_dir(account_name);
        if dir.exists() {
            fs::remove_dir_all(dir).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn appends_finalizes_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FilesystemStorageDriver::new(dir.path());

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
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"hello world");
    }

    #[tokio::test]
    async fn manifest_roundtrips_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FilesystemStorageDriver::new(dir.path());
        driver
            .write_manifest("acc", "repo", "sha256:abc", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        let content = driver.read_manifest("acc", "repo", "sha256:abc").await.unwrap();
        assert_eq!(content, Bytes::from_static(b"{}"));

        let contents = driver.list_storage_contents("acc").await.unwrap();
        assert_eq!(contents.manifests.len(), 1);
        assert_eq!(contents.manifests[0].digest, "sha256:abc");
    }

    #[tokio::test]
    async fn cleanup_account_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FilesystemStorageDriver::new(dir.path());
        driver
            .write_manifest("acc", "repo", "sha256:abc", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        driver.cleanup_account("acc").await.unwrap();
        assert!(driver.read_manifest("acc", "repo", "sha256:abc").await.is_err());
    }
}
