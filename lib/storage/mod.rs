//! Storage driver (SD): the pluggable, account-scoped object store for blob bytes, manifest
//! bytes, and Trivy report payloads (§4.1). Metadata about these objects lives in [`crate::db`];
//! the SD only ever deals in opaque bytes addressed by storage id, digest, or format.

pub mod filesystem;
pub mod memory;
pub mod swift;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::config::DriverConfig;
use crate::{KeppelError, KeppelResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A blob byte stream as read back from storage, paired with its exact size.
pub type BlobStream = BoxStream<'static, KeppelResult<Bytes>>;

/// One object a [`StorageDriver`] physically holds for an account, as reported by
/// [`StorageDriver::list_storage_contents`]; diffed against the DB by StorageSweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    /// The opaque storage id the blob was uploaded under.
    pub storage_id: String,
    /// Exact byte size of the stored object.
    pub size_bytes: i64,
}

/// A manifest object a driver physically holds, as reported by `list_storage_contents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestInfo {
    /// The owning repository's name (account-relative).
    pub repo_name: String,
    /// The manifest's content digest.
    pub digest: String,
}

/// A Trivy report object a driver physically holds, as reported by `list_storage_contents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrivyReportInfo {
    /// The owning repository's name (account-relative).
    pub repo_name: String,
    /// The scanned manifest's content digest.
    pub digest: String,
    /// The report's serialization format (e.g. `"json"`).
    pub format: String,
}

/// Everything a driver physically holds for one account, for diffing against the metadata store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageContents {
    /// Blob objects present in storage.
    pub blobs: Vec<BlobInfo>,
    /// Manifest objects present in storage.
    pub manifests: Vec<ManifestInfo>,
    /// Trivy report objects present in storage.
    pub trivy_reports: Vec<TrivyReportInfo>,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The pluggable content store behind an account. Every operation is scoped to a single account
/// name; drivers must treat distinct accounts as fully isolated (distinct Swift container,
/// filesystem subtree, or in-memory namespace).
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Appends one chunk to an in-progress blob upload. `chunk_number` starts at 1 and must
    /// increase strictly by one per call; reordering must fail with
    /// [`KeppelError::RangeInvalid`](crate::KeppelError::RangeInvalid). Appending after
    /// [`finalize_blob`](StorageDriver::finalize_blob) must fail the same way.
    async fn append_to_blob(
        &self,
        account_name: &str,
        storage_id: &str,
        chunk_number: u64,
        size_hint: Option<u64>,
        chunk: Bytes,
    ) -> KeppelResult<()>;

    /// Finalizes a blob upload, making it readable. Idempotent per storage id.
    async fn finalize_blob(
        &self,
        account_name: &str,
        storage_id: &str,
        chunk_count: u64,
    ) -> KeppelResult<()>;

    /// Discards an in-progress upload's chunks. Fails if already finalized.
    async fn abort_blob_upload(
        &self,
        account_name: &str,
        storage_id: &str,
        chunk_count: u64,
    ) -> KeppelResult<()>;

    /// Reads a finalized blob's full contents as a stream, with its exact size.
    async fn read_blob(
        &self,
        account_name: &str,
        storage_id: &str,
    ) -> KeppelResult<(BlobStream, u64)>;

    /// Returns a pre-authenticated URL for a blob, if the driver supports direct URLs. Callers
    /// must fall back to [`read_blob`](StorageDriver::read_blob) on
    /// [`KeppelError::NotImplemented`](crate::KeppelError::NotImplemented).
    async fn url_for_blob(&self, account_name: &str, storage_id: &str) -> KeppelResult<String>;

    /// Deletes a finalized blob. Fails with
    /// [`KeppelError::NotFound`](crate::KeppelError::NotFound) if absent.
    async fn delete_blob(&self, account_name: &str, storage_id: &str) -> KeppelResult<()>;

    /// Reads a manifest's raw bytes.
    async fn read_manifest(
        &self,
        account_name: &str,
        repo_name: &str,
        digest: &str,
    ) -> KeppelResult<Bytes>;

    /// Writes (replacing whole-object) a manifest's raw bytes. Digests are not re-validated here.
    async fn write_manifest(
        &self,
        account_name: &str,
        repo_name: &str,
        digest: &str,
        content: Bytes,
    ) -> KeppelResult<()>;

    /// Deletes a manifest's raw bytes.
    async fn delete_manifest(
        &self,
        account_name: &str,
        repo_name: &str,
        digest: &str,
    ) -> KeppelResult<()>;

    /// Reads a Trivy report payload.
    async fn read_trivy_report(
        &self,
        account_name: &str,
        repo_name: &str,
        digest: &str,
        format: &str,
    ) -> KeppelResult<Bytes>;

    /// Writes a Trivy report payload.
    async fn write_trivy_report(
        &self,
        account_name: &str,
        repo_name: &str,
        digest: &str,
        format: &str,
        content: Bytes,
    ) -> KeppelResult<()>;

    /// Deletes a Trivy report payload.
    async fn delete_trivy_report(
        &self,
        account_name: &str,
        repo_name: &str,
        digest: &str,
        format: &str,
    ) -> KeppelResult<()>;

    /// Enumerates everything physically held for an account, for StorageSweep to diff against
    /// the metadata store.
    async fn list_storage_contents(&self, account_name: &str) -> KeppelResult<StorageContents>;

    /// Preflight check for account creation: can this driver actually provision storage for
    /// `account_name` (permissions, container existence)?
    async fn can_setup_account(&self, account_name: &str) -> KeppelResult<()>;

    /// Best-effort removal of every object belonging to an account.
    async fn cleanup_account(&self, account_name: &str) -> KeppelResult<()>;
}

/// Drains a [`BlobStream`] into a single contiguous buffer, for callers (manifest/config
/// inspection, upstream replication) that need the whole object in memory rather than streamed.
pub async fn collect_stream(mut stream: BlobStream) -> KeppelResult<Vec<u8>> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.to_vec())
}

/// Builds the configured [`StorageDriver`] from a `KEPPEL_DRIVER_STORAGE` config blob.
pub fn build(config: &DriverConfig) -> KeppelResult<Box<dyn StorageDriver>> {
    match config.driver_type.as_str() {
        "in-memory" => Ok(Box::new(memory::MemoryStorageDriver::new())),
        "filesystem" => {
            let root = config
                .params
                .get("root")
                .and_then(|v| v.as_str())
                .ok_or_else(|| KeppelError::InvalidArgument("filesystem driver requires params.root".into()))?;
            Ok(Box::new(filesystem::FilesystemStorageDriver::new(root)))
        }
        "swift" => {
            let auth_url = config
                .params
                .get("auth_url")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Ok(Box::new(swift::SwiftStorageDriver::new(auth_url)))
        }
        other => Err(KeppelError::DriverUnsupported(format!(
            "unknown storage driver type {other:?}"
        ))),
    }
}
