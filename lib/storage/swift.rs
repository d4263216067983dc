//! Interface-only [`StorageDriver`] stub documenting the OpenStack Swift contract: one container
//! per account, segmented large-object upload for chunked blobs. The real driver body (Swift
//! auth, container provisioning, segment manifests) is out of scope; every method here fails with
//! [`KeppelError::DriverUnsupported`].

use async_trait::async_trait;
use bytes::Bytes;

use crate::storage::{BlobStream, StorageContents, StorageDriver};
use crate::{KeppelError, KeppelResult};

/// Connection parameters a real Swift driver would need: auth URL, project scope, container
/// naming prefix. Held here only so the stub can be constructed and round-tripped through
/// `KEPPEL_DRIVER_STORAGE={"type":"swift",...}` config parsing.
#[derive(Debug, Clone)]
pub struct SwiftStorageDriver {
    /// Keystone auth URL for the Swift endpoint.
    pub auth_url: String,
}

impl SwiftStorageDriver {
    /// Builds a stub driver. Every operation returns
    /// [`KeppelError::DriverUnsupported`](crate::KeppelError::DriverUnsupported).
    pub fn new(auth_url: impl Into<String>) -> Self {
        Self {
            auth_url: auth_url.into(),
        }
    }

    fn unsupported() -> KeppelError {
        KeppelError::DriverUnsupported(
            "swift storage driver body is out of scope; container-per-account with segmented \
             large-object upload is not implemented"
                .into(),
        )
    }
}

#[async_trait]
impl StorageDriver for SwiftStorageDriver {
    async fn append_to_blob(
        &self,
        _account_name: &str,
        _storage_id: &str,
        _chunk_number: u64,
        _size_hint: Option<u64>,
        _chunk: Bytes,
    ) -> KeppelResult<()> {
        Err(Self::unsupported())
    }

    async fn finalize_blob(&self, _account_name: &str, _storage_id: &str, _chunk_count: u64) -> KeppelResult<()> {
        Err(Self::unsupported())
    }

    async fn abort_blob_upload(
        &self,
        _account_name: &str,
        _storage_id: &str,
        _chunk_count: u64,
    ) -> KeppelResult<()> {
        Err(Self::unsupported())
    }

    async fn read_blob(&self, _account_name: &str, _storage_id: &str) -> KeppelResult<(BlobStream, u64)> {
        Err(Self::unsupported())
    }

    async fn url_for_blob(&self, _account_name: &str, _storage_id: &str) -> KeppelResult<String> {
        Err(Self::unsupported())
    }

    async fn delete_blob(&self, _account_name: &str, _storage_id: &str) -> KeppelResult<()> {
        Err(Self::unsupported())
    }

    async fn read_manifest(&self, _account_name: &str, _repo_name: &str, _digest: &str) -> KeppelResult<Bytes> {
        Err(Self::unsupported())
    }

    async fn write_manifest(
        &self,
        _account_name: &str,
        _repo_name: &str,
        _digest: &str,
        _content: Bytes,
    ) -> KeppelResult<()> {
        Err(Self::unsupported())
    }

    async fn delete_manifest(&self, _account_name: &str, _repo_name: &str, _digest: &str) -> KeppelResult<()> {
        Err(Self::unsupported())
    }

    async fn read_trivy_report(
        &self,
        _account_name: &str,
        _repo_name: &str,
        _digest: &str,
        _format: &str,
    ) -> KeppelResult<Bytes> {
        Err(Self::unsupported())
    }

    async fn write_trivy_report(
        &self,
        _account_name: &str,
        _repo_name: &str,
        _digest: &str,
        _format: &str,
        _content: Bytes,
    ) -> KeppelResult<()> {
        Err(Self::unsupported())
    }

    async fn delete_trivy_report(
        &self,
        _account_name: &str,
        _repo_name: &str,
        _digest: &str,
        _format: &str,
    ) -> KeppelResult<()> {
        Err(Self::unsupported())
    }

    async fn list_storage_contents(&self, _account_name: &str) -> KeppelResult<StorageContents> {
        Err(Self::unsupported())
    }

    async fn can_setup_account(&self, _account_name: &str) -> KeppelResult<()> {
        Err(Self::unsupported())
    }

    async fn cleanup_account(&self, _account_name: &str) -> KeppelResult<()> {
        Err(Self::unsupported())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_method_reports_unsupported() {
        let driver = SwiftStorageDriver::new("https://auth.example.com");
        let err = driver.can_setup_account("acc").await.unwrap_err();
        assert!(matches!(err, KeppelError::DriverUnsupported(_)));
    }
}
