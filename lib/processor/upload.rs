//! The blob-upload state machine (§4.4): `Initialized` -> `Finalized`/`Aborted`, plus the
//! cross-repository mount shortcut that lets an already-present blob become visible in a second
//! repository without copying bytes.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Blob, Upload};
use crate::{KeppelError, KeppelResult};

use super::Processor;

/// What finalizing an upload produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The blob was finalized and is now readable.
    Finalized(Blob),
    /// A blob with this digest already existed in the account; its existing row was reused and
    /// the duplicate upload's storage was discarded.
    AlreadyExists(Blob),
}

impl Processor {
    /// Starts a new, empty upload (`POST /v2/{repo}/blobs/uploads/`).
    pub async fn start_upload(&self, account_name: &str, repository_name: &str) -> KeppelResult<Upload> {
        let repo = self.get_or_create_repository(account_name, repository_name).await?;
        let storage_id = Uuid::new_v4().to_string();
        let upload = Upload::new(*repo.get_id(), &storage_id);
        self.db.insert_upload(&upload).await?;
        Ok(upload)
    }

    /// Appends one chunk to an in-progress upload (`PATCH /uploads/{uuid}`). `chunk_number` must
    /// be `upload.num_chunks + 1`; anything else is a [`KeppelError::RangeInvalid`].
    pub async fn append_chunk(
        &self,
        account_name: &str,
        repository_id: i64,
        uuid: Uuid,
        chunk: Bytes,
    ) -> KeppelResult<Upload> {
        let upload = self
            .db
            .get_upload(repository_id, uuid)
            .await?
            .ok_or_else(|| KeppelError::NotFound(format!("upload {uuid}")))?;

        let chunk_number = *upload.get_num_chunks() as u64 + 1;
        let new_digest = self.advance_running_digest(repository_id, uuid, &upload, &chunk).await;

        self.storage
            .append_to_blob(account_name, upload.get_storage_id(), chunk_number, None, chunk.clone())
            .await?;

        let new_size = upload.get_size_bytes() + chunk.len() as i64;
        let advanced = self
            .db
            .advance_upload(repository_id, uuid, *upload.get_num_chunks(), new_size, &new_digest)
            .await?;
        if !advanced {
            return Err(KeppelError::Conflict(format!(
                "upload {uuid} was concurrently advanced past chunk {chunk_number}"
            )));
        }

        self.db
            .get_upload(repository_id, uuid)
            .await?
            .ok_or_else(|| KeppelError::NotFound(format!("upload {uuid}")))
    }

    /// Finalizes an upload (`PUT /uploads/{uuid}?digest=D`), verifying the running digest (plus
    /// an optional final chunk in the request body) matches `expected_digest` before making the
    /// blob readable. On mismatch the upload is aborted, per §4.4.
    pub async fn finalize_upload(
        &self,
        account_name: &str,
        repository_id: i64,
        uuid: Uuid,
        final_chunk: Option<Bytes>,
        media_type: &str,
        expected_digest: &str,
    ) -> KeppelResult<UploadOutcome> {
        let upload = self
            .db
            .get_upload(repository_id, uuid)
            .await?
            .ok_or_else(|| KeppelError::NotFound(format!("upload {uuid}")))?;

        let mut size_bytes = *upload.get_size_bytes();
        let mut chunk_count = *upload.get_num_chunks() as u64;
        let mut digest = upload.get_digest().clone();

        if let Some(chunk) = final_chunk {
            chunk_count += 1;
            digest = self.advance_running_digest(repository_id, uuid, &upload, &chunk).await;
            size_bytes += chunk.len() as i64;
            self.storage
                .append_to_blob(account_name, upload.get_storage_id(), chunk_count, None, chunk)
                .await?;
        }

        if digest != expected_digest {
            self.abort_upload(account_name, repository_id, uuid).await?;
            return Err(KeppelError::DigestMismatch(format!(
                "computed digest {digest} does not match declared digest {expected_digest}"
            )));
        }

        if let Some(existing) = self.db.get_blob(account_name, expected_digest).await? {
            // The bytes are already present under another upload; discard this one's storage.
            self.storage
                .abort_blob_upload(account_name, upload.get_storage_id(), chunk_count)
                .await
                .ok();
            self.db.delete_upload(repository_id, uuid).await?;
            self.mount_existing_blob(&existing, repository_id).await?;
            return Ok(UploadOutcome::AlreadyExists(existing));
        }

        self.storage
            .finalize_blob(account_name, upload.get_storage_id(), chunk_count)
            .await?;

        let blob = Blob::new(account_name, expected_digest, size_bytes, upload.get_storage_id(), media_type);
        let blob = self.db.insert_blob(&blob).await?;
        self.db.mount_blob(*blob.get_id(), repository_id).await?;
        self.db.delete_upload(repository_id, uuid).await?;
        self.forget_running_digest(repository_id, uuid).await;

        Ok(UploadOutcome::Finalized(blob))
    }

    /// Aborts an in-progress upload (`DELETE /uploads/{uuid}`), purging its chunks.
    pub async fn abort_upload(
        &self,
        account_name: &str,
        repository_id: i64,
        uuid: Uuid,
    ) -> KeppelResult<()> {
        let upload = self
            .db
            .get_upload(repository_id, uuid)
            .await?
            .ok_or_else(|| KeppelError::NotFound(format!("upload {uuid}")))?;

        self.storage
            .abort_blob_upload(account_name, upload.get_storage_id(), *upload.get_num_chunks() as u64)
            .await
            .or_else(|e| if e.kind() == crate::ErrorKind::NotFound { Ok(()) } else { Err(e) })?;
        self.db.delete_upload(repository_id, uuid).await?;
        self.forget_running_digest(repository_id, uuid).await;
        Ok(())
    }

    /// `POST /v2/{repo}/blobs/uploads/?mount=D&from=R`: makes a blob already present in `from`
    /// visible in `repository_name` without copying bytes, provided the caller can pull from
    /// `from` and the blob is actually mounted there.
    pub async fn mount_blob(
        &self,
        account_name: &str,
        repository_name: &str,
        from_repository_name: &str,
        digest: &str,
        can_pull_from_source: bool,
    ) -> KeppelResult<Option<Blob>> {
        if !can_pull_from_source {
            return Err(KeppelError::Denied(format!(
                "no pull rights on source repository {from_repository_name:?}"
            )));
        }

        let Some(blob) = self.db.get_blob(account_name, digest).await? else {
            return Ok(None);
        };

        let Some(source_repo) = self.db.get_repository(account_name, from_repository_name).await? else {
            return Ok(None);
        };
        if !self.db.is_blob_mounted(*blob.get_id(), *source_repo.get_id()).await? {
            return Ok(None);
        }

        let target_repo = self.get_or_create_repository(account_name, repository_name).await?;
        self.mount_existing_blob(&blob, *target_repo.get_id()).await?;
        Ok(Some(blob))
    }

    async fn mount_existing_blob(&self, blob: &Blob, repository_id: i64) -> KeppelResult<()> {
        self.db.mount_blob(*blob.get_id(), repository_id).await?;
        // Gaining a mount means the blob is no longer an orphan; clear any pending sweep.
        if blob.get_can_be_deleted_at().is_some() {
            self.db.set_blob_can_be_deleted_at(*blob.get_id(), None).await?;
        }
        Ok(())
    }

    /// Updates (or bootstraps) the in-memory running hasher for an upload and returns its new hex
    /// digest. See [`RunningHashers`](super::RunningHashers) for why this lives in memory rather
    /// than being literally resumed from the persisted digest.
    async fn advance_running_digest(
        &self,
        repository_id: i64,
        uuid: Uuid,
        upload: &Upload,
        chunk: &Bytes,
    ) -> String {
        let mut hashers = self.running_hashers.lock().await;
        let hasher = hashers
            .entry((repository_id, uuid))
            .or_insert_with(|| bootstrap_hasher(upload));
        hasher.update(chunk);
        hex::encode(hasher.clone().finalize())
    }

    async fn forget_running_digest(&self, repository_id: i64, uuid: Uuid) {
        self.running_hashers.lock().await.remove(&(repository_id, uuid));
    }
}

/// A fresh upload's running digest is the sha256 of zero bytes; a hasher bootstrapped for an
/// upload that already had chunks (e.g. after a process restart) simply starts counting again
/// from this point, per the limitation documented on [`RunningHashers`](super::RunningHashers).
fn bootstrap_hasher(_upload: &Upload) -> Sha256 {
    Sha256::new()
}

#[cfg(test)]
mod tests {
    use crate::processor::test_support::test_processor;

    use super::*;

    fn digest_of(content: &[u8]) -> String {
        format!("sha256:{}", hex::encode(Sha256::digest(content)))
    }

    #[tokio::test]
    async fn uploads_a_blob_end_to_end() {
        let proc = test_processor().await;
        let upload = proc.start_upload("acc", "repo").await.unwrap();

        let content = Bytes::from_static(b"hello world");
        let digest = digest_of(&content);

        let upload = proc
            .append_chunk("acc", *upload.get_repository_id(), *upload.get_uuid(), content.clone())
            .await
            .unwrap();

        let outcome = proc
            .finalize_upload("acc", *upload.get_repository_id(), *upload.get_uuid(), None, "application/octet-stream", &digest)
            .await
            .unwrap();

        match outcome {
            UploadOutcome::Finalized(blob) => {
                assert_eq!(blob.get_digest(), &digest);
                assert_eq!(*blob.get_size_bytes(), content.len() as i64);
            }
            UploadOutcome::AlreadyExists(_) => panic!("expected a fresh blob"),
        }
    }

    #[tokio::test]
    async fn finalize_rejects_digest_mismatch_and_aborts() {
        let proc = test_processor().await;
        let upload = proc.start_upload("acc", "repo").await.unwrap();
        let content = Bytes::from_static(b"hello world");

        let upload = proc
            .append_chunk("acc", *upload.get_repository_id(), *upload.get_uuid(), content)
            .await
            .unwrap();

        let err = proc
            .finalize_upload(
                "acc",
                *upload.get_repository_id(),
                *upload.get_uuid(),
                None,
                "application/octet-stream",
                "sha256:0000000000000000000000000000000000000000000000000000000000000",
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DigestMismatch);

        // The upload row is gone; finalizing again must report it as not found, not re-abort it.
        let err = proc
            .finalize_upload("acc", *upload.get_repository_id(), *upload.get_uuid(), None, "application/octet-stream", "sha256:anything")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn second_upload_of_same_bytes_reuses_the_blob() {
        let proc = test_processor().await;
        let content = Bytes::from_static(b"shared layer");
        let digest = digest_of(&content);

        let first = proc.start_upload("acc", "repo-a").await.unwrap();
        let first = proc
            .append_chunk("acc", *first.get_repository_id(), *first.get_uuid(), content.clone())
            .await
            .unwrap();
        proc.finalize_upload("acc", *first.get_repository_id(), *first.get_uuid(), None, "application/octet-stream", &digest)
            .await
            .unwrap();

        let second = proc.start_upload("acc", "repo-b").await.unwrap();
        let second = proc
            .append_chunk("acc", *second.get_repository_id(), *second.get_uuid(), content)
            .await
            .unwrap();
        let outcome = proc
            .finalize_upload("acc", *second.get_repository_id(), *second.get_uuid(), None, "application/octet-stream", &digest)
            .await
            .unwrap();
        assert!(matches!(outcome, UploadOutcome::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn mount_requires_pull_rights_on_source() {
        let proc = test_processor().await;
        let content = Bytes::from_static(b"mountable");
        let digest = digest_of(&content);

        let upload = proc.start_upload("acc", "source-repo").await.unwrap();
        let upload = proc
            .append_chunk("acc", *upload.get_repository_id(), *upload.get_uuid(), content)
            .await
            .unwrap();
        proc.finalize_upload("acc", *upload.get_repository_id(), *upload.get_uuid(), None, "application/octet-stream", &digest)
            .await
            .unwrap();

        let err = proc
            .mount_blob("acc", "target-repo", "source-repo", &digest, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Denied);

        let mounted = proc
            .mount_blob("acc", "target-repo", "source-repo", &digest, true)
            .await
            .unwrap();
        assert!(mounted.is_some());
    }

    #[tokio::test]
    async fn abort_discards_an_in_progress_upload() {
        let proc = test_processor().await;
        let upload = proc.start_upload("acc", "repo").await.unwrap();
        let upload = proc
            .append_chunk("acc", *upload.get_repository_id(), *upload.get_uuid(), Bytes::from_static(b"partial"))
            .await
            .unwrap();

        proc.abort_upload("acc", *upload.get_repository_id(), *upload.get_uuid()).await.unwrap();

        let err = proc
            .append_chunk("acc", *upload.get_repository_id(), *upload.get_uuid(), Bytes::from_static(b"more"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }
}
