//! Manifest delete (§4.4): removing a manifest removes its row, tags and outgoing edges in one
//! transaction, then re-evaluates whether the blobs and child manifests it referenced are still
//! mounted/referenced anywhere else in the repository (invariant I8) and, if not, schedules them
//! for sweep after a grace period rather than deleting immediately (races with an in-flight
//! finalize or pull must not destroy live content).

use chrono::Duration;

use crate::KeppelResult;

use super::reference::ManifestRef;
use super::Processor;

/// Grace period before an orphaned blob becomes eligible for BlobSweep.
const BLOB_SWEEP_GRACE: Duration = Duration::hours(24);

impl Processor {
    /// Deletes a tag or a whole manifest, per `reference`. Deleting by tag only moves the tag
    /// pointer away (§4.4): the manifest persists as long as anything still references it. Deleting
    /// by digest removes the manifest outright along with every tag pointing at it.
    pub async fn delete_manifest_or_tag(
        &self,
        account_name: &str,
        repository_name: &str,
        reference: &ManifestRef,
    ) -> KeppelResult<()> {
        let Some(repo) = self.db.get_repository(account_name, repository_name).await? else {
            return Ok(());
        };

        let digest = match reference {
            ManifestRef::Tag(name) => {
                self.db.delete_tag(*repo.get_id(), name).await?;
                // Tag-only delete: the manifest remains until nothing references it any more.
                return Ok(());
            }
            ManifestRef::Digest(digest) => digest.clone(),
        };

        if self.db.get_manifest(*repo.get_id(), &digest).await?.is_none() {
            return Ok(());
        }

        let blob_digests = self.db.list_manifest_blob_refs(*repo.get_id(), &digest).await?;

        self.db.delete_manifest(*repo.get_id(), &digest).await?;

        for blob_digest in blob_digests {
            self.reevaluate_blob_mount(account_name, &repo, &blob_digest).await?;
        }
        // An orphaned child manifest (referenced by nobody after this delete) is left for
        // GarbageCollectManifestsJob to evaluate, not reclaimed inline here.

        Ok(())
    }

    /// Re-checks whether a blob is still mounted anywhere meaningful in the repository after a
    /// manifest that referenced it was deleted; if no manifest references it any more, unmounts it
    /// and records it as an orphan candidate for BlobSweep after the grace period.
    async fn reevaluate_blob_mount(
        &self,
        account_name: &str,
        repo: &crate::models::Repository,
        blob_digest: &str,
    ) -> KeppelResult<()> {
        let still_referenced = {
            let rows = count_manifests_referencing_blob(self, *repo.get_id(), blob_digest).await?;
            rows > 0
        };
        if still_referenced {
            return Ok(());
        }

        let Some(blob) = self.db.get_blob(account_name, blob_digest).await? else {
            return Ok(());
        };
        self.db.unmount_blob(*blob.get_id(), *repo.get_id()).await?;

        if self.db.count_blob_mounts(*blob.get_id()).await? == 0 {
            let can_be_deleted_at = chrono::Utc::now() + BLOB_SWEEP_GRACE;
            self.db
                .set_blob_can_be_deleted_at(*blob.get_id(), Some(can_be_deleted_at))
                .await?;
        }
        Ok(())
    }
}

/// Counts how many manifests still in the repository reference `blob_digest`, across every
/// remaining manifest (not just the one just deleted, which is already gone).
async fn count_manifests_referencing_blob(
    processor: &Processor,
    repository_id: i64,
    blob_digest: &str,
) -> KeppelResult<i64> {
    let manifests = processor.db.list_manifests(repository_id).await?;
    let mut count = 0i64;
    for manifest in manifests {
        let refs = processor
            .db
            .list_manifest_blob_refs(repository_id, manifest.get_digest())
            .await?;
        if refs.iter().any(|d| d == blob_digest) {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use sha2::{Digest, Sha256};

    use crate::processor::manifest::DOCKER_MANIFEST_V2;
    use crate::processor::test_support::test_processor;

    use super::*;

    async fn push_single_layer_manifest(
        proc: &Processor,
        account: &str,
        repo: &str,
        tag: &str,
        layer_content: &[u8],
    ) -> String {
        let config_digest = upload_blob(proc, account, repo, b"config").await;
        let layer_digest = upload_blob(proc, account, repo, layer_content).await;
        let content = Bytes::from(format!(
            r#"{{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json",
               "config":{{"digest":"{config_digest}","size":10}},
               "layers":[{{"digest":"{layer_digest}","size":20}}]}}"#
        ));
        let manifest = proc
            .push_manifest(account, "tenant-1", repo, DOCKER_MANIFEST_V2, content, &ManifestRef::Tag(tag.into()), &[])
            .await
            .unwrap();
        manifest.get_digest().clone()
    }

    async fn upload_blob(proc: &Processor, account: &str, repo: &str, content: &[u8]) -> String {
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(content)));
        let upload = proc.start_upload(account, repo).await.unwrap();
        let upload = proc
            .append_chunk(account, *upload.get_repository_id(), *upload.get_uuid(), Bytes::copy_from_slice(content))
            .await
            .unwrap();
        proc.finalize_upload(account, *upload.get_repository_id(), *upload.get_uuid(), None, "application/octet-stream", &digest)
            .await
            .unwrap();
        digest
    }

    #[tokio::test]
    async fn deleting_by_tag_leaves_the_manifest_in_place() {
        let proc = test_processor().await;
        let digest = push_single_layer_manifest(&proc, "acc", "repo", "latest", b"layer-1").await;

        proc.delete_manifest_or_tag("acc", "repo", &ManifestRef::Tag("latest".into())).await.unwrap();

        let repo = proc.db.get_repository("acc", "repo").await.unwrap().unwrap();
        assert!(proc.db.get_manifest(*repo.get_id(), &digest).await.unwrap().is_some());
        assert!(proc.db.get_tag(*repo.get_id(), "latest").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_by_digest_schedules_the_orphaned_blob_for_sweep() {
        let proc = test_processor().await;
        let digest = push_single_layer_manifest(&proc, "acc", "repo", "latest", b"layer-only-here").await;

        proc.delete_manifest_or_tag("acc", "repo", &ManifestRef::Digest(digest.clone())).await.unwrap();

        let repo = proc.db.get_repository("acc", "repo").await.unwrap().unwrap();
        assert!(proc.db.get_manifest(*repo.get_id(), &digest).await.unwrap().is_none());

        let layer_digest = format!("sha256:{}", hex::encode(Sha256::digest(b"layer-only-here")));
        let blob = proc.db.get_blob("acc", &layer_digest).await.unwrap().unwrap();
        assert!(blob.get_can_be_deleted_at().is_some());
    }

    #[tokio::test]
    async fn blob_shared_by_another_manifest_is_not_swept() {
        let proc = test_processor().await;
        // Two manifests in the same repository sharing a layer: deleting one must not schedule
        // the shared layer for sweep.
        let config_a = upload_blob(&proc, "acc", "repo", b"config-a").await;
        let shared_layer = upload_blob(&proc, "acc", "repo", b"shared-layer").await;
        let content_a = Bytes::from(format!(
            r#"{{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json",
               "config":{{"digest":"{config_a}","size":10}},
               "layers":[{{"digest":"{shared_layer}","size":20}}]}}"#
        ));
        let manifest_a = proc
            .push_manifest("acc", "tenant-1", "repo", DOCKER_MANIFEST_V2, content_a, &ManifestRef::Tag("a".into()), &[])
            .await
            .unwrap();

        let config_b = upload_blob(&proc, "acc", "repo", b"config-b").await;
        let content_b = Bytes::from(format!(
            r#"{{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json",
               "config":{{"digest":"{config_b}","size":10}},
               "layers":[{{"digest":"{shared_layer}","size":20}}]}}"#
        ));
        proc.push_manifest("acc", "tenant-1", "repo", DOCKER_MANIFEST_V2, content_b, &ManifestRef::Tag("b".into()), &[])
            .await
            .unwrap();

        proc.delete_manifest_or_tag("acc", "repo", &ManifestRef::Digest(manifest_a.get_digest().clone()))
            .await
            .unwrap();

        let blob = proc.db.get_blob("acc", &shared_layer).await.unwrap().unwrap();
        assert!(blob.get_can_be_deleted_at().is_none());
    }
}
