//! Manifest push (§4.4): parse by declared media type, verify every referenced blob/manifest is
//! already present in the repository, enforce the tenant's manifest quota, then persist the
//! content, metadata and edge rows in one transaction before writing the bytes to storage.

use bytes::Bytes;
use sha2::{Digest as _, Sha256};

use crate::db::ManifestInsertOutcome;
use crate::models::{Manifest, ManifestBlobRef, ManifestManifestRef, Tag};
use crate::{KeppelError, KeppelResult};

use super::reference::ManifestRef;
use super::{parse_manifest, Processor};

impl Processor {
    /// Pushes a manifest to `repository_name` under `reference` (a tag name, or the manifest's
    /// own digest for a digest-addressed push), enforcing the account's `required_labels` policy
    /// and the owning tenant's manifest-count quota.
    pub async fn push_manifest(
        &self,
        account_name: &str,
        auth_tenant_id: &str,
        repository_name: &str,
        media_type: &str,
        content: Bytes,
        reference: &ManifestRef,
        required_labels: &[String],
    ) -> KeppelResult<Manifest> {
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(&content)));
        if let ManifestRef::Digest(declared) = reference {
            if declared != &digest {
                return Err(KeppelError::DigestMismatch(format!(
                    "computed digest {digest} does not match declared digest {declared}"
                )));
            }
        }

        let repo = self.get_or_create_repository(account_name, repository_name).await?;
        let parsed = parse_manifest(media_type, &content)?;

        for blob_digest in &parsed.blob_digests {
            let Some(blob) = self.db.get_blob(account_name, blob_digest).await? else {
                return Err(KeppelError::ManifestBlobUnknown(format!(
                    "blob {blob_digest} is not present in account {account_name:?}"
                )));
            };
            if !self.db.is_blob_mounted(*blob.get_id(), *repo.get_id()).await? {
                return Err(KeppelError::ManifestBlobUnknown(format!(
                    "blob {blob_digest} is not mounted in repository {repository_name:?}"
                )));
            }
        }
        for manifest_digest in &parsed.manifest_digests {
            if self.db.get_manifest(*repo.get_id(), manifest_digest).await?.is_none() {
                return Err(KeppelError::ManifestInvalid(format!(
                    "referenced manifest {manifest_digest} is not present in repository {repository_name:?}"
                )));
            }
        }

        if !required_labels.is_empty() {
            self.check_required_labels(account_name, &parsed, required_labels).await?;
        }

        let mut manifest = Manifest::new(*repo.get_id(), &digest, media_type, content.len() as i64);
        manifest.set_subject_digest(parsed.subject_digest.clone());
        manifest.set_artifact_type(parsed.artifact_type.clone());

        let blob_refs: Vec<ManifestBlobRef> = parsed
            .blob_digests
            .iter()
            .map(|blob_digest| ManifestBlobRef {
                repository_id: *repo.get_id(),
                parent_digest: digest.clone(),
                blob_digest: blob_digest.clone(),
            })
            .collect();
        let manifest_refs: Vec<ManifestManifestRef> = parsed
            .manifest_digests
            .iter()
            .map(|child_digest| ManifestManifestRef {
                repository_id: *repo.get_id(),
                parent_digest: digest.clone(),
                child_digest: child_digest.clone(),
            })
            .collect();

        let outcome = self
            .db
            .insert_manifest_with_quota_check(auth_tenant_id, &manifest, &content, &blob_refs, &manifest_refs)
            .await?;
        if outcome == ManifestInsertOutcome::Inserted {
            self.storage
                .write_manifest(account_name, repository_name, &digest, content)
                .await?;
        }

        if let ManifestRef::Tag(name) = reference {
            self.db.upsert_tag(&Tag::new(*repo.get_id(), name, &digest)).await?;
        }

        self.db
            .get_manifest(*repo.get_id(), &digest)
            .await?
            .ok_or_else(|| KeppelError::InvariantViolated(format!("manifest {digest} vanished after insert")))
    }

    /// Opaque required-labels check: every label named in `required_labels` must be present on
    /// the manifest's image config (§4.4; full RBAC/GC/security-scan/tag policy evaluation is out
    /// of core scope).
    async fn check_required_labels(
        &self,
        account_name: &str,
        parsed: &super::ParsedManifest,
        required_labels: &[String],
    ) -> KeppelResult<()> {
        let Some(config_digest) = parsed.blob_digests.first() else {
            return Ok(());
        };
        let Some(config_blob) = self.db.get_blob(account_name, config_digest).await? else {
            return Ok(());
        };
        let (stream, _) = self.storage.read_blob(account_name, config_blob.get_storage_id()).await?;
        let content = crate::storage::collect_stream(stream).await?;
        let labels = super::manifest::extract_labels(&content)?;

        for required in required_labels {
            if !labels.contains_key(required) {
                return Err(KeppelError::PolicyViolation(format!(
                    "manifest is missing required label {required:?}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::models::Quotas;
    use crate::processor::test_support::test_processor;

    use super::*;

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

    fn docker_manifest(config_digest: &str, layer_digest: &str) -> Bytes {
        Bytes::from(format!(
            r#"{{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json",
               "config":{{"digest":"{config_digest}","size":10}},
               "layers":[{{"digest":"{layer_digest}","size":20}}]}}"#
        ))
    }

    #[tokio::test]
    async fn pushes_a_manifest_by_tag() {
        let proc = test_processor().await;
        let config_digest = upload_blob(&proc, "acc", "repo", b"config-bytes").await;
        let layer_digest = upload_blob(&proc, "acc", "repo", b"layer-bytes").await;
        let content = docker_manifest(&config_digest, &layer_digest);

        let manifest = proc
            .push_manifest(
                "acc",
                "tenant-1",
                "repo",
                super::super::manifest::DOCKER_MANIFEST_V2,
                content,
                &ManifestRef::Tag("latest".into()),
                &[],
            )
            .await
            .unwrap();

        assert_eq!(manifest.get_media_type(), super::super::manifest::DOCKER_MANIFEST_V2);
    }

    #[tokio::test]
    async fn rejects_manifest_referencing_unknown_blob() {
        let proc = test_processor().await;
        let content = docker_manifest("sha256:missingconfig", "sha256:missinglayer");

        let err = proc
            .push_manifest(
                "acc",
                "tenant-1",
                "repo",
                super::super::manifest::DOCKER_MANIFEST_V2,
                content,
                &ManifestRef::Tag("latest".into()),
                &[],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ManifestBlobUnknown);
    }

    #[tokio::test]
    async fn enforces_manifest_quota() {
        let proc = test_processor().await;
        proc.db.upsert_quotas(&Quotas::new("tenant-1", 0)).await.unwrap();

        let config_digest = upload_blob(&proc, "acc", "repo", b"config-bytes").await;
        let layer_digest = upload_blob(&proc, "acc", "repo", b"layer-bytes").await;
        let content = docker_manifest(&config_digest, &layer_digest);

        let err = proc
            .push_manifest(
                "acc",
                "tenant-1",
                "repo",
                super::super::manifest::DOCKER_MANIFEST_V2,
                content,
                &ManifestRef::Tag("latest".into()),
                &[],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::QuotaExceeded);
    }

    #[tokio::test]
    async fn rejects_digest_addressed_push_with_wrong_digest() {
        let proc = test_processor().await;
        let config_digest = upload_blob(&proc, "acc", "repo", b"config-bytes").await;
        let layer_digest = upload_blob(&proc, "acc", "repo", b"layer-bytes").await;
        let content = docker_manifest(&config_digest, &layer_digest);

        let err = proc
            .push_manifest(
                "acc",
                "tenant-1",
                "repo",
                super::super::manifest::DOCKER_MANIFEST_V2,
                content,
                &ManifestRef::Digest("sha256:0000000000000000000000000000000000000000000000000000000000000".into()),
                &[],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DigestMismatch);
    }
}
