//! BlobMountSweepJob (§4.6): the scheduled counterpart of the inline reevaluation
//! [`crate::processor`] does on manifest delete. Walks every blob currently mounted into a
//! repository and unmounts any that no manifest in the repository references any more, catching
//! drift the inline path could have missed (a crash mid-delete, a manual DB edit).

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;

use crate::KeppelResult;

use super::{Job, JanitorContext};

/// Grace period before an orphaned blob becomes eligible for BlobSweep.
const BLOB_SWEEP_GRACE: Duration = Duration::hours(24);
/// How often a repository is reconciled.
const RECONCILE_INTERVAL: Duration = Duration::hours(6);

/// Reconciles blob mounts against the manifests that actually reference them.
pub struct BlobMountSweepJob;

impl BlobMountSweepJob {
    /// Builds the job.
    pub fn new() -> Self {
        Self
    }
}

impl Default for BlobMountSweepJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Job for BlobMountSweepJob {
    fn name(&self) -> &'static str {
        "blob_mount_sweep"
    }

    fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(60)
    }

    async fn run_once(&self, ctx: &JanitorContext) -> KeppelResult<bool> {
        let proc = &ctx.processor;
        let next_at = chrono::Utc::now() + RECONCILE_INTERVAL;
        let Some(repo) = proc.db.claim_repository_for_blob_mount_sweep(next_at).await? else {
            return Ok(false);
        };

        let mut referenced = std::collections::HashSet::new();
        for manifest in proc.db.list_manifests(*repo.get_id()).await? {
            for blob_digest in proc.db.list_manifest_blob_refs(*repo.get_id(), manifest.get_digest()).await? {
                referenced.insert(blob_digest);
            }
        }

        for blob in proc.db.list_blobs_mounted_in_repository(*repo.get_id()).await? {
            if referenced.contains(blob.get_digest()) {
                continue;
            }
            proc.db.unmount_blob(*blob.get_id(), *repo.get_id()).await?;
            if proc.db.count_blob_mounts(*blob.get_id()).await? == 0 {
                proc.db
                    .set_blob_can_be_deleted_at(*blob.get_id(), Some(chrono::Utc::now() + BLOB_SWEEP_GRACE))
                    .await?;
            }
        }
        Ok(true)
    }
}
