//! StorageSweepJob (§4.6): walks an account's storage driver contents and diffs them against the
//! metadata store, catching objects the database has no record of (an interrupted upload, a
//! crash between a storage write and its metadata insert) and recording them as orphan candidates
//! for grace-period deletion rather than deleting on sight.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;

use crate::models::{UnknownBlob, UnknownManifest};
use crate::KeppelResult;

use super::{Job, JanitorContext};

/// Grace period before a newly discovered orphan becomes eligible for deletion.
const ORPHAN_GRACE: Duration = Duration::hours(48);

/// Diffs physical storage contents against the metadata store, account by account.
pub struct StorageSweepJob;

impl StorageSweepJob {
    /// Builds the job.
    pub fn new() -> Self {
        Self
    }
}

impl Default for StorageSweepJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Job for StorageSweepJob {
    fn name(&self) -> &'static str {
        "storage_sweep"
    }

    fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(300)
    }

    async fn run_once(&self, ctx: &JanitorContext) -> KeppelResult<bool> {
        let proc = &ctx.processor;
        let accounts = proc.db.list_all_accounts().await?;
        if accounts.is_empty() {
            return Ok(false);
        }
        // No per-account schedule column exists for this job (unlike the claim-queue jobs), so
        // cycle through accounts by wall-clock time rather than always sweeping the first one.
        let index = (chrono::Utc::now().timestamp() as usize) % accounts.len();
        let account = &accounts[index];

        let contents = proc.storage.list_storage_contents(account.get_name()).await?;

        // Orphan blobs: physically present but with no metadata row at all (distinct from
        // mount-less blobs, which BlobMountSweep/BlobSweep already reconcile).
        for blob_info in &contents.blobs {
            let exists = blob_storage_id_known(proc, account.get_name(), &blob_info.storage_id).await?;
            if !exists {
                proc.db
                    .upsert_unknown_blob(&UnknownBlob::new(account.get_name(), &blob_info.storage_id, ORPHAN_GRACE))
                    .await?;
            }
        }

        for manifest_info in &contents.manifests {
            let repo = proc.db.get_repository(account.get_name(), &manifest_info.repo_name).await?;
            let exists = match &repo {
                Some(repo) => proc.db.get_manifest(*repo.get_id(), &manifest_info.digest).await?.is_some(),
                None => false,
            };
            if !exists {
                proc.db
                    .upsert_unknown_manifest(&UnknownManifest::new(
                        account.get_name(),
                        &manifest_info.repo_name,
                        &manifest_info.digest,
                        ORPHAN_GRACE,
                    ))
                    .await?;
            }
        }

        for unknown in proc.db.list_unknown_blobs_due().await? {
            proc.storage.delete_blob(unknown.get_account_name(), unknown.get_storage_id()).await.ok();
            proc.db.delete_unknown_blob(unknown.get_account_name(), unknown.get_storage_id()).await?;
        }
        for unknown in proc.db.list_unknown_manifests_due().await? {
            proc.storage
                .delete_manifest(unknown.get_account_name(), unknown.get_repository_name(), unknown.get_digest())
                .await
                .ok();
            proc.db
                .delete_unknown_manifest(unknown.get_account_name(), unknown.get_repository_name(), unknown.get_digest())
                .await?;
        }

        Ok(true)
    }
}

async fn blob_storage_id_known(
    proc: &crate::processor::Processor,
    account_name: &str,
    storage_id: &str,
) -> KeppelResult<bool> {
    // Blobs are looked up by digest everywhere else in this crate; storage sweep is the one place
    // that needs the reverse direction (storage id -> known?), so it scans the account's blobs
    // rather than adding a narrow index solely for this.
    for repo in proc.db.list_repositories(account_name).await? {
        for blob in proc.db.list_blobs_mounted_in_repository(*repo.get_id()).await? {
            if blob.get_storage_id() == storage_id {
                return Ok(true);
            }
        }
    }
    Ok(false)
}
