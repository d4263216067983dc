//! AccountDeletionJob (§4.6): the resumable saga that tears down an account marked `is_deleting`
//! (set by the account API, which blocks new pushes the moment deletion starts). Each cycle makes
//! one unit of incremental progress — reclaim one repository's manifests, or finish the account
//! off once none remain — so a crash mid-deletion loses nothing: the next cycle re-derives what
//! is left to do entirely from the database and storage driver rather than from in-memory state.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;

use crate::KeppelResult;

use super::{Job, JanitorContext};

/// Grace period given to orphaned blobs freed by a manifest reclaimed mid-deletion.
const BLOB_SWEEP_GRACE: Duration = Duration::hours(24);

/// How long an upload may sit untouched before the account-deletion saga treats it as abandoned
/// rather than in-flight (§4.4's "wait for pending uploads to expire" teardown step).
const UPLOAD_STALE_AFTER: Duration = Duration::hours(1);

/// Tears down accounts marked for deletion, one step per cycle.
pub struct AccountDeletionJob;

impl AccountDeletionJob {
    /// Builds the job.
    pub fn new() -> Self {
        Self
    }
}

impl Default for AccountDeletionJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Job for AccountDeletionJob {
    fn name(&self) -> &'static str {
        "account_deletion"
    }

    fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(30)
    }

    async fn run_once(&self, ctx: &JanitorContext) -> KeppelResult<bool> {
        let proc = &ctx.processor;
        let pending = proc.db.list_accounts_pending_deletion().await?;
        let Some(account) = pending.into_iter().next() else {
            return Ok(false);
        };

        let repos = proc.db.list_repositories(account.get_name()).await?;
        let Some(repo) = repos.into_iter().next() else {
            // No repositories left: the account is fully reclaimed.
            ctx.federation.forfeit_account_name(account.get_name()).await?;
            proc.storage.cleanup_account(account.get_name()).await?;
            proc.db.delete_account(account.get_name()).await?;
            return Ok(true);
        };

        // `list_stale_uploads` filters on `updated_at <= cutoff`; passing "now" reuses that query
        // to fetch every in-progress upload for this account, stale or not, so each can be
        // classified below.
        let stale_before = chrono::Utc::now() - UPLOAD_STALE_AFTER;
        for upload in proc.db.list_stale_uploads(chrono::Utc::now()).await? {
            if *upload.get_repository_id() != *repo.get_id() {
                continue;
            }
            if *upload.get_updated_at() > stale_before {
                // Still within its staleness window: a client may be actively pushing to this
                // repository. Leave the account marked for deletion and retry next cycle rather
                // than deleting storage or metadata out from under it.
                return Ok(false);
            }
            proc.abort_upload(repo.get_account_name(), *repo.get_id(), *upload.get_uuid()).await?;
        }

        for manifest in proc.db.list_manifests(*repo.get_id()).await? {
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
                            .set_blob_can_be_deleted_at(*blob.get_id(), Some(chrono::Utc::now() + BLOB_SWEEP_GRACE))
                            .await?;
                    }
                }
            }
        }
        proc.db.delete_repository(*repo.get_id()).await?;
        Ok(true)
    }
}
