//! ManifestSyncJob (§4.6): for replica accounts, periodically re-checks every tag in a repository
//! against its upstream and re-replicates any that have moved, so a replica's tags do not go
//! stale indefinitely between client pulls (which only trigger replication for content missing
//! locally, not content that has changed upstream).

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;

use crate::KeppelResult;

use super::{log_cleanup_error, Job, JanitorContext};

const RECONCILE_INTERVAL: Duration = Duration::hours(1);

/// Re-syncs replica repository tags against their upstream.
pub struct ManifestSyncJob;

impl ManifestSyncJob {
    /// Builds the job.
    pub fn new() -> Self {
        Self
    }
}

impl Default for ManifestSyncJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Job for ManifestSyncJob {
    fn name(&self) -> &'static str {
        "manifest_sync"
    }

    fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(60)
    }

    async fn run_once(&self, ctx: &JanitorContext) -> KeppelResult<bool> {
        let proc = &ctx.processor;
        let next_at = chrono::Utc::now() + RECONCILE_INTERVAL;
        let Some(repo) = proc.db.claim_repository_for_manifest_sync(next_at).await? else {
            return Ok(false);
        };

        let Some(account) = proc.db.get_account(repo.get_account_name()).await? else {
            return Ok(true);
        };
        if !account.is_replica() {
            return Ok(true);
        }

        for tag in proc.db.list_tags(*repo.get_id()).await? {
            if let Err(error) = proc.resync_tag(&account, repo.get_name(), tag.get_name()).await {
                log_cleanup_error(self.name(), "resync_tag", &error);
            }
        }
        Ok(true)
    }
}
