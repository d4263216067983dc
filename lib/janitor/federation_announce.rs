//! AnnounceAccountToFederationJob (§4.6/§4.7): periodically re-announces every primary account to
//! the federation driver, refreshing its last-seen timestamp with the name arbiter so a stale
//! claim is never mistaken for an abandoned one.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;

use crate::KeppelResult;

use super::{Job, JanitorContext};

const REANNOUNCE_INTERVAL: Duration = Duration::hours(6);

/// Re-announces accounts to the federation driver on a rolling schedule.
pub struct AnnounceAccountToFederationJob;

impl AnnounceAccountToFederationJob {
    /// Builds the job.
    pub fn new() -> Self {
        Self
    }
}

impl Default for AnnounceAccountToFederationJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Job for AnnounceAccountToFederationJob {
    fn name(&self) -> &'static str {
        "announce_account_to_federation"
    }

    fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(60)
    }

    async fn run_once(&self, ctx: &JanitorContext) -> KeppelResult<bool> {
        let proc = &ctx.processor;
        let next_at = chrono::Utc::now() + REANNOUNCE_INTERVAL;
        let Some(account) = proc.db.claim_account_for_federation_announcement(next_at).await? else {
            return Ok(false);
        };

        if account.is_replica() {
            return Ok(true);
        }
        ctx.federation
            .record_existing_account(account.get_name(), chrono::Utc::now())
            .await?;
        Ok(true)
    }
}
