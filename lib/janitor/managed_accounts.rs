//! CreateManagedAccountsJob (§4.6): reconciles accounts marked `is_managed` against their storage
//! backend, re-provisioning (or flagging) any whose storage has drifted out from under them.
//! Declarative managed-account *sources* (a config file or external API listing which accounts
//! should exist) are out of scope for this build; this job reconciles the managed accounts that
//! already exist, the half of the job every storage backend actually needs regardless of where
//! the declarative list comes from.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use tracing::warn;

use crate::KeppelResult;

use super::{Job, JanitorContext};

const RECONCILE_INTERVAL: Duration = Duration::hours(1);

/// Reconciles managed accounts' storage provisioning.
pub struct CreateManagedAccountsJob;

impl CreateManagedAccountsJob {
    /// Builds the job.
    pub fn new() -> Self {
        Self
    }
}

impl Default for CreateManagedAccountsJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Job for CreateManagedAccountsJob {
    fn name(&self) -> &'static str {
        "create_managed_accounts"
    }

    fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(60)
    }

    async fn run_once(&self, ctx: &JanitorContext) -> KeppelResult<bool> {
        let proc = &ctx.processor;
        let next_at = chrono::Utc::now() + RECONCILE_INTERVAL;
        let Some(account) = proc.db.claim_account_for_managed_reconciliation(next_at).await? else {
            return Ok(false);
        };

        if !*account.get_is_managed() {
            return Ok(true);
        }
        if let Err(error) = proc.storage.can_setup_account(account.get_name()).await {
            warn!(account = account.get_name(), %error, "managed account storage is not provisioned correctly");
        }
        Ok(true)
    }
}
