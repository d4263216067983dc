//! Federation driver (FD): the global name arbiter across peer deployments (§4.7). Claims and
//! forfeits account-name ownership, mints single-use sublease tokens so a replica can prove a
//! primary authorized its claim, and periodically re-announces existing accounts.

pub mod multi;
pub mod unittest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::KeppelResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of attempting to claim an account name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    /// The name was unclaimed (or already claimed by this deployment) and is now claimed.
    Succeeded,
    /// The name is claimed by someone else and no valid sublease token was presented.
    Failed,
    /// The arbiter could not be reached or returned an unexpected response.
    Errored,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The pluggable global account-name arbiter.
#[async_trait]
pub trait FederationDriver: Send + Sync {
    /// Claims `account_name` for this deployment. A replica claim must present a sublease token
    /// minted by the primary's FD via [`issue_sublease_token_secret`](FederationDriver::issue_sublease_token_secret).
    async fn claim_account_name(
        &self,
        account_name: &str,
        sublease_token: Option<&str>,
    ) -> KeppelResult<ClaimResult>;

    /// Mints a single-use secret a prospective replica can present to
    /// [`claim_account_name`](FederationDriver::claim_account_name) to prove this deployment, as
    /// primary, authorized the claim.
    async fn issue_sublease_token_secret(&self, account_name: &str) -> KeppelResult<String>;

    /// Releases this deployment's claim on `account_name`, e.g. as the last step of account
    /// deletion.
    async fn forfeit_account_name(&self, account_name: &str) -> KeppelResult<()>;

    /// Re-announces an already-claimed account, refreshing its last-seen timestamp with the
    /// arbiter (AnnounceAccountToFederationJob).
    async fn record_existing_account(&self, account_name: &str, now: DateTime<Utc>) -> KeppelResult<()>;

    /// Looks up which peer hostname holds the primary claim for `account_name`. `None` means no
    /// primary is registered (`NoSuchPrimaryAccount`).
    async fn find_primary_account(&self, account_name: &str) -> KeppelResult<Option<String>>;
}

/// Builds the configured [`FederationDriver`] from a `KEPPEL_DRIVER_FEDERATION` config blob.
pub fn build(config: &crate::config::DriverConfig) -> KeppelResult<Box<dyn FederationDriver>> {
    match config.driver_type.as_str() {
        "unittest" => Ok(Box::new(unittest::UnitTestFederationDriver::new())),
        other => Err(crate::KeppelError::DriverUnsupported(format!(
            "unknown federation driver type {other:?}"
        ))),
    }
}
