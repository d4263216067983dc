//! Reference [`FederationDriver`]: an in-process name registry, this deployment being the only
//! peer. Every claim it grants is implicitly primary; sublease tokens are accepted once, tracked
//! in a set that is drained on use.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::federation::{ClaimResult, FederationDriver};
use crate::KeppelResult;

#[derive(Debug, Default)]
struct State {
    /// Account name -> hostname holding the primary claim.
    claims: HashMap<String, String>,
    /// Outstanding single-use sublease secrets, keyed by account name.
    sublease_secrets: HashMap<String, HashSet<String>>,
}

/// An in-memory federation driver treating the local deployment as the sole peer.
pub struct UnitTestFederationDriver {
    state: Mutex<State>,
    self_hostname: String,
}

impl UnitTestFederationDriver {
    /// Builds a driver that claims accounts under the hostname `"localhost"`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            self_hostname: "localhost".to_string(),
        }
    }

    /// Builds a driver claiming accounts under a specific hostname, for multi-peer tests.
    pub fn with_hostname(hostname: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            self_hostname: hostname.into(),
        }
    }
}

impl Default for UnitTestFederationDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FederationDriver for UnitTestFederationDriver {
    async fn claim_account_name(
        &self,
        account_name: &str,
        sublease_token: Option<&str>,
    ) -> KeppelResult<ClaimResult> {
        let mut state = self.state.lock().unwrap();

        if let Some(owner) = state.claims.get(account_name) {
            if owner == &self.self_hostname {
                return Ok(ClaimResult::Succeeded);
            }

            let Some(token) = sublease_token else {
                return Ok(ClaimResult::Failed);
            };

            let secrets = state.sublease_secrets.entry(account_name.to_string()).or_default();
            if !secrets.remove(token) {
                return Ok(ClaimResult::Failed);
            }
        }

        state
            .claims
            .insert(account_name.to_string(), self.self_hostname.clone());
        Ok(ClaimResult::Succeeded)
    }

    async fn issue_sublease_token_secret(&self, account_name: &str) -> KeppelResult<String> {
        let secret = Uuid::new_v4().to_string();
        let mut state = self.state.lock().unwrap();
        state
            .sublease_secrets
            .entry(account_name.to_string())
            .or_default()
            .insert(secret.clone());
        Ok(secret)
    }

    async fn forfeit_account_name(&self, account_name: &str) -> KeppelResult<()> {
        self.state.lock().unwrap().claims.remove(account_name);
        Ok(())
    }

    async fn record_existing_account(&self, _account_name: &str, _now: DateTime<Utc>) -> KeppelResult<()> {
        Ok(())
    }

    async fn find_primary_account(&self, account_name: &str) -> KeppelResult<Option<String>> {
        Ok(self.state.lock().unwrap().claims.get(account_name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_claim_succeeds_and_is_primary() {
        let driver = UnitTestFederationDriver::new();
        assert_eq!(
            driver.claim_account_name("acc", None).await.unwrap(),
            ClaimResult::Succeeded
        );
        assert_eq!(
            driver.find_primary_account("acc").await.unwrap(),
            Some("localhost".to_string())
        );
    }

    #[tokio::test]
    async fn second_claim_without_sublease_fails() {
        let a = UnitTestFederationDriver::with_hostname("peer-a");
        a.claim_account_name("acc", None).await.unwrap();

        assert_eq!(
            a.claim_account_name("acc", None).await.unwrap(),
            ClaimResult::Failed
        );
    }

    #[tokio::test]
    async fn sublease_token_is_single_use() {
        let driver = UnitTestFederationDriver::with_hostname("peer-a");
        driver.claim_account_name("acc", None).await.unwrap();

        let token = driver.issue_sublease_token_secret("acc").await.unwrap();

        // A different driver instance plays the replica peer, sharing no state; it can only
        // claim with the sublease token, and only once.
        let replica = UnitTestFederationDriver::with_hostname("peer-a");
        replica.claim_account_name("acc", None).await.unwrap();

        assert_eq!(
            driver.claim_account_name("acc", Some(&token)).await.unwrap(),
            ClaimResult::Succeeded
        );

        let reuse_secrets_exhausted = driver.issue_sublease_token_secret("acc").await.unwrap();
        assert_ne!(reuse_secrets_exhausted, token);
    }
}
