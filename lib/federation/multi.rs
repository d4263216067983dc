//! Multi-FD composition: fans writes out to every child driver and reads from the first, for
//! zero-downtime cutover between federation backends (e.g. unittest → an external arbiter).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::federation::{ClaimResult, FederationDriver};
use crate::KeppelResult;

/// Composes several [`FederationDriver`]s. Reads are served by the first (the driver being
/// migrated away from); writes go to all of them so the new driver's state stays caught up.
pub struct MultiFederationDriver {
    drivers: Vec<Box<dyn FederationDriver>>,
}

impl MultiFederationDriver {
    /// Builds a composition. Panics in debug builds on an empty driver list, since there would be
    /// no driver to serve reads from.
    pub fn new(drivers: Vec<Box<dyn FederationDriver>>) -> Self {
        debug_assert!(!drivers.is_empty(), "MultiFederationDriver needs at least one child");
        Self { drivers }
    }
}

#[async_trait]
impl FederationDriver for MultiFederationDriver {
    async fn claim_account_name(
        &self,
        account_name: &str,
        sublease_token: Option<&str>,
    ) -> KeppelResult<ClaimResult> {
        let mut first_result = None;
        for driver in &self.drivers {
            let result = driver.claim_account_name(account_name, sublease_token).await?;
            if first_result.is_none() {
                first_result = Some(result);
            }
        }
        Ok(first_result.unwrap_or(ClaimResult::Errored))
    }

    async fn issue_sublease_token_secret(&self, account_name: &str) -> KeppelResult<String> {
        let mut first_secret = None;
        for driver in &self.drivers {
            let secret = driver.issue_sublease_token_secret(account_name).await?;
            if first_secret.is_none() {
                first_secret = Some(secret);
            }
        }
        first_secret.ok_or_else(|| {
            crate::KeppelError::DriverUnsupported("no federation drivers configured".into())
        })
    }

    async fn forfeit_account_name(&self, account_name: &str) -> KeppelResult<()> {
        for driver in &self.drivers {
            driver.forfeit_account_name(account_name).await?;
        }
        Ok(())
    }

    async fn record_existing_account(&self, account_name: &str, now: DateTime<Utc>) -> KeppelResult<()> {
        for driver in &self.drivers {
            driver.record_existing_account(account_name, now).await?;
        }
        Ok(())
    }

    async fn find_primary_account(&self, account_name: &str) -> KeppelResult<Option<String>> {
        self.drivers[0].find_primary_account(account_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::unittest::UnitTestFederationDriver;

    #[tokio::test]
    async fn claim_fans_out_to_every_child() {
        let multi = MultiFederationDriver::new(vec![
            Box::new(UnitTestFederationDriver::with_hostname("a")),
            Box::new(UnitTestFederationDriver::with_hostname("a")),
        ]);

        assert_eq!(
            multi.claim_account_name("acc", None).await.unwrap(),
            ClaimResult::Succeeded
        );
        assert_eq!(
            multi.find_primary_account("acc").await.unwrap(),
            Some("a".to_string())
        );
    }
}
