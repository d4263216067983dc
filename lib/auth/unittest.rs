//! Reference [`AuthDriver`]: tenant is just the username. Grants pull/push/delete whenever the
//! caller's tenant matches the account's, and view to every authenticated identity. Backs the
//! in-memory stack and the test suite; the analogue of `ipldstore`'s in-memory content store.

use async_trait::async_trait;

use crate::auth::{AuthDriver, Credentials, UserIdentity};
use crate::{KeppelError, KeppelResult};

/// An auth driver with no external dependency: any username/password pair authenticates, and the
/// username itself is the auth-tenant id.
#[derive(Debug, Default)]
pub struct UnitTestAuthDriver;

impl UnitTestAuthDriver {
    /// Builds the driver. Stateless; every instance behaves identically.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuthDriver for UnitTestAuthDriver {
    async fn authenticate(&self, credentials: &Credentials) -> KeppelResult<UserIdentity> {
        match credentials {
            Credentials::Basic { username, password } => {
                if username.is_empty() || password.is_empty() {
                    return Err(KeppelError::Unauthorized("missing credentials".into()));
                }
                Ok(UserIdentity::Regular {
                    name: username.clone(),
                    tenant_ids: vec![username.clone()],
                })
            }
            Credentials::Bearer(_) => Err(KeppelError::Unauthorized(
                "unittest driver does not accept bearer re-authentication".into(),
            )),
            Credentials::Anonymous => Ok(UserIdentity::Anonymous),
        }
    }

    fn can_view_account(&self, identity: &UserIdentity, _auth_tenant_id: &str) -> bool {
        match identity {
            UserIdentity::Regular { tenant_ids, .. } => !tenant_ids.is_empty(),
            UserIdentity::Peer { .. } => true,
            UserIdentity::Anonymous => false,
        }
    }

    fn can_pull_from_account(&self, identity: &UserIdentity, auth_tenant_id: &str) -> bool {
        // A peer is always allowed to pull for replication; its own auth driver is responsible
        // for enforcing tenancy on whoever is pulling through it.
        matches!(identity, UserIdentity::Peer { .. }) || identity.has_tenant(auth_tenant_id)
    }

    fn can_push_to_account(&self, identity: &UserIdentity, auth_tenant_id: &str) -> bool {
        identity.has_tenant(auth_tenant_id)
    }

    fn can_delete_from_account(&self, identity: &UserIdentity, auth_tenant_id: &str) -> bool {
        identity.has_tenant(auth_tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn username_becomes_tenant_id() {
        let driver = UnitTestAuthDriver::new();
        let identity = driver
            .authenticate(&Credentials::Basic {
                username: "alice".into(),
                password: "secret".into(),
            })
            .await
            .unwrap();
        assert_eq!(identity.tenant_ids(), ["alice".to_string()]);
    }

    #[tokio::test]
    async fn peer_identity_may_pull_any_tenant() {
        let driver = UnitTestAuthDriver::new();
        let identity = UserIdentity::Peer { peer_hostname: "peer.example.com".into() };
        assert!(driver.can_pull_from_account(&identity, "alice"));
        assert!(!driver.can_push_to_account(&identity, "alice"));
    }

    #[tokio::test]
    async fn matching_tenant_grants_push() {
        let driver = UnitTestAuthDriver::new();
        let identity = driver
            .authenticate(&Credentials::Basic {
                username: "alice".into(),
                password: "secret".into(),
            })
            .await
            .unwrap();
        assert!(driver.can_push_to_account(&identity, "alice"));
        assert!(!driver.can_push_to_account(&identity, "bob"));
    }

    #[tokio::test]
    async fn anonymous_cannot_pull() {
        let driver = UnitTestAuthDriver::new();
        let identity = driver.authenticate(&Credentials::Anonymous).await.unwrap();
        assert!(!driver.can_pull_from_account(&identity, "alice"));
    }
}
