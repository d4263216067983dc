//! Auth driver (AD): authenticates end users and maps them to an opaque auth-tenant id that
//! scopes account ownership (§4.3). Authorization checks (`can_view_account` etc.) are phrased
//! against that tenant id rather than the caller's raw identity, so the token service and API
//! handlers never need to know how a given driver derives tenancy.

pub mod unittest;

use async_trait::async_trait;

use crate::KeppelResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Credentials presented by a client, ahead of being resolved to a [`UserIdentity`].
#[derive(Debug, Clone)]
pub enum Credentials {
    /// HTTP Basic auth as sent to `/v2/` or the Docker `/auth` endpoint.
    Basic {
        /// The supplied username.
        username: String,
        /// The supplied password.
        password: String,
    },
    /// A previously issued bearer token, re-presented to mint a narrower one (token refresh).
    Bearer(String),
    /// No credentials at all — some drivers grant anonymous/public access.
    Anonymous,
}

/// The authenticated caller: a tagged value, not a single flat shape, because the three kinds of
/// caller this system ever authenticates carry different information. Round-tripped verbatim
/// through a token's `embedded_user_identity` claim (§4.3) so that a bearer-token-authenticated
/// request sees exactly the identity the original Basic-credentials exchange produced, rather
/// than a shape reconstructed from whichever claim fields happened to be convenient.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UserIdentity {
    /// An end user resolved by the configured [`AuthDriver`].
    Regular {
        /// A human-readable name for the caller (JWT `sub`, audit logs).
        name: String,
        /// Auth-tenant ids this identity may act as; an [`Account`](crate::models::Account) is
        /// governed by whichever tenant owns it.
        tenant_ids: Vec<String>,
    },
    /// Another deployment of this system, authenticated against its rotating peer password
    /// (§4.7) rather than the configured [`AuthDriver`] — used only for inter-registry
    /// replication pulls, never granted push/delete.
    Peer {
        /// The peer's hostname, as registered in the `peers` table.
        peer_hostname: String,
    },
    /// No credentials were presented; whether this is sufficient for a given operation is a
    /// decision for the [`AuthDriver`] and the handler, not this type.
    Anonymous,
}

impl UserIdentity {
    /// A human-readable name for audit logging and the JWT `sub` claim.
    pub fn name(&self) -> &str {
        match self {
            Self::Regular { name, .. } => name,
            Self::Peer { peer_hostname } => peer_hostname,
            Self::Anonymous => "anonymous",
        }
    }

    /// Auth-tenant ids this identity may act as. Empty for [`Self::Peer`] and [`Self::Anonymous`]
    /// — peer access is granted through [`AuthDriver`] matching on the variant itself, not tenancy.
    pub fn tenant_ids(&self) -> &[String] {
        match self {
            Self::Regular { tenant_ids, .. } => tenant_ids,
            Self::Peer { .. } | Self::Anonymous => &[],
        }
    }

    /// True if this identity may act as `tenant_id`.
    pub fn has_tenant(&self, tenant_id: &str) -> bool {
        self.tenant_ids().iter().any(|t| t == tenant_id)
    }
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The pluggable authentication and authorization backend.
#[async_trait]
pub trait AuthDriver: Send + Sync {
    /// Resolves credentials to an identity. Fails with
    /// [`KeppelError::Unauthorized`](crate::KeppelError::Unauthorized) on bad credentials.
    async fn authenticate(&self, credentials: &Credentials) -> KeppelResult<UserIdentity>;

    /// Whether `identity` may view (list, read metadata of) an account owned by `auth_tenant_id`.
    fn can_view_account(&self, identity: &UserIdentity, auth_tenant_id: &str) -> bool;

    /// Whether `identity` may pull blobs/manifests from an account owned by `auth_tenant_id`.
    fn can_pull_from_account(&self, identity: &UserIdentity, auth_tenant_id: &str) -> bool;

    /// Whether `identity` may push blobs/manifests to an account owned by `auth_tenant_id`.
    fn can_push_to_account(&self, identity: &UserIdentity, auth_tenant_id: &str) -> bool;

    /// Whether `identity` may delete blobs/manifests/tags from an account owned by
    /// `auth_tenant_id`.
    fn can_delete_from_account(&self, identity: &UserIdentity, auth_tenant_id: &str) -> bool;
}

/// Builds the configured [`AuthDriver`] from a `KEPPEL_DRIVER_AUTH` config blob.
pub fn build(config: &crate::config::DriverConfig) -> KeppelResult<Box<dyn AuthDriver>> {
    match config.driver_type.as_str() {
        "unittest" => Ok(Box::new(unittest::UnitTestAuthDriver::new())),
        other => Err(crate::KeppelError::DriverUnsupported(format!(
            "unknown auth driver type {other:?}"
        ))),
    }
}
