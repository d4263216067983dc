//! Account: a namespace that owns repositories and is tied to an external auth tenant.

use chrono::{DateTime, Utc};
use getset::{Getters, Setters};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{KeppelError, KeppelResult};

use super::validate_account_name;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The credentials an account uses to pull from an external (non-peer) upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalPeer {
    /// The base URL of the upstream registry.
    pub url: String,
    /// The username presented to the upstream registry.
    pub username: String,
    /// The password presented to the upstream registry.
    pub password: String,
}

/// How an account's content is replicated, if at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replication {
    /// A primary account: content is pushed directly into it.
    Primary,
    /// A replica that lazily pulls from a peer deployment of this system.
    FromPeer {
        /// Hostname of the upstream peer.
        upstream_peer_hostname: String,
    },
    /// A replica that lazily pulls from an arbitrary external registry.
    FromExternal {
        /// Upstream registry credentials.
        external_peer: ExternalPeer,
    },
}

/// An account: a namespace that partitions repositories, quotas, replication and backing storage.
#[derive(Debug, Clone, PartialEq, Getters, Setters)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct Account {
    /// The account name. Matches `[a-z0-9]+(?:[._-][a-z0-9]+)*`, length <= 48.
    name: String,

    /// The opaque tenant id in the external auth system that owns this account.
    auth_tenant_id: String,

    /// Non-empty exactly when this account is a replica of a peer deployment.
    upstream_peer_hostname: Option<String>,

    /// Non-empty exactly when this account is a replica of an external registry.
    external_peer: Option<ExternalPeer>,

    /// The set of OCI platforms this account accepts manifests for; empty means unrestricted.
    platform_filter: Vec<String>,

    /// Labels every pushed manifest must carry.
    required_labels: Vec<String>,

    /// Set once account deletion has started; blocks new pushes.
    is_deleting: bool,

    /// True for accounts reconciled from a declarative managed-account list.
    is_managed: bool,

    /// Opaque RBAC/GC/security-scan/tag policy documents; the evaluator is out of core scope.
    rbac_policies_json: Value,
    gc_policies_json: Value,
    security_scan_policies_json: Value,
    tag_policies_json: Value,

    /// Next time the janitor should announce this account to federation.
    next_federation_announcement_at: Option<DateTime<Utc>>,

    /// Next time CreateManagedAccountsJob should reconcile managed-account state.
    next_managed_reconciliation_at: Option<DateTime<Utc>>,

    /// When this account row was created.
    created_at: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Account {
    /// Builds a new primary account, validating its name.
    pub fn new_primary(name: impl Into<String>, auth_tenant_id: impl Into<String>) -> KeppelResult<Self> {
        let name = name.into();
        validate_account_name(&name)?;
        Ok(Self {
            name,
            auth_tenant_id: auth_tenant_id.into(),
            upstream_peer_hostname: None,
            external_peer: None,
            platform_filter: Vec::new(),
            required_labels: Vec::new(),
            is_deleting: false,
            is_managed: false,
            rbac_policies_json: Value::Array(vec![]),
            gc_policies_json: Value::Array(vec![]),
            security_scan_policies_json: Value::Array(vec![]),
            tag_policies_json: Value::Array(vec![]),
            next_federation_announcement_at: None,
            next_managed_reconciliation_at: None,
            created_at: Utc::now(),
        })
    }

    /// Whether this account is a replica of some upstream (peer or external).
    pub fn is_replica(&self) -> bool {
        self.upstream_peer_hostname.is_some() || self.external_peer.is_some()
    }

    /// Classifies this account's replication mode, enforcing that at most one of
    /// `upstream_peer_hostname`/`external_peer` is set (data model invariant on Account).
    pub fn replication(&self) -> KeppelResult<Replication> {
        match (&self.upstream_peer_hostname, &self.external_peer) {
            (Some(_), Some(_)) => Err(KeppelError::InvariantViolated(format!(
                "account {:?} has both an upstream peer and an external peer configured",
                self.name
            ))),
            (Some(hostname), None) => Ok(Replication::FromPeer {
                upstream_peer_hostname: hostname.clone(),
            }),
            (None, Some(external)) => Ok(Replication::FromExternal {
                external_peer: external.clone(),
            }),
            (None, None) => Ok(Replication::Primary),
        }
    }

    /// Full name of a repository in this account, `account/name`.
    pub fn full_repository_name(&self, repository_name: &str) -> String {
        format!("{}/{}", self.name, repository_name)
    }

    /// Reconstructs an account read back from the database.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_row(
        name: String,
        auth_tenant_id: String,
        upstream_peer_hostname: Option<String>,
        external_peer: Option<ExternalPeer>,
        platform_filter: Vec<String>,
        required_labels: Vec<String>,
        is_deleting: bool,
        is_managed: bool,
        rbac_policies_json: Value,
        gc_policies_json: Value,
        security_scan_policies_json: Value,
        tag_policies_json: Value,
        next_federation_announcement_at: Option<DateTime<Utc>>,
        next_managed_reconciliation_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name,
            auth_tenant_id,
            upstream_peer_hostname,
            external_peer,
            platform_filter,
            required_labels,
            is_deleting,
            is_managed,
            rbac_policies_json,
            gc_policies_json,
            security_scan_policies_json,
            tag_policies_json,
            next_federation_announcement_at,
            next_managed_reconciliation_at,
            created_at,
        }
    }
}
