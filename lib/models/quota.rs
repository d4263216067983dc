//! Quotas: per-auth-tenant resource limits.

use getset::{Getters, Setters};

use crate::{KeppelError, KeppelResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The manifest-count quota for an auth tenant, shared across all accounts it owns.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Setters)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct Quotas {
    /// The auth tenant this quota applies to; the primary key.
    auth_tenant_id: String,

    /// Maximum number of distinct manifests across every account owned by this tenant.
    manifest_count_limit: i64,
}

impl Quotas {
    /// Builds a quota record with the given manifest count limit.
    pub fn new(auth_tenant_id: impl Into<String>, manifest_count_limit: i64) -> Self {
        Self {
            auth_tenant_id: auth_tenant_id.into(),
            manifest_count_limit,
        }
    }

    /// Checks whether pushing one more manifest would exceed the quota, given the tenant's
    /// current usage.
    pub fn check_manifest_push(&self, current_usage: i64) -> KeppelResult<()> {
        if current_usage >= self.manifest_count_limit {
            return Err(KeppelError::QuotaExceeded(format!(
                "manifest quota of {} reached (current usage {})",
                self.manifest_count_limit, current_usage
            )));
        }
        Ok(())
    }
}
