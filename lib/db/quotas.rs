//! Typed queries for [`crate::models::Quotas`].

use sqlx::Row;

use crate::db::Pool;
use crate::models::Quotas;
use crate::KeppelResult;

impl Pool {
    /// Fetches the quota configured for an auth tenant, if any (no row means unlimited).
    pub async fn get_quotas(&self, auth_tenant_id: &str) -> KeppelResult<Option<Quotas>> {
        let row = sqlx::query("SELECT * FROM quotas WHERE auth_tenant_id = ?")
            .bind(auth_tenant_id)
            .fetch_optional(self.sqlite())
            .await?;

        row.map(|r| {
            Ok(Quotas::new(
                r.try_get::<String, _>("auth_tenant_id")?,
                r.try_get("manifest_count_limit")?,
            ))
        })
        .transpose()
    }

    /// Sets (creating or overwriting) the manifest-count quota for an auth tenant.
    pub async fn upsert_quotas(&self, quotas: &Quotas) -> KeppelResult<()> {
        sqlx::query(
            "INSERT INTO quotas (auth_tenant_id, manifest_count_limit) VALUES (?, ?) \
             ON CONFLICT (auth_tenant_id) DO UPDATE SET manifest_count_limit = excluded.manifest_count_limit",
        )
        .bind(quotas.get_auth_tenant_id())
        .bind(quotas.get_manifest_count_limit())
        .execute(self.sqlite())
        .await?;
        Ok(())
    }
}
