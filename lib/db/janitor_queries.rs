//! Cross-entity queries used by the janitor's job scheduler (§4.6): claiming due tasks via
//! optimistic locking (`UPDATE ... WHERE next_*_at = old`) so that two janitor instances racing
//! on the same row only have one of them win.

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::db::{opt_to_text, to_text, Pool};
use crate::models::{Account, Repository};
use crate::KeppelResult;

impl Pool {
    /// Claims one account due for federation announcement, rescheduling it past `next_at` so a
    /// concurrent janitor does not also claim it. Returns `None` if no account is due.
    pub async fn claim_account_for_federation_announcement(
        &self,
        next_at: DateTime<Utc>,
    ) -> KeppelResult<Option<Account>> {
        let candidate: Option<(String, String)> = sqlx::query_as(
            "SELECT name, next_federation_announcement_at FROM accounts \
             WHERE next_federation_announcement_at IS NOT NULL AND next_federation_announcement_at <= ? \
             ORDER BY next_federation_announcement_at LIMIT 1",
        )
        .bind(to_text(Utc::now()))
        .fetch_optional(self.sqlite())
        .await?;

        let Some((name, old_due)) = candidate else {
            return Ok(None);
        };

        let result = sqlx::query(
            "UPDATE accounts SET next_federation_announcement_at = ? \
             WHERE name = ? AND next_federation_announcement_at = ?",
        )
        .bind(to_text(next_at))
        .bind(&name)
        .bind(&old_due)
        .execute(self.sqlite())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None); // lost the race to another janitor
        }

        self.get_account(&name).await
    }

    /// Claims one account due for managed-account reconciliation.
    pub async fn claim_account_for_managed_reconciliation(
        &self,
        next_at: DateTime<Utc>,
    ) -> KeppelResult<Option<Account>> {
        let candidate: Option<(String, String)> = sqlx::query_as(
            "SELECT name, next_managed_reconciliation_at FROM accounts \
             WHERE next_managed_reconciliation_at IS NOT NULL AND next_managed_reconciliation_at <= ? \
             ORDER BY next_managed_reconciliation_at LIMIT 1",
        )
        .bind(to_text(Utc::now()))
        .fetch_optional(self.sqlite())
        .await?;

        let Some((name, old_due)) = candidate else {
            return Ok(None);
        };

        let result = sqlx::query(
            "UPDATE accounts SET next_managed_reconciliation_at = ? \
             WHERE name = ? AND next_managed_reconciliation_at = ?",
        )
        .bind(to_text(next_at))
        .bind(&name)
        .bind(&old_due)
        .execute(self.sqlite())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get_account(&name).await
    }

    /// Lists every account currently marked `is_deleting`, the AccountDeletion saga's work queue.
    pub async fn list_accounts_pending_deletion(&self) -> KeppelResult<Vec<Account>> {
        self.list_accounts_by_predicate("is_deleting = 1").await
    }

    async fn list_accounts_by_predicate(&self, predicate: &str) -> KeppelResult<Vec<Account>> {
        let sql = format!("SELECT * FROM accounts WHERE {predicate} ORDER BY name");
        let rows = sqlx::query(&sql).fetch_all(self.sqlite()).await?;
        rows.into_iter()
            .map(crate::db::accounts::row_to_account)
            .collect()
    }

    /// Claims one repository due for `next_blob_mount_sweep_at`.
    pub async fn claim_repository_for_blob_mount_sweep(
        &self,
        next_at: DateTime<Utc>,
    ) -> KeppelResult<Option<Repository>> {
        self.claim_repository_column("next_blob_mount_sweep_at", next_at)
            .await
    }

    /// Claims one repository due for `next_manifest_sync_at` (replica accounts only).
    pub async fn claim_repository_for_manifest_sync(
        &self,
        next_at: DateTime<Utc>,
    ) -> KeppelResult<Option<Repository>> {
        self.claim_repository_column("next_manifest_sync_at", next_at)
            .await
    }

    /// Claims one repository due for `next_gc_at`.
    pub async fn claim_repository_for_gc(
        &self,
        next_at: DateTime<Utc>,
    ) -> KeppelResult<Option<Repository>> {
        self.claim_repository_column("next_gc_at", next_at).await
    }

    async fn claim_repository_column(
        &self,
        column: &'static str,
        next_at: DateTime<Utc>,
    ) -> KeppelResult<Option<Repository>> {
        let sql = format!(
            "SELECT id, {column} FROM repositories WHERE {column} IS NOT NULL AND {column} <= ? \
             ORDER BY {column} LIMIT 1"
        );
        let candidate: Option<(i64, String)> = sqlx::query_as(&sql)
            .bind(to_text(Utc::now()))
            .fetch_optional(self.sqlite())
            .await?;

        let Some((id, old_due)) = candidate else {
            return Ok(None);
        };

        let update_sql = format!("UPDATE repositories SET {column} = ? WHERE id = ? AND {column} = ?");
        let result = sqlx::query(&update_sql)
            .bind(opt_to_text(Some(next_at)))
            .bind(id)
            .bind(&old_due)
            .execute(self.sqlite())
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query(
            "SELECT id, account_name, name, next_blob_mount_sweep_at, next_manifest_sync_at, next_gc_at \
             FROM repositories WHERE id = ?",
        )
        .bind(id)
        .fetch_one(self.sqlite())
        .await?;

        Ok(Some(Repository::from_row(
            row.try_get("id")?,
            row.try_get("account_name")?,
            row.try_get("name")?,
            crate::db::opt_from_text(row.try_get("next_blob_mount_sweep_at")?)?,
            crate::db::opt_from_text(row.try_get("next_manifest_sync_at")?)?,
            crate::db::opt_from_text(row.try_get("next_gc_at")?)?,
        )))
    }

    /// Lists every repository, for StorageSweep which walks the whole namespace rather than a
    /// per-repository schedule column.
    pub async fn list_all_repositories(&self) -> KeppelResult<Vec<Repository>> {
        let rows = sqlx::query(
            "SELECT id, account_name, name, next_blob_mount_sweep_at, next_manifest_sync_at, next_gc_at \
             FROM repositories",
        )
        .fetch_all(self.sqlite())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Repository::from_row(
                    row.try_get("id")?,
                    row.try_get("account_name")?,
                    row.try_get("name")?,
                    crate::db::opt_from_text(row.try_get("next_blob_mount_sweep_at")?)?,
                    crate::db::opt_from_text(row.try_get("next_manifest_sync_at")?)?,
                    crate::db::opt_from_text(row.try_get("next_gc_at")?)?,
                ))
            })
            .collect()
    }

    /// Lists every account, for jobs (like StorageSweep) that walk the whole namespace.
    pub async fn list_all_accounts(&self) -> KeppelResult<Vec<Account>> {
        let rows = sqlx::query("SELECT * FROM accounts ORDER BY name")
            .fetch_all(self.sqlite())
            .await?;

        rows.into_iter()
            .map(crate::db::accounts::row_to_account)
            .collect()
    }
}
