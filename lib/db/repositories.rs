//! Typed queries for [`crate::models::Repository`].

use sqlx::Row;

use crate::db::{opt_from_text, opt_to_text, Pool};
use crate::models::Repository;
use crate::{KeppelError, KeppelResult};

fn row_to_repository(row: sqlx::sqlite::SqliteRow) -> KeppelResult<Repository> {
    Ok(Repository::from_row(
        row.try_get("id")?,
        row.try_get("account_name")?,
        row.try_get("name")?,
        opt_from_text(row.try_get("next_blob_mount_sweep_at")?)?,
        opt_from_text(row.try_get("next_manifest_sync_at")?)?,
        opt_from_text(row.try_get("next_gc_at")?)?,
    ))
}

impl Pool {
    /// Inserts a new repository and returns it with its assigned id.
    pub async fn insert_repository(
        &self,
        account_name: &str,
        name: &str,
    ) -> KeppelResult<Repository> {
        sqlx::query("INSERT INTO repositories (account_name, name) VALUES (?, ?)")
            .bind(account_name)
            .bind(name)
            .execute(self.sqlite())
            .await?;

        self.get_repository(account_name, name)
            .await?
            .ok_or_else(|| {
                KeppelError::InvariantViolated(format!(
                    "repository {account_name}/{name} vanished immediately after insert"
                ))
            })
    }

    /// Fetches a repository by its full name.
    pub async fn get_repository(
        &self,
        account_name: &str,
        name: &str,
    ) -> KeppelResult<Option<Repository>> {
        let row = sqlx::query(
            "SELECT id, account_name, name, next_blob_mount_sweep_at, next_manifest_sync_at, next_gc_at \
             FROM repositories WHERE account_name = ? AND name = ?",
        )
        .bind(account_name)
        .bind(name)
        .fetch_optional(self.sqlite())
        .await?;

        row.map(row_to_repository).transpose()
    }

    /// Lists every repository belonging to an account.
    pub async fn list_repositories(&self, account_name: &str) -> KeppelResult<Vec<Repository>> {
        let rows = sqlx::query(
            "SELECT id, account_name, name, next_blob_mount_sweep_at, next_manifest_sync_at, next_gc_at \
             FROM repositories WHERE account_name = ? ORDER BY name",
        )
        .bind(account_name)
        .fetch_all(self.sqlite())
        .await?;

        rows.into_iter().map(row_to_repository).collect()
    }

    /// Deletes a repository row outright; callers must have already removed its manifests, tags
    /// and blob mounts (AccountDeletionJob, once a repository is fully reclaimed).
    pub async fn delete_repository(&self, repository_id: i64) -> KeppelResult<()> {
        sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(repository_id)
            .execute(self.sqlite())
            .await?;
        Ok(())
    }

    /// Sets a repository's `next_gc_at` scheduling column.
    pub async fn set_repository_next_gc_at(
        &self,
        repository_id: i64,
        at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> KeppelResult<()> {
        sqlx::query("UPDATE repositories SET next_gc_at = ? WHERE id = ?")
            .bind(opt_to_text(at))
            .bind(repository_id)
            .execute(self.sqlite())
            .await?;
        Ok(())
    }
}
