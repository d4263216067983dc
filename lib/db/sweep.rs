//! Typed queries for the StorageSweep bookkeeping sentinels
//! ([`crate::models::UnknownBlob`], [`crate::models::UnknownManifest`]).

use chrono::Utc;
use sqlx::Row;

use crate::db::{from_text, to_text, Pool};
use crate::models::{UnknownBlob, UnknownManifest};
use crate::KeppelResult;

impl Pool {
    /// Records (or refreshes) an orphan blob found by StorageSweep.
    pub async fn upsert_unknown_blob(&self, unknown: &UnknownBlob) -> KeppelResult<()> {
        sqlx::query(
            "INSERT INTO unknown_blobs (account_name, storage_id, can_be_deleted_at) VALUES (?, ?, ?) \
             ON CONFLICT (account_name, storage_id) DO NOTHING",
        )
        .bind(unknown.get_account_name())
        .bind(unknown.get_storage_id())
        .bind(to_text(*unknown.get_can_be_deleted_at()))
        .execute(self.sqlite())
        .await?;
        Ok(())
    }

    /// Lists orphan blobs past their grace period, for final deletion.
    pub async fn list_unknown_blobs_due(&self) -> KeppelResult<Vec<UnknownBlob>> {
        let rows = sqlx::query("SELECT * FROM unknown_blobs WHERE can_be_deleted_at <= ?")
            .bind(to_text(Utc::now()))
            .fetch_all(self.sqlite())
            .await?;

        rows.into_iter()
            .map(|r| {
                Ok(UnknownBlob::from_row(
                    r.try_get("account_name")?,
                    r.try_get("storage_id")?,
                    from_text(&r.try_get::<String, _>("can_be_deleted_at")?)?,
                ))
            })
            .collect()
    }

    /// Removes an orphan blob's bookkeeping row once it has been deleted or reappeared in the DB.
    pub async fn delete_unknown_blob(&self, account_name: &str, storage_id: &str) -> KeppelResult<()> {
        sqlx::query("DELETE FROM unknown_blobs WHERE account_name = ? AND storage_id = ?")
            .bind(account_name)
            .bind(storage_id)
            .execute(self.sqlite())
            .await?;
        Ok(())
    }

    /// Records (or refreshes) an orphan manifest found by StorageSweep.
    pub async fn upsert_unknown_manifest(&self, unknown: &UnknownManifest) -> KeppelResult<()> {
        sqlx::query(
            "INSERT INTO unknown_manifests (account_name, repository_name, digest, can_be_deleted_at) \
             VALUES (?, ?, ?, ?) ON CONFLICT (account_name, repository_name, digest) DO NOTHING",
        )
        .bind(unknown.get_account_name())
        .bind(unknown.get_repository_name())
        .bind(unknown.get_digest())
        .bind(to_text(*unknown.get_can_be_deleted_at()))
        .execute(self.sqlite())
        .await?;
        Ok(())
    }

    /// Lists orphan manifests past their grace period, for final deletion.
    pub async fn list_unknown_manifests_due(&self) -> KeppelResult<Vec<UnknownManifest>> {
        let rows = sqlx::query("SELECT * FROM unknown_manifests WHERE can_be_deleted_at <= ?")
            .bind(to_text(Utc::now()))
            .fetch_all(self.sqlite())
            .await?;

        rows.into_iter()
            .map(|r| {
                Ok(UnknownManifest::from_row(
                    r.try_get("account_name")?,
                    r.try_get("repository_name")?,
                    r.try_get("digest")?,
                    from_text(&r.try_get::<String, _>("can_be_deleted_at")?)?,
                ))
            })
            .collect()
    }

    /// Removes an orphan manifest's bookkeeping row.
    pub async fn delete_unknown_manifest(
        &self,
        account_name: &str,
        repository_name: &str,
        digest: &str,
    ) -> KeppelResult<()> {
        sqlx::query(
            "DELETE FROM unknown_manifests WHERE account_name = ? AND repository_name = ? AND digest = ?",
        )
        .bind(account_name)
        .bind(repository_name)
        .bind(digest)
        .execute(self.sqlite())
        .await?;
        Ok(())
    }
}
