//! Typed queries for [`crate::models::Blob`] and `BlobMount`.

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::db::{from_text, opt_from_text, opt_to_text, to_text, Pool};
use crate::models::Blob;
use crate::KeppelResult;

fn row_to_blob(row: sqlx::sqlite::SqliteRow) -> KeppelResult<Blob> {
    Ok(Blob::from_row(
        row.try_get("id")?,
        row.try_get("account_name")?,
        row.try_get("digest")?,
        row.try_get("size_bytes")?,
        row.try_get("storage_id")?,
        row.try_get("media_type")?,
        from_text(&row.try_get::<String, _>("pushed_at")?)?,
        opt_from_text(row.try_get("next_validation_at")?)?,
        row.try_get("validation_error_message")?,
        row.try_get("validation_failure_count")?,
        opt_from_text(row.try_get("can_be_deleted_at")?)?,
        row.try_get::<Option<i64>, _>("blocks_vuln_scanning")?.map(|v| v != 0),
    ))
}

impl Pool {
    /// Inserts a new finalized blob and returns it with its assigned id.
    pub async fn insert_blob(&self, blob: &Blob) -> KeppelResult<Blob> {
        sqlx::query(
            "INSERT INTO blobs (account_name, digest, size_bytes, storage_id, media_type, pushed_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(blob.get_account_name())
        .bind(blob.get_digest())
        .bind(blob.get_size_bytes())
        .bind(blob.get_storage_id())
        .bind(blob.get_media_type())
        .bind(to_text(*blob.get_pushed_at()))
        .execute(self.sqlite())
        .await?;

        self.get_blob(blob.get_account_name(), blob.get_digest())
            .await?
            .ok_or_else(|| {
                crate::KeppelError::InvariantViolated(format!(
                    "blob {}@{} vanished immediately after insert",
                    blob.get_account_name(),
                    blob.get_digest()
                ))
            })
    }

    /// Fetches a blob by account and digest.
    pub async fn get_blob(&self, account_name: &str, digest: &str) -> KeppelResult<Option<Blob>> {
        let row = sqlx::query("SELECT * FROM blobs WHERE account_name = ? AND digest = ?")
            .bind(account_name)
            .bind(digest)
            .fetch_optional(self.sqlite())
            .await?;

        row.map(row_to_blob).transpose()
    }

    /// Mounts a blob into a repository (no-op if already mounted).
    pub async fn mount_blob(&self, blob_id: i64, repository_id: i64) -> KeppelResult<()> {
        sqlx::query("INSERT OR IGNORE INTO blob_mounts (blob_id, repository_id) VALUES (?, ?)")
            .bind(blob_id)
            .bind(repository_id)
            .execute(self.sqlite())
            .await?;
        Ok(())
    }

    /// Whether a blob is mounted into a given repository.
    pub async fn is_blob_mounted(&self, blob_id: i64, repository_id: i64) -> KeppelResult<bool> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM blob_mounts WHERE blob_id = ? AND repository_id = ?",
        )
        .bind(blob_id)
        .bind(repository_id)
        .fetch_one(self.sqlite())
        .await?;
        Ok(row.0 > 0)
    }

    /// Counts how many repositories still mount a blob.
    pub async fn count_blob_mounts(&self, blob_id: i64) -> KeppelResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM blob_mounts WHERE blob_id = ?")
            .bind(blob_id)
            .fetch_one(self.sqlite())
            .await?;
        Ok(row.0)
    }

    /// Lists every blob currently mounted into a repository, for BlobMountSweepJob to reconcile
    /// against the repository's manifests.
    pub async fn list_blobs_mounted_in_repository(&self, repository_id: i64) -> KeppelResult<Vec<Blob>> {
        let rows = sqlx::query(
            "SELECT b.* FROM blobs b \
             JOIN blob_mounts m ON m.blob_id = b.id \
             WHERE m.repository_id = ?",
        )
        .bind(repository_id)
        .fetch_all(self.sqlite())
        .await?;

        rows.into_iter().map(row_to_blob).collect()
    }

    /// Removes a blob's mount into a repository, e.g. when the last manifest referencing it in
    /// that repository is deleted.
    pub async fn unmount_blob(&self, blob_id: i64, repository_id: i64) -> KeppelResult<()> {
        sqlx::query("DELETE FROM blob_mounts WHERE blob_id = ? AND repository_id = ?")
            .bind(blob_id)
            .bind(repository_id)
            .execute(self.sqlite())
            .await?;
        Ok(())
    }

    /// Sets `can_be_deleted_at` once a blob has no mounts left, marking it eligible for sweep
    /// after the grace period elapses (or clears it if the blob gained a mount again).
    pub async fn set_blob_can_be_deleted_at(
        &self,
        blob_id: i64,
        at: Option<DateTime<Utc>>,
    ) -> KeppelResult<()> {
        sqlx::query("UPDATE blobs SET can_be_deleted_at = ? WHERE id = ?")
            .bind(opt_to_text(at))
            .bind(blob_id)
            .execute(self.sqlite())
            .await?;
        Ok(())
    }

    /// Records the outcome of a BlobValidationJob attempt.
    pub async fn record_blob_validation(
        &self,
        blob_id: i64,
        next_validation_at: Option<DateTime<Utc>>,
        error_message: Option<&str>,
        failure_count: i32,
    ) -> KeppelResult<()> {
        sqlx::query(
            "UPDATE blobs SET next_validation_at = ?, validation_error_message = ?, validation_failure_count = ? \
             WHERE id = ?",
        )
        .bind(opt_to_text(next_validation_at))
        .bind(error_message)
        .bind(failure_count)
        .bind(blob_id)
        .execute(self.sqlite())
        .await?;
        Ok(())
    }

    /// Deletes a blob row outright; callers must have already removed it from storage.
    pub async fn delete_blob(&self, blob_id: i64) -> KeppelResult<()> {
        sqlx::query("DELETE FROM blob_mounts WHERE blob_id = ?")
            .bind(blob_id)
            .execute(self.sqlite())
            .await?;
        sqlx::query("DELETE FROM blobs WHERE id = ?")
            .bind(blob_id)
            .execute(self.sqlite())
            .await?;
        Ok(())
    }

    /// Lists blobs that are past due for validation.
    pub async fn list_blobs_due_for_validation(&self, limit: i64) -> KeppelResult<Vec<Blob>> {
        let rows = sqlx::query(
            "SELECT * FROM blobs WHERE next_validation_at IS NOT NULL AND next_validation_at <= ? \
             ORDER BY next_validation_at LIMIT ?",
        )
        .bind(to_text(Utc::now()))
        .bind(limit)
        .fetch_all(self.sqlite())
        .await?;

        rows.into_iter().map(row_to_blob).collect()
    }

    /// Lists blobs past their deletion grace period with no remaining mounts, for BlobSweep.
    pub async fn list_blobs_ready_for_sweep(&self, limit: i64) -> KeppelResult<Vec<Blob>> {
        let rows = sqlx::query(
            "SELECT b.* FROM blobs b \
             WHERE b.can_be_deleted_at IS NOT NULL AND b.can_be_deleted_at <= ? \
             AND NOT EXISTS (SELECT 1 FROM blob_mounts m WHERE m.blob_id = b.id) \
             ORDER BY b.can_be_deleted_at LIMIT ?",
        )
        .bind(to_text(Utc::now()))
        .bind(limit)
        .fetch_all(self.sqlite())
        .await?;

        rows.into_iter().map(row_to_blob).collect()
    }
}
