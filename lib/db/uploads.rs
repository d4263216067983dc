//! Typed queries for [`crate::models::Upload`] and the sweep-bookkeeping sentinels.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::db::{from_text, to_text, Pool};
use crate::models::{PendingBlob, PendingBlobReason, Upload};
use crate::{KeppelError, KeppelResult};

fn row_to_upload(row: sqlx::sqlite::SqliteRow) -> KeppelResult<Upload> {
    let uuid: String = row.try_get("uuid")?;
    Ok(Upload::from_row(
        row.try_get("repository_id")?,
        Uuid::parse_str(&uuid)
            .map_err(|e| KeppelError::InvariantViolated(format!("malformed upload uuid: {e}")))?,
        row.try_get("storage_id")?,
        row.try_get("size_bytes")?,
        row.try_get("digest")?,
        row.try_get("num_chunks")?,
        from_text(&row.try_get::<String, _>("updated_at")?)?,
    ))
}

impl Pool {
    /// Starts a new upload.
    pub async fn insert_upload(&self, upload: &Upload) -> KeppelResult<()> {
        sqlx::query(
            "INSERT INTO uploads (repository_id, uuid, storage_id, size_bytes, digest, num_chunks, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(upload.get_repository_id())
        .bind(upload.get_uuid().to_string())
        .bind(upload.get_storage_id())
        .bind(upload.get_size_bytes())
        .bind(upload.get_digest())
        .bind(upload.get_num_chunks())
        .bind(to_text(*upload.get_updated_at()))
        .execute(self.sqlite())
        .await?;
        Ok(())
    }

    /// Fetches an in-progress upload by repository and uuid.
    pub async fn get_upload(
        &self,
        repository_id: i64,
        uuid: Uuid,
    ) -> KeppelResult<Option<Upload>> {
        let row = sqlx::query("SELECT * FROM uploads WHERE repository_id = ? AND uuid = ?")
            .bind(repository_id)
            .bind(uuid.to_string())
            .fetch_optional(self.sqlite())
            .await?;

        row.map(row_to_upload).transpose()
    }

    /// Advances an upload after a chunk has been appended. `expected_num_chunks` implements
    /// optimistic concurrency control: the update is a no-op (and the caller sees 0 rows
    /// affected) if another request already advanced this upload, so chunk-ordering races are
    /// caught rather than silently overwritten.
    pub async fn advance_upload(
        &self,
        repository_id: i64,
        uuid: Uuid,
        expected_num_chunks: i32,
        new_size_bytes: i64,
        new_digest: &str,
    ) -> KeppelResult<bool> {
        let result = sqlx::query(
            "UPDATE uploads SET size_bytes = ?, digest = ?, num_chunks = ?, updated_at = ? \
             WHERE repository_id = ? AND uuid = ? AND num_chunks = ?",
        )
        .bind(new_size_bytes)
        .bind(new_digest)
        .bind(expected_num_chunks + 1)
        .bind(to_text(Utc::now()))
        .bind(repository_id)
        .bind(uuid.to_string())
        .bind(expected_num_chunks)
        .execute(self.sqlite())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes an upload, on finalize or abort.
    pub async fn delete_upload(&self, repository_id: i64, uuid: Uuid) -> KeppelResult<()> {
        sqlx::query("DELETE FROM uploads WHERE repository_id = ? AND uuid = ?")
            .bind(repository_id)
            .bind(uuid.to_string())
            .execute(self.sqlite())
            .await?;
        Ok(())
    }

    /// Lists uploads that have not been advanced since before `cutoff`, for abandoned-upload
    /// cleanup.
    pub async fn list_stale_uploads(&self, cutoff: DateTime<Utc>) -> KeppelResult<Vec<Upload>> {
        let rows = sqlx::query("SELECT * FROM uploads WHERE updated_at <= ?")
            .bind(to_text(cutoff))
            .fetch_all(self.sqlite())
            .await?;

        rows.into_iter().map(row_to_upload).collect()
    }

    /// Claims a pending-replication slot for `(account_name, digest)`, enforcing invariant I9 (at
    /// most one concurrent materialized replication per account/digest) via the table's primary
    /// key. Returns `false` if a slot is already claimed.
    pub async fn try_claim_pending_blob(&self, pending: &PendingBlob) -> KeppelResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO pending_blobs (account_name, digest, reason, since) VALUES (?, ?, ?, ?)",
        )
        .bind(pending.get_account_name())
        .bind(pending.get_digest())
        .bind(match pending.get_reason() {
            PendingBlobReason::Replication => "replication",
        })
        .bind(to_text(*pending.get_since()))
        .execute(self.sqlite())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Releases a pending-replication slot, whether the replication succeeded or failed.
    pub async fn release_pending_blob(&self, account_name: &str, digest: &str) -> KeppelResult<()> {
        sqlx::query("DELETE FROM pending_blobs WHERE account_name = ? AND digest = ?")
            .bind(account_name)
            .bind(digest)
            .execute(self.sqlite())
            .await?;
        Ok(())
    }
}
