//! Typed queries for [`crate::models::TrivySecurityInfo`].

use chrono::Utc;
use sqlx::Row;

use crate::db::{from_text, opt_from_text, opt_to_text, to_text, Pool};
use crate::models::{TrivySecurityInfo, VulnerabilityStatus};
use crate::{KeppelError, KeppelResult};

fn row_to_info(row: sqlx::sqlite::SqliteRow) -> KeppelResult<TrivySecurityInfo> {
    let status_text: String = row.try_get("status")?;
    let status = VulnerabilityStatus::from_str(&status_text).ok_or_else(|| {
        KeppelError::InvariantViolated(format!("unknown trivy status {status_text:?}"))
    })?;

    Ok(TrivySecurityInfo::from_row(
        row.try_get("repository_id")?,
        row.try_get("digest")?,
        status,
        row.try_get("message")?,
        opt_from_text(row.try_get("next_check_at")?)?,
        opt_from_text(row.try_get("checked_at")?)?,
        row.try_get("check_duration_secs")?,
    ))
}

impl Pool {
    /// Creates or overwrites a manifest's scan record.
    pub async fn upsert_trivy_info(&self, info: &TrivySecurityInfo) -> KeppelResult<()> {
        sqlx::query(
            "INSERT INTO trivy_security_info (repository_id, digest, status, message, next_check_at, checked_at, check_duration_secs) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (repository_id, digest) DO UPDATE SET \
               status = excluded.status, message = excluded.message, next_check_at = excluded.next_check_at, \
               checked_at = excluded.checked_at, check_duration_secs = excluded.check_duration_secs",
        )
        .bind(info.get_repository_id())
        .bind(info.get_digest())
        .bind(info.get_status().as_str())
        .bind(info.get_message())
        .bind(opt_to_text(*info.get_next_check_at()))
        .bind(opt_to_text(*info.get_checked_at()))
        .bind(info.get_check_duration_secs())
        .execute(self.sqlite())
        .await?;
        Ok(())
    }

    /// Fetches a manifest's scan record.
    pub async fn get_trivy_info(
        &self,
        repository_id: i64,
        digest: &str,
    ) -> KeppelResult<Option<TrivySecurityInfo>> {
        let row = sqlx::query(
            "SELECT * FROM trivy_security_info WHERE repository_id = ? AND digest = ?",
        )
        .bind(repository_id)
        .bind(digest)
        .fetch_optional(self.sqlite())
        .await?;

        row.map(row_to_info).transpose()
    }

    /// Lists scan records due for a (re-)check.
    pub async fn list_trivy_info_due(&self, limit: i64) -> KeppelResult<Vec<TrivySecurityInfo>> {
        let rows = sqlx::query(
            "SELECT * FROM trivy_security_info WHERE next_check_at IS NOT NULL AND next_check_at <= ? \
             ORDER BY next_check_at LIMIT ?",
        )
        .bind(to_text(Utc::now()))
        .bind(limit)
        .fetch_all(self.sqlite())
        .await?;

        rows.into_iter().map(row_to_info).collect()
    }
}
