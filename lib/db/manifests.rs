//! Typed queries for [`crate::models::Manifest`] and its content/reference edges.

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::db::{from_text, opt_from_text, opt_to_text, to_text, Pool};
use crate::models::{Manifest, ManifestBlobRef, ManifestContent, ManifestManifestRef};
use crate::KeppelResult;

fn row_to_manifest(row: sqlx::sqlite::SqliteRow) -> KeppelResult<Manifest> {
    Ok(Manifest::from_row(
        row.try_get("repository_id")?,
        row.try_get("digest")?,
        row.try_get("media_type")?,
        row.try_get("size_bytes")?,
        from_text(&row.try_get::<String, _>("pushed_at")?)?,
        opt_from_text(row.try_get("next_validation_at")?)?,
        row.try_get("validation_error_message")?,
        opt_from_text(row.try_get("last_pulled_at")?)?,
        serde_json::from_str(&row.try_get::<String, _>("labels_json")?)?,
        row.try_get::<Option<String>, _>("gc_status_json")?
            .map(|s| serde_json::from_str(&s))
            .transpose()?
            .unwrap_or(serde_json::Value::Null),
        opt_from_text(row.try_get("min_layer_created_at")?)?,
        opt_from_text(row.try_get("max_layer_created_at")?)?,
        serde_json::from_str(&row.try_get::<String, _>("annotations_json")?)?,
        row.try_get("artifact_type")?,
        row.try_get("subject_digest")?,
    ))
}

/// Outcome of [`Pool::insert_manifest_with_quota_check`]: whether the manifest was freshly
/// inserted, or had already been pushed by a racing request and was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestInsertOutcome {
    Inserted,
    AlreadyPresent,
}

async fn insert_manifest_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    manifest: &Manifest,
    content: &[u8],
) -> KeppelResult<()> {
    sqlx::query(
        "INSERT INTO manifests (
            repository_id, digest, media_type, size_bytes, pushed_at,
            labels_json, annotations_json, artifact_type, subject_digest
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(manifest.get_repository_id())
    .bind(manifest.get_digest())
    .bind(manifest.get_media_type())
    .bind(manifest.get_size_bytes())
    .bind(to_text(*manifest.get_pushed_at()))
    .bind(serde_json::to_string(manifest.get_labels_json())?)
    .bind(serde_json::to_string(manifest.get_annotations_json())?)
    .bind(manifest.get_artifact_type())
    .bind(manifest.get_subject_digest())
    .execute(&mut **tx)
    .await?;

    sqlx::query("INSERT INTO manifest_contents (repository_id, digest, content) VALUES (?, ?, ?)")
        .bind(manifest.get_repository_id())
        .bind(manifest.get_digest())
        .bind(content)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn insert_edge_rows(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    blob_refs: &[ManifestBlobRef],
    manifest_refs: &[ManifestManifestRef],
) -> KeppelResult<()> {
    for reference in blob_refs {
        sqlx::query(
            "INSERT OR IGNORE INTO manifest_blob_refs (repository_id, parent_digest, blob_digest) VALUES (?, ?, ?)",
        )
        .bind(reference.repository_id)
        .bind(&reference.parent_digest)
        .bind(&reference.blob_digest)
        .execute(&mut **tx)
        .await?;
    }
    for reference in manifest_refs {
        sqlx::query(
            "INSERT OR IGNORE INTO manifest_manifest_refs (repository_id, parent_digest, child_digest) VALUES (?, ?, ?)",
        )
        .bind(reference.repository_id)
        .bind(&reference.parent_digest)
        .bind(&reference.child_digest)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

impl Pool {
    /// Inserts a manifest, its content and its blob/manifest reference edges in one transaction
    /// (invariant I1: a manifest row never exists without its complete edge set), for paths that
    /// have already resolved the edges and don't need a quota check — namely replicating a
    /// manifest pulled from upstream.
    pub async fn insert_manifest_with_edges(
        &self,
        manifest: &Manifest,
        content: &[u8],
        blob_refs: &[ManifestBlobRef],
        manifest_refs: &[ManifestManifestRef],
    ) -> KeppelResult<()> {
        let mut tx = self.sqlite().begin().await?;
        insert_manifest_row(&mut tx, manifest, content).await?;
        insert_edge_rows(&mut tx, blob_refs, manifest_refs).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Atomically re-checks that `digest` is still absent, counts the tenant's current manifest
    /// usage, enforces its quota, and inserts the manifest/content/edge rows — all under a
    /// `BEGIN IMMEDIATE` transaction. SQLite grants that statement a write lock up front, so a
    /// second concurrent push against the same tenant blocks until the first commits instead of
    /// reading a stale usage count; two racing pushes can never both pass the quota check
    /// (invariant I7/property P9), and a crash can never leave the manifest row without its edges
    /// (invariant I1).
    pub async fn insert_manifest_with_quota_check(
        &self,
        auth_tenant_id: &str,
        manifest: &Manifest,
        content: &[u8],
        blob_refs: &[ManifestBlobRef],
        manifest_refs: &[ManifestManifestRef],
    ) -> KeppelResult<ManifestInsertOutcome> {
        let mut tx = self.sqlite().begin_with("BEGIN IMMEDIATE").await?;

        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM manifests WHERE repository_id = ? AND digest = ?",
        )
        .bind(manifest.get_repository_id())
        .bind(manifest.get_digest())
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            tx.commit().await?;
            return Ok(ManifestInsertOutcome::AlreadyPresent);
        }

        let usage: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM manifests m \
             JOIN repositories r ON r.id = m.repository_id \
             JOIN accounts a ON a.name = r.account_name \
             WHERE a.auth_tenant_id = ?",
        )
        .bind(auth_tenant_id)
        .fetch_one(&mut *tx)
        .await?;

        let quota_limit: Option<(i64,)> =
            sqlx::query_as("SELECT manifest_count_limit FROM quotas WHERE auth_tenant_id = ?")
                .bind(auth_tenant_id)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some((limit,)) = quota_limit {
            crate::models::Quotas::new(auth_tenant_id, limit).check_manifest_push(usage.0)?;
        }

        insert_manifest_row(&mut tx, manifest, content).await?;
        insert_edge_rows(&mut tx, blob_refs, manifest_refs).await?;

        tx.commit().await?;
        Ok(ManifestInsertOutcome::Inserted)
    }

    /// Fetches a manifest by repository and digest.
    pub async fn get_manifest(
        &self,
        repository_id: i64,
        digest: &str,
    ) -> KeppelResult<Option<Manifest>> {
        let row = sqlx::query("SELECT * FROM manifests WHERE repository_id = ? AND digest = ?")
            .bind(repository_id)
            .bind(digest)
            .fetch_optional(self.sqlite())
            .await?;

        row.map(row_to_manifest).transpose()
    }

    /// Fetches a manifest's immutable serialized content.
    pub async fn get_manifest_content(
        &self,
        repository_id: i64,
        digest: &str,
    ) -> KeppelResult<Option<ManifestContent>> {
        let row = sqlx::query(
            "SELECT repository_id, digest, content FROM manifest_contents WHERE repository_id = ? AND digest = ?",
        )
        .bind(repository_id)
        .bind(digest)
        .fetch_optional(self.sqlite())
        .await?;

        row.map(|r| {
            Ok(ManifestContent {
                repository_id: r.try_get("repository_id")?,
                digest: r.try_get("digest")?,
                content: r.try_get("content")?,
            })
        })
        .transpose()
    }

    /// Counts how many manifests a given auth tenant currently owns, across every account it
    /// owns, for quota enforcement (invariant I7).
    pub async fn count_manifests_for_tenant(&self, auth_tenant_id: &str) -> KeppelResult<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM manifests m \
             JOIN repositories r ON r.id = m.repository_id \
             JOIN accounts a ON a.name = r.account_name \
             WHERE a.auth_tenant_id = ?",
        )
        .bind(auth_tenant_id)
        .fetch_one(self.sqlite())
        .await?;
        Ok(row.0)
    }

    /// Lists the blob digests a manifest directly references.
    pub async fn list_manifest_blob_refs(
        &self,
        repository_id: i64,
        parent_digest: &str,
    ) -> KeppelResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT blob_digest FROM manifest_blob_refs WHERE repository_id = ? AND parent_digest = ?",
        )
        .bind(repository_id)
        .bind(parent_digest)
        .fetch_all(self.sqlite())
        .await?;
        Ok(rows.into_iter().map(|(d,)| d).collect())
    }

    /// Lists the child manifest digests a manifest (typically an index) directly references.
    pub async fn list_manifest_manifest_refs(
        &self,
        repository_id: i64,
        parent_digest: &str,
    ) -> KeppelResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT child_digest FROM manifest_manifest_refs WHERE repository_id = ? AND parent_digest = ?",
        )
        .bind(repository_id)
        .bind(parent_digest)
        .fetch_all(self.sqlite())
        .await?;
        Ok(rows.into_iter().map(|(d,)| d).collect())
    }

    /// Whether any manifest in the repository still references `digest` as a child, used before
    /// deleting a manifest or unmounting its blobs.
    pub async fn is_manifest_referenced(
        &self,
        repository_id: i64,
        digest: &str,
    ) -> KeppelResult<bool> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM manifest_manifest_refs WHERE repository_id = ? AND child_digest = ?",
        )
        .bind(repository_id)
        .bind(digest)
        .fetch_one(self.sqlite())
        .await?;
        Ok(row.0 > 0)
    }

    /// Deletes a manifest, its content, its outgoing reference edges and any tags pointing at it.
    /// Callers are responsible for evaluating whether the blobs it referenced should now be
    /// unmounted (invariant I8).
    pub async fn delete_manifest(&self, repository_id: i64, digest: &str) -> KeppelResult<()> {
        let mut tx = self.sqlite().begin().await?;

        sqlx::query("DELETE FROM tags WHERE repository_id = ? AND digest = ?")
            .bind(repository_id)
            .bind(digest)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM manifest_blob_refs WHERE repository_id = ? AND parent_digest = ?")
            .bind(repository_id)
            .bind(digest)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM manifest_manifest_refs WHERE repository_id = ? AND parent_digest = ?")
            .bind(repository_id)
            .bind(digest)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM manifest_contents WHERE repository_id = ? AND digest = ?")
            .bind(repository_id)
            .bind(digest)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM manifests WHERE repository_id = ? AND digest = ?")
            .bind(repository_id)
            .bind(digest)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Records a client pull, advancing `last_pulled_at` for GC-policy evaluation.
    pub async fn record_manifest_pull(&self, repository_id: i64, digest: &str) -> KeppelResult<()> {
        sqlx::query("UPDATE manifests SET last_pulled_at = ? WHERE repository_id = ? AND digest = ?")
            .bind(to_text(Utc::now()))
            .bind(repository_id)
            .bind(digest)
            .execute(self.sqlite())
            .await?;
        Ok(())
    }

    /// Lists manifests past due for validation in a repository.
    pub async fn list_manifests_due_for_validation(
        &self,
        repository_id: i64,
        limit: i64,
    ) -> KeppelResult<Vec<Manifest>> {
        let rows = sqlx::query(
            "SELECT * FROM manifests WHERE repository_id = ? \
             AND next_validation_at IS NOT NULL AND next_validation_at <= ? \
             ORDER BY next_validation_at LIMIT ?",
        )
        .bind(repository_id)
        .bind(to_text(Utc::now()))
        .bind(limit)
        .fetch_all(self.sqlite())
        .await?;

        rows.into_iter().map(row_to_manifest).collect()
    }

    /// Sets the next validation timestamp for a manifest.
    pub async fn set_manifest_next_validation_at(
        &self,
        repository_id: i64,
        digest: &str,
        at: Option<DateTime<Utc>>,
    ) -> KeppelResult<()> {
        sqlx::query("UPDATE manifests SET next_validation_at = ? WHERE repository_id = ? AND digest = ?")
            .bind(opt_to_text(at))
            .bind(repository_id)
            .bind(digest)
            .execute(self.sqlite())
            .await?;
        Ok(())
    }

    /// Lists every manifest in a repository, for GC policy evaluation.
    pub async fn list_manifests(&self, repository_id: i64) -> KeppelResult<Vec<Manifest>> {
        let rows = sqlx::query("SELECT * FROM manifests WHERE repository_id = ?")
            .bind(repository_id)
            .fetch_all(self.sqlite())
            .await?;

        rows.into_iter().map(row_to_manifest).collect()
    }
}
