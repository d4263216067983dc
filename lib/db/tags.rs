//! Typed queries for [`crate::models::Tag`].

use sqlx::Row;

use crate::db::{from_text, to_text, Pool};
use crate::models::Tag;
use crate::KeppelResult;

fn row_to_tag(row: sqlx::sqlite::SqliteRow) -> KeppelResult<Tag> {
    Ok(Tag::from_row(
        row.try_get("repository_id")?,
        row.try_get("name")?,
        row.try_get("digest")?,
        from_text(&row.try_get::<String, _>("pushed_at")?)?,
    ))
}

impl Pool {
    /// Points a tag at a manifest digest, creating or overwriting it.
    pub async fn upsert_tag(&self, tag: &Tag) -> KeppelResult<()> {
        sqlx::query(
            "INSERT INTO tags (repository_id, name, digest, pushed_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT (repository_id, name) DO UPDATE SET digest = excluded.digest, pushed_at = excluded.pushed_at",
        )
        .bind(tag.get_repository_id())
        .bind(tag.get_name())
        .bind(tag.get_digest())
        .bind(to_text(*tag.get_pushed_at()))
        .execute(self.sqlite())
        .await?;
        Ok(())
    }

    /// Fetches a tag by repository and name.
    pub async fn get_tag(&self, repository_id: i64, name: &str) -> KeppelResult<Option<Tag>> {
        let row = sqlx::query("SELECT * FROM tags WHERE repository_id = ? AND name = ?")
            .bind(repository_id)
            .bind(name)
            .fetch_optional(self.sqlite())
            .await?;

        row.map(row_to_tag).transpose()
    }

    /// Lists every tag in a repository.
    pub async fn list_tags(&self, repository_id: i64) -> KeppelResult<Vec<Tag>> {
        let rows = sqlx::query("SELECT * FROM tags WHERE repository_id = ? ORDER BY name")
            .bind(repository_id)
            .fetch_all(self.sqlite())
            .await?;

        rows.into_iter().map(row_to_tag).collect()
    }

    /// Deletes a single tag.
    pub async fn delete_tag(&self, repository_id: i64, name: &str) -> KeppelResult<()> {
        sqlx::query("DELETE FROM tags WHERE repository_id = ? AND name = ?")
            .bind(repository_id)
            .bind(name)
            .execute(self.sqlite())
            .await?;
        Ok(())
    }
}
