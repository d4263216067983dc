//! The metadata store: a `sqlx::SqlitePool` plus migrations and typed query functions, one
//! module per entity in the data model (spec.md §3).

mod accounts;
mod blobs;
mod janitor_queries;
mod manifests;
mod peers;
mod quotas;
mod repositories;
mod sweep;
mod tags;
mod timestamps;
mod trivy;
mod uploads;

pub(crate) use timestamps::*;

pub use accounts::*;
pub use blobs::*;
pub use janitor_queries::*;
pub use manifests::*;
pub use peers::*;
pub use quotas::*;
pub use repositories::*;
pub use tags::*;
pub use trivy::*;
pub use uploads::*;

use std::path::Path;

use sqlx::migrate::Migrator;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::fs;
use tracing::info;

use crate::{KeppelError, KeppelResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Embedded migrations for the keppel metadata schema.
pub static MIGRATOR: Migrator = sqlx::migrate!("lib/db/migrations/keppel");

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The metadata store connection pool.
///
/// `KEPPEL_DB_URI` is validated at the config layer against both `sqlite://` and `postgres://`
/// schemes, but only `sqlite://` connects here; a `postgres://` URI surfaces as
/// [`KeppelError::DriverUnsupported`] at connect time rather than at config-parse time, so
/// operators get one consistent "driver not available" failure mode across every pluggable
/// backend in this build.
#[derive(Debug, Clone)]
pub struct Pool {
    sqlite: SqlitePool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Pool {
    /// Connects to `db_uri`, creating an on-disk SQLite database and running migrations if
    /// needed. `sqlite::memory:` and `sqlite://path/to/file.db` are both accepted.
    pub async fn connect(db_uri: &str) -> KeppelResult<Self> {
        if let Some(postgres_uri) = db_uri.strip_prefix("postgres://") {
            let _ = postgres_uri;
            return Err(KeppelError::DriverUnsupported(
                "postgres:// database URIs are not wired up in this build; use sqlite://"
                    .to_string(),
            ));
        }

        if let Some(path) = db_uri.strip_prefix("sqlite://") {
            if path != ":memory:" {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent).await?;
                    }
                }
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_uri)
            .await?;

        info!(db_uri, "connected to metadata store");
        MIGRATOR.run(&pool).await?;
        info!("metadata store migrations applied");

        Ok(Self { sqlite: pool })
    }

    /// Borrows the underlying SQLite pool for query functions in sibling modules.
    pub(crate) fn sqlite(&self) -> &SqlitePool {
        &self.sqlite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_and_migrates_in_memory() {
        let pool = Pool::connect("sqlite::memory:").await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM accounts")
            .fetch_one(pool.sqlite())
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn rejects_postgres_uri() {
        let err = Pool::connect("postgres://localhost/keppel").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DriverUnsupported);
    }
}
