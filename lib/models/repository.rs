//! Repository: a slash-separated path namespace within an account.

use chrono::{DateTime, Utc};
use getset::Getters;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A repository, unique per `(account_name, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Repository {
    /// Database row id.
    id: i64,

    /// The owning account's name.
    account_name: String,

    /// The repository's account-relative name (may contain slashes).
    name: String,

    /// Next time BlobMountSweepJob should reconcile this repository.
    next_blob_mount_sweep_at: Option<DateTime<Utc>>,

    /// Next time ManifestSyncJob should reconcile this repository (replica accounts only).
    next_manifest_sync_at: Option<DateTime<Utc>>,

    /// Next time GarbageCollectManifestsJob should evaluate this repository.
    next_gc_at: Option<DateTime<Utc>>,
}

impl Repository {
    /// Builds a new repository record (id is assigned by the database on insert).
    pub fn new(account_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            account_name: account_name.into(),
            name: name.into(),
            next_blob_mount_sweep_at: None,
            next_manifest_sync_at: None,
            next_gc_at: None,
        }
    }

    /// The repository's full name, `account/name`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.account_name, self.name)
    }

    /// Reconstructs a repository read back from the database, with its assigned id.
    pub(crate) fn from_row(
        id: i64,
        account_name: String,
        name: String,
        next_blob_mount_sweep_at: Option<DateTime<Utc>>,
        next_manifest_sync_at: Option<DateTime<Utc>>,
        next_gc_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            account_name,
            name,
            next_blob_mount_sweep_at,
            next_manifest_sync_at,
            next_gc_at,
        }
    }
}
