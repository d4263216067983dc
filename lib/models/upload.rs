//! Upload: an in-progress, multi-chunk blob upload, and the sweep-bookkeeping sentinels that
//! prevent concurrent re-replication and track storage the database has lost track of.

use chrono::{DateTime, Utc};
use getset::{Getters, Setters};
use uuid::Uuid;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An in-progress, multi-chunk blob upload.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Setters)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct Upload {
    /// The repository this upload is scoped to.
    repository_id: i64,

    /// The client-visible upload handle.
    uuid: Uuid,

    /// The opaque storage id chosen at upload start.
    storage_id: String,

    /// Bytes appended so far.
    size_bytes: i64,

    /// The running sha256 digest of the bytes appended so far (data model invariant I4).
    digest: String,

    /// Number of chunks appended so far; the next chunk must use `num_chunks + 1`.
    num_chunks: i32,

    /// Last time this upload was advanced; used to expire abandoned uploads.
    updated_at: DateTime<Utc>,
}

impl Upload {
    /// Starts a new, empty upload.
    pub fn new(repository_id: i64, storage_id: impl Into<String>) -> Self {
        Self {
            repository_id,
            uuid: Uuid::new_v4(),
            storage_id: storage_id.into(),
            size_bytes: 0,
            digest: empty_sha256_hex(),
            num_chunks: 0,
            updated_at: Utc::now(),
        }
    }

    /// Reconstructs an upload read back from the database.
    pub(crate) fn from_row(
        repository_id: i64,
        uuid: Uuid,
        storage_id: String,
        size_bytes: i64,
        digest: String,
        num_chunks: i32,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            repository_id,
            uuid,
            storage_id,
            size_bytes,
            digest,
            num_chunks,
            updated_at,
        }
    }
}

/// The sha256 of zero bytes, the running digest's initial value.
fn empty_sha256_hex() -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest([]))
}

/// Why a [`PendingBlob`] row exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingBlobReason {
    /// Materializing a blob lazily pulled during replication.
    Replication,
}

/// A sentinel row that prevents concurrent re-replication of the same blob into the same account
/// (data model invariant I9: at most one concurrent materialized replication per (account, digest)).
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct PendingBlob {
    /// The account the blob is being replicated into.
    account_name: String,
    /// The digest being fetched.
    digest: String,
    /// Why this row exists.
    reason: PendingBlobReason,
    /// When the replication attempt started.
    since: DateTime<Utc>,
}

impl PendingBlob {
    /// Claims a new pending-replication slot.
    pub fn new_replication(account_name: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            account_name: account_name.into(),
            digest: digest.into(),
            reason: PendingBlobReason::Replication,
            since: Utc::now(),
        }
    }
}

/// A blob StorageSweep found in storage but not in metadata, retained for a grace period before
/// deletion so that an in-flight finalize racing the sweep is not destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct UnknownBlob {
    account_name: String,
    storage_id: String,
    can_be_deleted_at: DateTime<Utc>,
}

impl UnknownBlob {
    /// Records a newly discovered orphan blob, eligible for deletion after `grace`.
    pub fn new(
        account_name: impl Into<String>,
        storage_id: impl Into<String>,
        grace: chrono::Duration,
    ) -> Self {
        Self {
            account_name: account_name.into(),
            storage_id: storage_id.into(),
            can_be_deleted_at: Utc::now() + grace,
        }
    }

    /// Reconstructs an orphan-blob record read back from the database.
    pub(crate) fn from_row(
        account_name: String,
        storage_id: String,
        can_be_deleted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account_name,
            storage_id,
            can_be_deleted_at,
        }
    }
}

/// A manifest StorageSweep found in storage but not in metadata.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct UnknownManifest {
    account_name: String,
    repository_name: String,
    digest: String,
    can_be_deleted_at: DateTime<Utc>,
}

impl UnknownManifest {
    /// Records a newly discovered orphan manifest, eligible for deletion after `grace`.
    pub fn new(
        account_name: impl Into<String>,
        repository_name: impl Into<String>,
        digest: impl Into<String>,
        grace: chrono::Duration,
    ) -> Self {
        Self {
            account_name: account_name.into(),
            repository_name: repository_name.into(),
            digest: digest.into(),
            can_be_deleted_at: Utc::now() + grace,
        }
    }

    /// Reconstructs an orphan-manifest record read back from the database.
    pub(crate) fn from_row(
        account_name: String,
        repository_name: String,
        digest: String,
        can_be_deleted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account_name,
            repository_name,
            digest,
            can_be_deleted_at,
        }
    }
}
