//! Blob and BlobMount: content-addressed, account-owned byte objects and their repository
//! visibility edges.

use chrono::{DateTime, Utc};
use getset::{Getters, Setters};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A content-addressed blob, owned by an account (not a repository) so that cross-repository
/// mounts never require copying bytes.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Setters)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct Blob {
    /// Database row id.
    id: i64,

    /// The owning account's name.
    account_name: String,

    /// The content digest, `algorithm:hex`.
    digest: String,

    /// Exact byte size of the blob.
    size_bytes: i64,

    /// The opaque storage id chosen at upload start, before the digest was known.
    storage_id: String,

    /// The declared media type of the blob.
    media_type: String,

    /// When this blob was finalized.
    pushed_at: DateTime<Utc>,

    /// Next time BlobValidationJob should re-verify this blob's digest.
    next_validation_at: Option<DateTime<Utc>>,

    /// The error message from the most recent failed validation, if any.
    validation_error_message: Option<String>,

    /// Consecutive validation failures; three trips deletion eligibility.
    validation_failure_count: i32,

    /// Set once this blob has no mounts and is eligible for sweep after this time.
    can_be_deleted_at: Option<DateTime<Utc>>,

    /// Tri-state override for whether this blob should be excluded from vulnerability scanning:
    /// `None` defers to account policy, `Some(true)`/`Some(false)` force it on/off.
    blocks_vuln_scanning: Option<bool>,
}

/// The many-to-many relation that makes a [`Blob`] visible inside a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobMount {
    /// The mounted blob's row id.
    pub blob_id: i64,
    /// The repository the blob is visible in.
    pub repository_id: i64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Blob {
    /// Builds a new finalized blob record.
    pub fn new(
        account_name: impl Into<String>,
        digest: impl Into<String>,
        size_bytes: i64,
        storage_id: impl Into<String>,
        media_type: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            account_name: account_name.into(),
            digest: digest.into(),
            size_bytes,
            storage_id: storage_id.into(),
            media_type: media_type.into(),
            pushed_at: Utc::now(),
            next_validation_at: None,
            validation_error_message: None,
            validation_failure_count: 0,
            can_be_deleted_at: None,
            blocks_vuln_scanning: None,
        }
    }

    /// Reconstructs a blob read back from the database, with its assigned id.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_row(
        id: i64,
        account_name: String,
        digest: String,
        size_bytes: i64,
        storage_id: String,
        media_type: String,
        pushed_at: DateTime<Utc>,
        next_validation_at: Option<DateTime<Utc>>,
        validation_error_message: Option<String>,
        validation_failure_count: i32,
        can_be_deleted_at: Option<DateTime<Utc>>,
        blocks_vuln_scanning: Option<bool>,
    ) -> Self {
        Self {
            id,
            account_name,
            digest,
            size_bytes,
            storage_id,
            media_type,
            pushed_at,
            next_validation_at,
            validation_error_message,
            validation_failure_count,
            can_be_deleted_at,
            blocks_vuln_scanning,
        }
    }
}
