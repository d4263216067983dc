//! Tag: a mutable name pointing at a manifest digest.

use chrono::{DateTime, Utc};
use getset::{Getters, Setters};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A mutable `repository:tag -> digest` pointer.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Setters)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct Tag {
    /// The owning repository.
    repository_id: i64,

    /// The tag name.
    name: String,

    /// The manifest digest this tag currently points at.
    digest: String,

    /// When this tag was last pushed (overwritten counts as a push).
    pushed_at: DateTime<Utc>,
}

impl Tag {
    /// Points a tag at a manifest digest.
    pub fn new(repository_id: i64, name: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            repository_id,
            name: name.into(),
            digest: digest.into(),
            pushed_at: Utc::now(),
        }
    }

    /// Reconstructs a tag read back from the database.
    pub(crate) fn from_row(
        repository_id: i64,
        name: String,
        digest: String,
        pushed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            repository_id,
            name,
            digest,
            pushed_at,
        }
    }
}
