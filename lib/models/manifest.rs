//! Manifest and its content/reference edges.

use chrono::{DateTime, Utc};
use getset::{Getters, Setters};
use serde_json::Value;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A manifest: a signed descriptor document referencing blobs and/or other manifests.
#[derive(Debug, Clone, PartialEq, Getters, Setters)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct Manifest {
    /// The repository this manifest belongs to.
    repository_id: i64,

    /// The manifest's content digest.
    digest: String,

    /// The manifest's declared media type.
    media_type: String,

    /// Size in bytes of the serialized manifest.
    size_bytes: i64,

    /// When this manifest was first pushed.
    pushed_at: DateTime<Utc>,

    /// Next time ManifestValidationJob should re-verify this manifest.
    next_validation_at: Option<DateTime<Utc>>,

    /// The error message from the most recent failed validation, if any.
    validation_error_message: Option<String>,

    /// When this manifest was last pulled by a client, for LRU-style GC policies.
    last_pulled_at: Option<DateTime<Utc>>,

    /// OCI annotation-derived labels, validated against an account's `required_labels`.
    labels_json: Value,

    /// Opaque record of which GC rule, if any, most recently evaluated/kept this manifest.
    gc_status_json: Value,

    /// The earliest `created` timestamp among this manifest's layers, if known.
    min_layer_created_at: Option<DateTime<Utc>>,

    /// The latest `created` timestamp among this manifest's layers, if known.
    max_layer_created_at: Option<DateTime<Utc>>,

    /// Raw OCI annotations.
    annotations_json: Value,

    /// The OCI `artifactType`, if the manifest declares one.
    artifact_type: Option<String>,

    /// The digest of the manifest this one is a `subject` of, if any.
    subject_digest: Option<String>,
}

/// The immutable serialized bytes of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestContent {
    /// The owning repository.
    pub repository_id: i64,
    /// The manifest's digest.
    pub digest: String,
    /// The raw serialized manifest bytes.
    pub content: Vec<u8>,
}

/// A parent manifest -> child blob edge within a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestBlobRef {
    /// The repository both the manifest and blob mount live in.
    pub repository_id: i64,
    /// The parent manifest's digest.
    pub parent_digest: String,
    /// The referenced blob's digest.
    pub blob_digest: String,
}

/// A parent manifest -> child manifest edge within a repository (image index entries, or an OCI
/// `subject` reference).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestManifestRef {
    /// The repository both manifests live in.
    pub repository_id: i64,
    /// The parent manifest's digest.
    pub parent_digest: String,
    /// The referenced child manifest's digest.
    pub child_digest: String,
}

impl Manifest {
    /// Builds a new manifest record.
    pub fn new(
        repository_id: i64,
        digest: impl Into<String>,
        media_type: impl Into<String>,
        size_bytes: i64,
    ) -> Self {
        Self {
            repository_id,
            digest: digest.into(),
            media_type: media_type.into(),
            size_bytes,
            pushed_at: Utc::now(),
            next_validation_at: None,
            validation_error_message: None,
            last_pulled_at: None,
            labels_json: Value::Object(Default::default()),
            gc_status_json: Value::Null,
            min_layer_created_at: None,
            max_layer_created_at: None,
            annotations_json: Value::Object(Default::default()),
            artifact_type: None,
            subject_digest: None,
        }
    }

    /// Reconstructs a manifest read back from the database.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_row(
        repository_id: i64,
        digest: String,
        media_type: String,
        size_bytes: i64,
        pushed_at: DateTime<Utc>,
        next_validation_at: Option<DateTime<Utc>>,
        validation_error_message: Option<String>,
        last_pulled_at: Option<DateTime<Utc>>,
        labels_json: Value,
        gc_status_json: Value,
        min_layer_created_at: Option<DateTime<Utc>>,
        max_layer_created_at: Option<DateTime<Utc>>,
        annotations_json: Value,
        artifact_type: Option<String>,
        subject_digest: Option<String>,
    ) -> Self {
        Self {
            repository_id,
            digest,
            media_type,
            size_bytes,
            pushed_at,
            next_validation_at,
            validation_error_message,
            last_pulled_at,
            labels_json,
            gc_status_json,
            min_layer_created_at,
            max_layer_created_at,
            annotations_json,
            artifact_type,
            subject_digest,
        }
    }
}
