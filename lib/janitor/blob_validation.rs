//! BlobValidationJob (§4.6): periodically re-reads a blob's bytes from storage and recomputes its
//! digest, catching silent bitrot or an out-of-band storage mutation. Three consecutive failures
//! mark the blob's storage object as corrupt by scheduling it for immediate sweep.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use sha2::{Digest as _, Sha256};

use crate::storage::collect_stream;
use crate::KeppelResult;

use super::{Job, JanitorContext};

/// How often a freshly validated blob is checked again.
const REVALIDATION_INTERVAL: Duration = Duration::days(7);
/// Consecutive validation failures before a blob is presumed corrupt.
const MAX_FAILURES: i32 = 3;

/// Re-verifies blob content digests on a rolling schedule.
pub struct BlobValidationJob;

impl BlobValidationJob {
    /// Builds the job.
    pub fn new() -> Self {
        Self
    }
}

impl Default for BlobValidationJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Job for BlobValidationJob {
    fn name(&self) -> &'static str {
        "blob_validation"
    }

    fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(60)
    }

    async fn run_once(&self, ctx: &JanitorContext) -> KeppelResult<bool> {
        let proc = &ctx.processor;
        let due = proc.db.list_blobs_due_for_validation(1).await?;
        let Some(blob) = due.into_iter().next() else {
            return Ok(false);
        };

        let result = validate(proc, &blob).await;

        match result {
            Ok(()) => {
                proc.db
                    .record_blob_validation(*blob.get_id(), Some(chrono::Utc::now() + REVALIDATION_INTERVAL), None, 0)
                    .await?;
            }
            Err(error) => {
                let failure_count = *blob.get_validation_failure_count() + 1;
                if failure_count >= MAX_FAILURES {
                    proc.db.set_blob_can_be_deleted_at(*blob.get_id(), Some(chrono::Utc::now())).await?;
                }
                proc.db
                    .record_blob_validation(
                        *blob.get_id(),
                        Some(chrono::Utc::now() + Duration::minutes(5)),
                        Some(&error.to_string()),
                        failure_count,
                    )
                    .await?;
            }
        }
        Ok(true)
    }
}

async fn validate(proc: &crate::processor::Processor, blob: &crate::models::Blob) -> KeppelResult<()> {
    let (stream, _) = proc.storage.read_blob(blob.get_account_name(), blob.get_storage_id()).await?;
    let content = collect_stream(stream).await?;
    let computed = format!("sha256:{}", hex::encode(Sha256::digest(&content)));
    if blob.get_digest().starts_with("sha256:") && &computed != blob.get_digest() {
        return Err(crate::KeppelError::DigestMismatch(format!(
            "blob {} now hashes to {computed}",
            blob.get_digest()
        )));
    }
    Ok(())
}
