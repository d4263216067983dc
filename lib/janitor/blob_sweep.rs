//! BlobSweepJob (§4.6): the second half of invariant I8. Deletes blobs whose grace period (set by
//! [`crate::processor`] when their last mount was removed) has elapsed and that still have no
//! mounts, removing both the storage object and the metadata row.

use std::time::Duration as StdDuration;

use async_trait::async_trait;

use crate::KeppelResult;

use super::{log_cleanup_error, Job, JanitorContext};

/// Deletes blobs past their deletion grace period.
pub struct BlobSweepJob;

impl BlobSweepJob {
    /// Builds the job.
    pub fn new() -> Self {
        Self
    }
}

impl Default for BlobSweepJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Job for BlobSweepJob {
    fn name(&self) -> &'static str {
        "blob_sweep"
    }

    fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(60)
    }

    async fn run_once(&self, ctx: &JanitorContext) -> KeppelResult<bool> {
        let proc = &ctx.processor;
        let due = proc.db.list_blobs_ready_for_sweep(1).await?;
        let Some(blob) = due.into_iter().next() else {
            return Ok(false);
        };

        if let Err(error) = proc.storage.delete_blob(blob.get_account_name(), blob.get_storage_id()).await {
            if error.kind() != crate::ErrorKind::NotFound {
                log_cleanup_error(self.name(), "delete_blob", &error);
                return Ok(true);
            }
        }
        proc.db.delete_blob(*blob.get_id()).await?;
        Ok(true)
    }
}
