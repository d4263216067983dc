//! ManifestValidationJob (§4.6): periodically re-reads a manifest's stored bytes and re-parses
//! them, catching storage corruption or a parser regression the same way BlobValidationJob does
//! for blob content. There is no per-repository schedule column to claim directly, so each cycle
//! walks repositories looking for the first one with work due.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;

use crate::KeppelResult;

use super::{Job, JanitorContext};

const REVALIDATION_INTERVAL: Duration = Duration::days(7);

/// Re-verifies manifest content on a rolling schedule.
pub struct ManifestValidationJob;

impl ManifestValidationJob {
    /// Builds the job.
    pub fn new() -> Self {
        Self
    }
}

impl Default for ManifestValidationJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Job for ManifestValidationJob {
    fn name(&self) -> &'static str {
        "manifest_validation"
    }

    fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(60)
    }

    async fn run_once(&self, ctx: &JanitorContext) -> KeppelResult<bool> {
        let proc = &ctx.processor;
        for repo in proc.db.list_all_repositories().await? {
            let due = proc.db.list_manifests_due_for_validation(*repo.get_id(), 1).await?;
            let Some(manifest) = due.into_iter().next() else {
                continue;
            };

            let result = validate(proc, *repo.get_id(), &manifest).await;
            match result {
                Ok(()) => {
                    proc.db
                        .set_manifest_next_validation_at(
                            *repo.get_id(),
                            manifest.get_digest(),
                            Some(chrono::Utc::now() + REVALIDATION_INTERVAL),
                        )
                        .await?;
                }
                Err(_error) => {
                    proc.db
                        .set_manifest_next_validation_at(
                            *repo.get_id(),
                            manifest.get_digest(),
                            Some(chrono::Utc::now() + Duration::minutes(5)),
                        )
                        .await?;
                }
            }
            return Ok(true);
        }
        Ok(false)
    }
}

async fn validate(
    proc: &crate::processor::Processor,
    repository_id: i64,
    manifest: &crate::models::Manifest,
) -> KeppelResult<()> {
    let Some(content) = proc.db.get_manifest_content(repository_id, manifest.get_digest()).await? else {
        return Err(crate::KeppelError::NotFound(format!(
            "manifest content for {}",
            manifest.get_digest()
        )));
    };
    crate::processor::parse_manifest(manifest.get_media_type(), &content.content)?;
    Ok(())
}
