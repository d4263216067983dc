//! CheckTrivySecurityStatusJob (§4.6): submits manifests due for a vulnerability scan to the
//! configured Trivy server and records the outcome. A deployment with no `trivy_url` configured
//! simply has nothing to poll, since [`TrivySecurityInfo`](crate::models::TrivySecurityInfo) rows
//! are only ever created once a scan is requested.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;

use crate::models::VulnerabilityStatus;
use crate::KeppelResult;

use super::{Job, JanitorContext};

const RESCAN_INTERVAL: Duration = Duration::hours(24);

/// Submits manifests to Trivy for vulnerability scanning.
pub struct CheckTrivySecurityStatusJob;

impl CheckTrivySecurityStatusJob {
    /// Builds the job.
    pub fn new() -> Self {
        Self
    }
}

impl Default for CheckTrivySecurityStatusJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Job for CheckTrivySecurityStatusJob {
    fn name(&self) -> &'static str {
        "check_trivy_security_status"
    }

    fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(30)
    }

    async fn run_once(&self, ctx: &JanitorContext) -> KeppelResult<bool> {
        let proc = &ctx.processor;
        let Some(trivy_url) = proc.config.trivy_url.clone() else {
            return Ok(false);
        };

        let due = proc.db.list_trivy_info_due(1).await?;
        let Some(mut info) = due.into_iter().next() else {
            return Ok(false);
        };

        let started_at = chrono::Utc::now();
        info.set_status(VulnerabilityStatus::Scanning);
        proc.db.upsert_trivy_info(&info).await?;

        let scan_url = format!("{trivy_url}/scan?digest={}", info.get_digest());
        let outcome = scan(proc, &scan_url).await;
        let check_duration_secs = (chrono::Utc::now() - started_at).num_seconds();

        match outcome {
            Ok(report) => {
                let vulnerable = report
                    .get("vulnerabilities")
                    .and_then(|v| v.as_array())
                    .map(|a| !a.is_empty())
                    .unwrap_or(false);
                info.set_status(if vulnerable {
                    VulnerabilityStatus::VulnerabilitiesFound
                } else {
                    VulnerabilityStatus::Clean
                });
                info.set_message(String::new());
            }
            Err(error) => {
                info.set_status(VulnerabilityStatus::Error);
                info.set_message(error.to_string());
            }
        }
        info.set_checked_at(Some(chrono::Utc::now()));
        info.set_check_duration_secs(Some(check_duration_secs));
        info.set_next_check_at(Some(chrono::Utc::now() + RESCAN_INTERVAL));
        proc.db.upsert_trivy_info(&info).await?;
        Ok(true)
    }
}

async fn scan(proc: &crate::processor::Processor, scan_url: &str) -> KeppelResult<serde_json::Value> {
    let mut request = proc.http.get(scan_url);
    if let Some(token) = &proc.config.trivy_token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?.error_for_status().map_err(crate::KeppelError::HttpRequest)?;
    Ok(response.json().await?)
}
