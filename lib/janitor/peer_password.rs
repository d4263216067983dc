//! IssueNewPasswordForPeerJob (§4.6/§4.7): periodically rotates the password this deployment
//! presents to each known peer, pushing it to the peer's `/keppel/v1/auth/peering` endpoint so
//! both sides agree before the old password is retired from our own outbound requests.
//!
//! Peers have no due-date column of their own (unlike the claim-queue jobs), so this job simply
//! rotates every peer once per cycle and relies on its long [`Job::poll_interval`] to pace itself.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use rand::Rng;

use crate::KeppelResult;

use super::{log_cleanup_error, Job, JanitorContext};

const PASSWORD_LEN: usize = 32;

/// Rotates outbound peer passwords on a rolling schedule.
pub struct IssueNewPasswordForPeerJob;

impl IssueNewPasswordForPeerJob {
    /// Builds the job.
    pub fn new() -> Self {
        Self
    }
}

impl Default for IssueNewPasswordForPeerJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Job for IssueNewPasswordForPeerJob {
    fn name(&self) -> &'static str {
        "issue_new_password_for_peer"
    }

    fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(24 * 3600)
    }

    async fn run_once(&self, ctx: &JanitorContext) -> KeppelResult<bool> {
        let proc = &ctx.processor;
        let peers = proc.db.list_peers().await?;
        if peers.is_empty() {
            return Ok(false);
        }

        for peer in peers {
            let new_password = generate_password();
            let url = format!("https://{}/keppel/v1/auth/peering", peer.get_hostname());
            // Authenticate with the password the peer already has on file for us; the new
            // password travels in the body and only takes effect once the peer accepts it.
            let result = proc
                .http
                .post(&url)
                .basic_auth(&proc.config.peer_hostname, peer.get_our_password().as_deref())
                .json(&serde_json::json!({"peer": proc.config.peer_hostname, "password": new_password}))
                .send()
                .await;

            match result {
                Ok(_) => {
                    proc.db
                        .update_peer_our_password(peer.get_hostname(), &new_password, chrono::Utc::now())
                        .await?;
                }
                Err(error) => {
                    let error: crate::KeppelError = error.into();
                    log_cleanup_error(self.name(), "announce_new_password", &error);
                }
            }
        }
        Ok(false)
    }
}

fn generate_password() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}
