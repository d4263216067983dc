//! The janitor: the background reconciliation half of keppel (§4.6). Each job family runs as its
//! own loop, independently polling the metadata store for one row due for work via the
//! optimistic-locking claim queries in [`crate::db::janitor_queries`], processing it, and sleeping
//! its own poll interval when nothing is due. A job that finds work loops immediately instead of
//! sleeping, so a backlog drains at full speed while an idle deployment stays quiet.

mod account_deletion;
mod blob_mount_sweep;
mod blob_sweep;
mod blob_validation;
mod federation_announce;
mod gc_manifests;
mod manifest_sync;
mod manifest_validation;
mod managed_accounts;
mod peer_password;
mod storage_sweep;
mod trivy_scan;

pub use account_deletion::AccountDeletionJob;
pub use blob_mount_sweep::BlobMountSweepJob;
pub use blob_sweep::BlobSweepJob;
pub use blob_validation::BlobValidationJob;
pub use federation_announce::AnnounceAccountToFederationJob;
pub use gc_manifests::GarbageCollectManifestsJob;
pub use managed_accounts::CreateManagedAccountsJob;
pub use manifest_sync::ManifestSyncJob;
pub use manifest_validation::ManifestValidationJob;
pub use peer_password::IssueNewPasswordForPeerJob;
pub use storage_sweep::StorageSweepJob;
pub use trivy_scan::CheckTrivySecurityStatusJob;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::federation::FederationDriver;
use crate::processor::Processor;
use crate::KeppelResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The shared dependencies every job needs: the data-plane orchestrator (for its db/storage/http
/// access) plus the federation driver, which the processor itself has no use for.
pub struct JanitorContext {
    /// The data-plane orchestrator; jobs reuse its db pool, storage driver and HTTP client rather
    /// than holding their own.
    pub processor: Arc<Processor>,
    /// The global account-name arbiter, used by the federation and account-deletion jobs.
    pub federation: Arc<dyn FederationDriver>,
}

/// One independent background reconciliation loop.
#[async_trait]
pub trait Job: Send + Sync {
    /// A short, stable name for logging.
    fn name(&self) -> &'static str;

    /// Claims and processes at most one unit of work. Returns `Ok(true)` if work was found and
    /// processed (the scheduler loops again immediately without sleeping), `Ok(false)` if nothing
    /// was due.
    async fn run_once(&self, ctx: &JanitorContext) -> KeppelResult<bool>;

    /// How long to sleep after a cycle that found nothing to do.
    fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(30)
    }
}

/// Runs a fixed set of [`Job`]s, each in its own task, until told to shut down.
pub struct Scheduler {
    shutdown_tx: broadcast::Sender<()>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Scheduler {
    /// Builds a scheduler with no jobs yet spawned.
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }

    /// A handle callers can use to trigger shutdown of every spawned job loop.
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Spawns one task per job, returning their join handles so a caller can await drain on
    /// shutdown.
    pub fn spawn_all(&self, ctx: Arc<JanitorContext>, jobs: Vec<Box<dyn Job>>) -> Vec<JoinHandle<()>> {
        jobs.into_iter().map(|job| self.spawn_one(ctx.clone(), job)).collect()
    }

    fn spawn_one(&self, ctx: Arc<JanitorContext>, job: Box<dyn Job>) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            info!(job = job.name(), "starting");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(job = job.name(), "shutting down");
                        return;
                    }
                    result = job.run_once(&ctx) => {
                        match result {
                            Ok(true) => continue,
                            Ok(false) => sleep(job.poll_interval()).await,
                            Err(error) => {
                                warn!(job = job.name(), %error, "job cycle failed, backing off");
                                sleep(job.poll_interval()).await;
                            }
                        }
                    }
                }
            }
        })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the standard set of jobs for a production janitor process (§4.6).
pub fn default_jobs() -> Vec<Box<dyn Job>> {
    vec![
        Box::new(BlobValidationJob::new()),
        Box::new(ManifestValidationJob::new()),
        Box::new(BlobSweepJob::new()),
        Box::new(BlobMountSweepJob::new()),
        Box::new(StorageSweepJob::new()),
        Box::new(ManifestSyncJob::new()),
        Box::new(GarbageCollectManifestsJob::new()),
        Box::new(AnnounceAccountToFederationJob::new()),
        Box::new(AccountDeletionJob::new()),
        Box::new(CreateManagedAccountsJob::new()),
        Box::new(IssueNewPasswordForPeerJob::new()),
        Box::new(CheckTrivySecurityStatusJob::new()),
    ]
}

/// Logs an error from a best-effort cleanup step without aborting the job cycle it's part of.
pub(crate) fn log_cleanup_error(job: &'static str, context: &str, error: &crate::KeppelError) {
    error!(job, context, %error, "cleanup step failed, will retry next cycle");
}
