//! Entry point: parses CLI arguments (§6) and dispatches to one of the `api`, `janitor`,
//! `health-monitor` or `test-driver storage` subcommands.

use std::future::Future;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use keppel::cli::{KeppelArgs, KeppelSubcommand, TestDriverSubcommand};
use keppel::config::Config;
use keppel::db::Pool;
use keppel::inbound_cache::InboundCache;
use keppel::janitor::{self, JanitorContext, Scheduler};
use keppel::processor::Processor;
use keppel::{auth, federation, storage};
use keppel::{KeppelError, KeppelResult};

#[tokio::main]
async fn main() -> Result<(), KeppelError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = KeppelArgs::parse();

    match args.subcommand {
        KeppelSubcommand::Api {} => run_api().await,
        KeppelSubcommand::Janitor {} => run_janitor().await,
        KeppelSubcommand::HealthMonitor {} => run_health_monitor().await,
        KeppelSubcommand::TestDriver { driver } => match driver {
            TestDriverSubcommand::Storage {} => run_test_driver_storage().await,
        },
    }
}

/// Waits for SIGINT or SIGTERM, whichever comes first.
fn shutdown_signal() -> impl Future<Output = ()> {
    async {
        let ctrl_c = async {
            tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
    }
}

async fn build_processor(config: Arc<Config>) -> KeppelResult<Processor> {
    let db = Pool::connect(&config.db_uri).await?;
    let storage_driver = storage::build(&config.driver_storage)?;
    let auth_driver = auth::build(&config.driver_auth)?;
    let inbound_cache = InboundCache::new();
    Ok(Processor::new(db, storage_driver, auth_driver, inbound_cache, config))
}

async fn run_api() -> Result<(), KeppelError> {
    let config = Arc::new(Config::from_env()?);
    let federation_driver = Arc::from(federation::build(&config.driver_federation)?);
    let processor = Arc::new(build_processor(config).await?);

    info!("starting registry API");
    keppel::api::serve(processor, federation_driver, shutdown_signal()).await?;
    info!("registry API shut down cleanly");
    Ok(())
}

async fn run_janitor() -> Result<(), KeppelError> {
    let config = Arc::new(Config::from_env()?);
    let federation_driver: Arc<dyn federation::FederationDriver> =
        Arc::from(federation::build(&config.driver_federation)?);
    let processor = Arc::new(build_processor(config.clone()).await?);

    let ctx = Arc::new(JanitorContext {
        processor,
        federation: federation_driver,
    });

    let scheduler = Scheduler::new();
    let handles = scheduler.spawn_all(ctx, janitor::default_jobs());
    info!(jobs = handles.len(), "janitor started");

    let health = tokio::spawn(serve_health_endpoint(config.janitor_listen_address.clone()));

    shutdown_signal().await;
    info!("shutdown signal received, draining janitor jobs");

    let _ = scheduler.shutdown_sender().send(());
    for handle in handles {
        if let Err(error) = handle.await {
            error!(%error, "janitor job task panicked");
        }
    }
    health.abort();

    info!("janitor shut down cleanly");
    Ok(())
}

/// A minimal `/healthz` endpoint for the janitor process, polled by
/// [`run_health_monitor`]/container liveness probes.
async fn serve_health_endpoint(listen_address: String) {
    let app = axum::Router::new().route("/healthz", axum::routing::get(|| async { "ok" }));
    match tokio::net::TcpListener::bind(&listen_address).await {
        Ok(listener) => {
            if let Err(error) = axum::serve(listener, app.into_make_service()).await {
                error!(%error, "janitor health endpoint stopped");
            }
        }
        Err(error) => error!(%error, listen_address, "janitor health endpoint failed to bind"),
    }
}

/// Checks that the API and janitor processes are alive and serving, for use as a container
/// liveness/readiness probe. Exits non-zero (via the returned error) on any failure.
async fn run_health_monitor() -> Result<(), KeppelError> {
    let config = Config::from_env()?;
    let client = reqwest::Client::new();

    let api_url = format!("http://{}/v2/", config.api_listen_address);
    check_reachable(&client, &api_url).await?;

    let janitor_url = format!("http://{}/healthz", config.janitor_listen_address);
    check_reachable(&client, &janitor_url).await?;

    info!("health check passed");
    Ok(())
}

async fn check_reachable(client: &reqwest::Client, url: &str) -> Result<(), KeppelError> {
    client.get(url).send().await?;
    Ok(())
}

/// Runs a put/read/delete smoke test against the configured Storage Driver, independent of the
/// metadata store or any running server. Exercises the same driver the `api`/`janitor`
/// subcommands would use, so a misconfigured `KEPPEL_DRIVER_STORAGE` fails fast here instead of
/// during a real upload.
async fn run_test_driver_storage() -> Result<(), KeppelError> {
    let config = Config::from_env()?;
    let driver = storage::build(&config.driver_storage)?;

    const ACCOUNT: &str = "keppel-test-driver";
    const STORAGE_ID: &str = "test-driver-smoke-test";
    let payload = b"keppel test-driver storage smoke test payload".to_vec();

    driver.can_setup_account(ACCOUNT).await?;
    info!(account = ACCOUNT, "can_setup_account ok");

    driver
        .append_to_blob(ACCOUNT, STORAGE_ID, 1, Some(payload.len() as u64), payload.clone().into())
        .await?;
    driver.finalize_blob(ACCOUNT, STORAGE_ID, 1).await?;
    info!("append_to_blob/finalize_blob ok");

    let (stream, size) = driver.read_blob(ACCOUNT, STORAGE_ID).await?;
    let read_back = storage::collect_stream(stream).await?;
    if read_back != payload || size != payload.len() as u64 {
        return Err(KeppelError::InvariantViolated(
            "test-driver storage: read-back payload did not match what was written".to_string(),
        ));
    }
    info!("read_blob ok");

    driver.delete_blob(ACCOUNT, STORAGE_ID).await?;
    info!("delete_blob ok");

    driver.cleanup_account(ACCOUNT).await?;
    info!("storage driver smoke test passed");
    Ok(())
}
