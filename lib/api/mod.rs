//! The HTTP surface (§4.5): the OCI/Docker Registry v2 API under `/v2/` and the proprietary
//! account-management API under `/keppel/v1/`. Both are thin — every handler parses its request,
//! calls into [`crate::processor::Processor`] or a driver, and maps the result onto the wire
//! format its surface uses. No registry- or account-semantics live here.

mod error;
mod middleware;
mod state;

mod account;
mod registry;

pub use error::{KeppelApiError, RegistryApiError};
pub use state::ApiState;

use std::sync::Arc;

use axum::Router;

use crate::federation::FederationDriver;
use crate::processor::Processor;
use crate::token::TokenService;
use crate::KeppelResult;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the full router: the registry v2 surface and the `/keppel/v1/` account API, sharing one
/// [`ApiState`]. Each surface attaches its own auth middleware and binds `state` itself, since the
/// two disagree on how requests authenticate (§4.3); the result is ready to serve with no further
/// `with_state` call.
pub fn create_router(state: ApiState) -> Router {
    registry::router(state.clone()).merge(account::router(state))
}

/// Builds the router and serves it on `config.api_listen_address` until the process is asked to
/// shut down.
pub async fn serve(
    processor: Arc<Processor>,
    federation: Arc<dyn FederationDriver>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> KeppelResult<()> {
    let token_service = Arc::new(TokenService::from_config(&processor.config)?);
    let addr = processor.config.api_listen_address.clone();
    let state = ApiState::new(processor, federation, token_service);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(crate::KeppelError::Io)?;
    tracing::info!(%addr, "registry API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(crate::KeppelError::Io)?;
    Ok(())
}
