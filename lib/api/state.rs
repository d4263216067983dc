//! [`ApiState`]: the shared, cheaply-cloned handle every handler runs against.

use std::sync::Arc;

use crate::federation::FederationDriver;
use crate::processor::Processor;
use crate::token::TokenService;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Everything a handler needs: the data-plane orchestrator, the federation driver (sublease
/// tokens, account-name lookups for the account API), and the bearer-token issuer/validator.
#[derive(Clone)]
pub struct ApiState {
    pub(super) processor: Arc<Processor>,
    pub(super) federation: Arc<dyn FederationDriver>,
    pub(super) token_service: Arc<TokenService>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ApiState {
    /// Builds the shared API state from its already-constructed dependencies.
    pub fn new(
        processor: Arc<Processor>,
        federation: Arc<dyn FederationDriver>,
        token_service: Arc<TokenService>,
    ) -> Self {
        Self {
            processor,
            federation,
            token_service,
        }
    }
}
