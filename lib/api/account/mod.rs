//! The proprietary `/keppel/v1/` account-management API (§4.5/§6). Authenticates via
//! [`super::middleware::keppel_auth`], which resolves a full [`crate::auth::UserIdentity`] before
//! any handler runs; every handler checks [`crate::auth::AuthDriver`] ownership predicates against
//! that identity for the account it names.

mod accounts;
mod auth;
mod quota;
mod repositories;

use axum::routing::{get, post};
use axum::Router;

use super::{middleware, ApiState};

/// Builds the `/keppel/v1/` router. `/keppel/v1/auth` and `/keppel/v1/auth/peering` authenticate
/// themselves (a Basic-credentials exchange and a peer-to-peer handshake respectively) and sit
/// outside the `keppel_auth` middleware that covers everything else.
pub fn router(state: ApiState) -> Router {
    let unauthenticated = Router::new()
        .route("/keppel/v1/auth", get(auth::token))
        .route("/keppel/v1/auth/peering", post(auth::peering));

    let authenticated = Router::new()
        .route("/keppel/v1/accounts", get(accounts::list))
        .route(
            "/keppel/v1/accounts/{name}",
            get(accounts::show).put(accounts::put).delete(accounts::delete),
        )
        .route("/keppel/v1/accounts/{name}/repositories", get(repositories::list))
        // The repository name itself may contain one level of namespacing (§4.5), so — same
        // axum/matchit wildcard-must-be-last constraint as the registry v2 router — these two
        // endpoints are each registered twice, once per repository-name depth.
        .route(
            "/keppel/v1/accounts/{name}/repositories/{repo}/manifests",
            get(repositories::list_manifests2),
        )
        .route(
            "/keppel/v1/accounts/{name}/repositories/{ns}/{repo}/manifests",
            get(repositories::list_manifests3),
        )
        .route(
            "/keppel/v1/accounts/{name}/repositories/{repo}/trivy_report",
            get(repositories::trivy_report2),
        )
        .route(
            "/keppel/v1/accounts/{name}/repositories/{ns}/{repo}/trivy_report",
            get(repositories::trivy_report3),
        )
        .route("/keppel/v1/accounts/{name}/sublease", post(accounts::sublease))
        .route("/keppel/v1/quotas/{auth_tenant_id}", get(quota::show).put(quota::put))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), middleware::keppel_auth));

    unauthenticated.merge(authenticated).with_state(state)
}
