//! `GET /v2/` (liveness ping) and `GET /v2/_catalog` (repository listing).

use axum::extract::{Extension, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::token::Claims;

use super::super::error::RegistryApiError;
use super::super::ApiState;
use super::API_VERSION_HEADER;

#[derive(Serialize)]
struct CatalogResponse {
    repositories: Vec<String>,
}

/// `GET /v2/`: the bare liveness/capability check every registry v2 client starts with. No scope
/// is required; reaching this handler at all (anonymous or not) is the whole answer.
pub async fn ping() -> impl IntoResponse {
    ([API_VERSION_HEADER], Json(serde_json::json!({})))
}

/// `GET /v2/_catalog`: lists every repository in every account the caller was granted
/// `keppel_account:*:view` on, via the `registry:catalog:*` scope at token-issuance time. Results
/// are deduplicated and sorted; there is no pagination, matching the scale this deployment targets.
pub async fn catalog(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
) -> Result<impl IntoResponse, RegistryApiError> {
    let Some(Extension(claims)) = claims else {
        return Err(crate::KeppelError::Unauthorized("catalog listing requires a token".into()).into());
    };

    let mut repositories = Vec::new();
    for entry in &claims.access {
        if entry.resource_type != "keppel_account" || !entry.actions.iter().any(|a| a == "view") {
            continue;
        }
        for repo in state.processor.db.list_repositories(&entry.name).await? {
            repositories.push(repo.full_name());
        }
    }
    repositories.sort();
    repositories.dedup();

    Ok(([API_VERSION_HEADER], Json(CatalogResponse { repositories })))
}
