//! `GET/PUT /keppel/v1/quotas/{auth_tenant_id}`: the manifest-count quota shared across every
//! account a tenant owns.

use axum::extract::{Extension, Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::UserIdentity;
use crate::models::Quotas;

use super::super::error::KeppelApiError;
use super::super::ApiState;

#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub auth_tenant_id: String,
    pub manifest_count_limit: i64,
    pub manifest_count_usage: i64,
}

/// Only the tenant itself may read or change its own quota; there is no separate
/// quota-administrator role in this deployment (§4.5's out-of-core-scope RBAC evaluator would be
/// where that distinction lives).
fn require_self(identity: &UserIdentity, auth_tenant_id: &str) -> Result<(), crate::KeppelError> {
    if identity.has_tenant(auth_tenant_id) {
        Ok(())
    } else {
        Err(crate::KeppelError::Denied(format!(
            "identity {:?} may not act as tenant {auth_tenant_id:?}",
            identity.name()
        )))
    }
}

pub async fn show(
    State(state): State<ApiState>,
    Extension(identity): Extension<UserIdentity>,
    Path(auth_tenant_id): Path<String>,
) -> Result<impl IntoResponse, KeppelApiError> {
    require_self(&identity, &auth_tenant_id)?;

    let usage = state.processor.db.count_manifests_for_tenant(&auth_tenant_id).await?;
    let limit = state
        .processor
        .db
        .get_quotas(&auth_tenant_id)
        .await?
        .map(|q| *q.get_manifest_count_limit())
        .unwrap_or(0);

    Ok(Json(QuotaResponse {
        auth_tenant_id,
        manifest_count_limit: limit,
        manifest_count_usage: usage,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PutQuotaRequest {
    pub manifest_count_limit: i64,
}

pub async fn put(
    State(state): State<ApiState>,
    Extension(identity): Extension<UserIdentity>,
    Path(auth_tenant_id): Path<String>,
    Json(request): Json<PutQuotaRequest>,
) -> Result<impl IntoResponse, KeppelApiError> {
    require_self(&identity, &auth_tenant_id)?;

    let quotas = Quotas::new(&auth_tenant_id, request.manifest_count_limit);
    state.processor.db.upsert_quotas(&quotas).await?;

    let usage = state.processor.db.count_manifests_for_tenant(&auth_tenant_id).await?;
    Ok(Json(QuotaResponse {
        auth_tenant_id,
        manifest_count_limit: request.manifest_count_limit,
        manifest_count_usage: usage,
    }))
}
