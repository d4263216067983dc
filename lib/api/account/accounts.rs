//! `GET /accounts`, `GET/PUT/DELETE /accounts/{name}`, and the sublease-token endpoint that lets
//! a replica prove a primary authorized its name claim (§4.7).

use axum::extract::{Extension, Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::UserIdentity;
use crate::models::{Account, ExternalPeer, Replication};

use super::super::error::KeppelApiError;
use super::super::ApiState;

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub name: String,
    pub auth_tenant_id: String,
    pub replication: ReplicationResponse,
    pub platform_filter: Vec<String>,
    pub required_labels: Vec<String>,
    pub is_managed: bool,
    pub is_deleting: bool,
    pub rbac_policies: Value,
    pub gc_policies: Value,
    pub tag_policies: Value,
    pub security_scan_policies: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationResponse {
    Primary,
    FromPeer { upstream_peer_hostname: String },
    FromExternal { external_peer: ExternalPeer },
}

impl AccountResponse {
    fn from(account: &Account) -> crate::KeppelResult<Self> {
        let replication = match account.replication()? {
            Replication::Primary => ReplicationResponse::Primary,
            Replication::FromPeer { upstream_peer_hostname } => {
                ReplicationResponse::FromPeer { upstream_peer_hostname }
            }
            Replication::FromExternal { external_peer } => {
                ReplicationResponse::FromExternal { external_peer }
            }
        };
        Ok(Self {
            name: account.get_name().clone(),
            auth_tenant_id: account.get_auth_tenant_id().clone(),
            replication,
            platform_filter: account.get_platform_filter().clone(),
            required_labels: account.get_required_labels().clone(),
            is_managed: *account.get_is_managed(),
            is_deleting: *account.get_is_deleting(),
            rbac_policies: account.get_rbac_policies_json().clone(),
            gc_policies: account.get_gc_policies_json().clone(),
            tag_policies: account.get_tag_policies_json().clone(),
            security_scan_policies: account.get_security_scan_policies_json().clone(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct AccountListResponse {
    pub accounts: Vec<AccountResponse>,
}

/// `GET /keppel/v1/accounts`: every account owned by one of the caller's auth tenants.
pub async fn list(
    State(state): State<ApiState>,
    Extension(identity): Extension<UserIdentity>,
) -> Result<impl IntoResponse, KeppelApiError> {
    let mut accounts = Vec::new();
    for tenant_id in identity.tenant_ids() {
        for account in state.processor.db.list_accounts_by_tenant(tenant_id).await? {
            accounts.push(AccountResponse::from(&account)?);
        }
    }
    accounts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(AccountListResponse { accounts }))
}

/// `GET /keppel/v1/accounts/{name}`.
pub async fn show(
    State(state): State<ApiState>,
    Extension(identity): Extension<UserIdentity>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, KeppelApiError> {
    let account = state
        .processor
        .db
        .get_account(&name)
        .await?
        .ok_or_else(|| crate::KeppelError::NotFound(format!("account {name}")))?;

    if !state.processor.auth.can_view_account(&identity, account.get_auth_tenant_id()) {
        return Err(crate::KeppelError::Denied(format!("no view rights on account {name}")).into());
    }

    Ok(Json(AccountResponse::from(&account)?))
}

#[derive(Debug, Deserialize)]
pub struct PutAccountRequest {
    pub auth_tenant_id: String,
    #[serde(default)]
    pub platform_filter: Vec<String>,
    #[serde(default)]
    pub required_labels: Vec<String>,
}

/// `PUT /keppel/v1/accounts/{name}`: creates the account if it does not exist yet (the caller
/// becomes its owning tenant), or updates the mutable fields of one the caller's tenant already
/// owns. Does not touch replication or federation — those are set once at creation via the
/// managed-account reconciler, not by hand here.
pub async fn put(
    State(state): State<ApiState>,
    Extension(identity): Extension<UserIdentity>,
    Path(name): Path<String>,
    Json(request): Json<PutAccountRequest>,
) -> Result<impl IntoResponse, KeppelApiError> {
    if !identity.has_tenant(&request.auth_tenant_id) {
        return Err(crate::KeppelError::Denied(format!(
            "identity {:?} may not act as tenant {:?}",
            identity.name(), request.auth_tenant_id
        ))
        .into());
    }

    let account = match state.processor.db.get_account(&name).await? {
        Some(mut existing) => {
            if existing.get_auth_tenant_id() != &request.auth_tenant_id {
                return Err(crate::KeppelError::Denied(format!("account {name} belongs to a different tenant")).into());
            }
            existing.set_platform_filter(request.platform_filter);
            existing.set_required_labels(request.required_labels);
            state.processor.db.update_account_fields(&existing).await?;
            existing
        }
        None => {
            let claim = state
                .federation
                .claim_account_name(&name, None)
                .await?;
            if claim != crate::federation::ClaimResult::Succeeded {
                return Err(crate::KeppelError::Denied(format!("account name {name} is claimed by another deployment")).into());
            }
            let mut account = Account::new_primary(&name, &request.auth_tenant_id)?;
            account.set_platform_filter(request.platform_filter);
            account.set_required_labels(request.required_labels);
            state.processor.db.insert_account(&account).await?;
            account
        }
    };

    Ok(Json(AccountResponse::from(&account)?))
}

/// `DELETE /keppel/v1/accounts/{name}`: marks the account for deletion (§4.6's
/// `DeleteAccountJob` does the actual teardown) and returns `202` once the flag is set.
pub async fn delete(
    State(state): State<ApiState>,
    Extension(identity): Extension<UserIdentity>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, KeppelApiError> {
    let account = state
        .processor
        .db
        .get_account(&name)
        .await?
        .ok_or_else(|| crate::KeppelError::NotFound(format!("account {name}")))?;

    if !state.processor.auth.can_delete_from_account(&identity, account.get_auth_tenant_id()) {
        return Err(crate::KeppelError::Denied(format!("no delete rights on account {name}")).into());
    }

    state.processor.db.mark_account_deleting(&name).await?;
    Ok(axum::http::StatusCode::ACCEPTED)
}

#[derive(Debug, Serialize)]
pub struct SubleaseResponse {
    pub sublease_token: String,
}

/// `POST /keppel/v1/accounts/{name}/sublease`: mints a token a replica presents to its own
/// federation driver to prove this (primary) deployment authorized the replica's name claim.
pub async fn sublease(
    State(state): State<ApiState>,
    Extension(identity): Extension<UserIdentity>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, KeppelApiError> {
    let account = state
        .processor
        .db
        .get_account(&name)
        .await?
        .ok_or_else(|| crate::KeppelError::NotFound(format!("account {name}")))?;

    if !state.processor.auth.can_delete_from_account(&identity, account.get_auth_tenant_id()) {
        return Err(crate::KeppelError::Denied(format!("no ownership rights on account {name}")).into());
    }

    let sublease_token = state.federation.issue_sublease_token_secret(&name).await?;
    Ok(Json(SubleaseResponse { sublease_token }))
}
