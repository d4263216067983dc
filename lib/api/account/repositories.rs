//! `GET /accounts/{name}/repositories`, `…/repositories/{repo}/manifests`, and
//! `…/repositories/{repo}/trivy_report` (§4.5, §4.6's vulnerability-scan surface).

use axum::extract::{Extension, Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::auth::UserIdentity;

use super::super::error::KeppelApiError;
use super::super::ApiState;

async fn viewable_account(
    state: &ApiState,
    identity: &UserIdentity,
    name: &str,
) -> Result<crate::models::Account, crate::KeppelError> {
    let account = state
        .processor
        .db
        .get_account(name)
        .await?
        .ok_or_else(|| crate::KeppelError::NotFound(format!("account {name}")))?;
    if !state.processor.auth.can_view_account(identity, account.get_auth_tenant_id()) {
        return Err(crate::KeppelError::Denied(format!("no view rights on account {name}")));
    }
    Ok(account)
}

#[derive(Debug, Serialize)]
pub struct RepositoryListResponse {
    pub repositories: Vec<String>,
}

pub async fn list(
    State(state): State<ApiState>,
    Extension(identity): Extension<UserIdentity>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, KeppelApiError> {
    viewable_account(&state, &identity, &name).await?;
    let repositories = state
        .processor
        .db
        .list_repositories(&name)
        .await?
        .into_iter()
        .map(|r| r.full_name())
        .collect();
    Ok(Json(RepositoryListResponse { repositories }))
}

#[derive(Debug, Serialize)]
pub struct ManifestListResponse {
    pub manifests: Vec<ManifestResponse>,
}

#[derive(Debug, Serialize)]
pub struct ManifestResponse {
    pub digest: String,
    pub media_type: String,
    pub size_bytes: i64,
    pub tags: Vec<String>,
}

async fn list_manifests(
    state: ApiState,
    identity: UserIdentity,
    account: String,
    repository: String,
) -> Result<impl IntoResponse, KeppelApiError> {
    viewable_account(&state, &identity, &account).await?;
    let repo = state
        .processor
        .db
        .get_repository(&account, &repository)
        .await?
        .ok_or_else(|| crate::KeppelError::NotFound(format!("repository {repository}")))?;

    let tags = state.processor.db.list_tags(*repo.get_id()).await?;
    let manifests = state.processor.db.list_manifests(*repo.get_id()).await?;

    let manifests = manifests
        .into_iter()
        .map(|m| {
            let digest = m.get_digest().clone();
            let tags = tags.iter().filter(|t| t.get_digest() == &digest).map(|t| t.get_name().clone()).collect();
            ManifestResponse {
                digest,
                media_type: m.get_media_type().clone(),
                size_bytes: *m.get_size_bytes(),
                tags,
            }
        })
        .collect();

    Ok(Json(ManifestListResponse { manifests }))
}

async fn trivy_report(
    state: ApiState,
    identity: UserIdentity,
    account: String,
    repository: String,
    digest: String,
) -> Result<impl IntoResponse, KeppelApiError> {
    viewable_account(&state, &identity, &account).await?;
    let repo = state
        .processor
        .db
        .get_repository(&account, &repository)
        .await?
        .ok_or_else(|| crate::KeppelError::NotFound(format!("repository {repository}")))?;

    let info = state
        .processor
        .db
        .get_trivy_info(*repo.get_id(), &digest)
        .await?
        .ok_or_else(|| crate::KeppelError::NotFound(format!("no trivy report for {digest}")))?;

    Ok(Json(TrivyReportResponse {
        digest: info.get_digest().clone(),
        status: info.get_status().as_str().to_string(),
        message: info.get_message().clone(),
        checked_at: *info.get_checked_at(),
    }))
}

#[derive(Debug, Serialize)]
pub struct TrivyReportResponse {
    pub digest: String,
    pub status: String,
    pub message: String,
    pub checked_at: Option<chrono::DateTime<chrono::Utc>>,
}

//--------------------------------------------------------------------------------------------------
// Depth-2 wrappers (`{repo}`, a flat repository name)
//--------------------------------------------------------------------------------------------------

pub async fn list_manifests2(
    State(state): State<ApiState>,
    Extension(identity): Extension<UserIdentity>,
    Path((account, repo)): Path<(String, String)>,
) -> Result<impl IntoResponse, KeppelApiError> {
    list_manifests(state, identity, account, repo).await
}

pub async fn trivy_report2(
    State(state): State<ApiState>,
    Extension(identity): Extension<UserIdentity>,
    Path((account, repo)): Path<(String, String)>,
    axum::extract::Query(params): axum::extract::Query<std::collections::HashMap<String, String>>,
) -> Result<impl IntoResponse, KeppelApiError> {
    let digest = params
        .get("digest")
        .cloned()
        .ok_or_else(|| crate::KeppelError::InvalidArgument("missing digest query parameter".into()))?;
    trivy_report(state, identity, account, repo, digest).await
}

//--------------------------------------------------------------------------------------------------
// Depth-3 wrappers (`{ns}/{repo}`, one level of namespacing)
//--------------------------------------------------------------------------------------------------

pub async fn list_manifests3(
    State(state): State<ApiState>,
    Extension(identity): Extension<UserIdentity>,
    Path((account, ns, repo)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, KeppelApiError> {
    list_manifests(state, identity, account, format!("{ns}/{repo}")).await
}

pub async fn trivy_report3(
    State(state): State<ApiState>,
    Extension(identity): Extension<UserIdentity>,
    Path((account, ns, repo)): Path<(String, String, String)>,
    axum::extract::Query(params): axum::extract::Query<std::collections::HashMap<String, String>>,
) -> Result<impl IntoResponse, KeppelApiError> {
    let digest = params
        .get("digest")
        .cloned()
        .ok_or_else(|| crate::KeppelError::InvalidArgument("missing digest query parameter".into()))?;
    trivy_report(state, identity, account, format!("{ns}/{repo}"), digest).await
}
