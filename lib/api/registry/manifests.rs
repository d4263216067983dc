//! Manifest/tag GET, HEAD, PUT, DELETE and tag listing (§4.4).

use axum::extract::{Extension, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::Serialize;

use crate::processor::ManifestRef;
use crate::token::Claims;

use super::super::error::{registry_result, NotFoundKind, RegistryApiError};
use super::super::ApiState;
use super::API_VERSION_HEADER;

fn has_action(claims: &Option<Extension<Claims>>, repository: &str, action: &str) -> bool {
    claims.as_ref().is_some_and(|Extension(claims)| {
        claims
            .access
            .iter()
            .any(|e| e.resource_type == "repository" && e.name == repository && e.actions.iter().any(|a| a == action))
    })
}

fn require_action(claims: &Option<Extension<Claims>>, repository: &str, action: &str) -> Result<(), RegistryApiError> {
    if has_action(claims, repository, action) {
        Ok(())
    } else {
        Err(crate::KeppelError::Denied(format!("no {action} rights on {repository}")).into())
    }
}

#[derive(Serialize)]
struct TagListResponse {
    name: String,
    tags: Vec<String>,
}

async fn list_tags(
    state: ApiState,
    claims: Option<Extension<Claims>>,
    account: String,
    repository: String,
) -> Result<impl IntoResponse, RegistryApiError> {
    require_action(&claims, &format!("{account}/{repository}"), "pull")?;
    let repo = registry_result(
        state.processor.db.get_repository(&account, &repository).await,
        NotFoundKind::Name,
    )?
    .ok_or_else(|| RegistryApiError::new(crate::KeppelError::NotFound(format!("repository {repository}")), NotFoundKind::Name))?;

    let mut tags: Vec<String> = registry_result(
        state.processor.db.list_tags(*repo.get_id()).await,
        NotFoundKind::Name,
    )?
    .into_iter()
    .map(|t| t.get_name().clone())
    .collect();
    tags.sort();

    Ok((
        [API_VERSION_HEADER],
        axum::Json(TagListResponse { name: format!("{account}/{repository}"), tags }),
    ))
}

async fn resolve_manifest(
    state: &ApiState,
    claims: &Option<Extension<Claims>>,
    account: &str,
    repository: &str,
    reference: &str,
) -> Result<(crate::models::Manifest, Vec<u8>), RegistryApiError> {
    require_action(claims, &format!("{account}/{repository}"), "pull")?;
    let reference = registry_result(ManifestRef::parse(reference), NotFoundKind::Manifest)?;

    let acc = registry_result(
        state.processor.db.get_account(account).await,
        NotFoundKind::Name,
    )?
    .ok_or_else(|| RegistryApiError::new(crate::KeppelError::NotFound(format!("account {account}")), NotFoundKind::Name))?;

    registry_result(
        state.processor.pull_manifest(&acc, repository, &reference).await,
        NotFoundKind::Manifest,
    )
}

async fn get_manifest(
    state: ApiState,
    claims: Option<Extension<Claims>>,
    account: String,
    repository: String,
    reference: String,
) -> Result<impl IntoResponse, RegistryApiError> {
    let (manifest, content) = resolve_manifest(&state, &claims, &account, &repository, &reference).await?;

    Ok((
        StatusCode::OK,
        [API_VERSION_HEADER],
        [
            (header::CONTENT_TYPE, manifest.get_media_type().clone()),
            (header::CONTENT_LENGTH, manifest.get_size_bytes().to_string()),
            (header::ETAG, manifest.get_digest().clone()),
        ],
        content,
    ))
}

async fn head_manifest(
    state: ApiState,
    claims: Option<Extension<Claims>>,
    account: String,
    repository: String,
    reference: String,
) -> Result<impl IntoResponse, RegistryApiError> {
    let (manifest, _content) = resolve_manifest(&state, &claims, &account, &repository, &reference).await?;

    Ok((
        StatusCode::OK,
        [API_VERSION_HEADER],
        [
            (header::CONTENT_TYPE, manifest.get_media_type().clone()),
            (header::CONTENT_LENGTH, manifest.get_size_bytes().to_string()),
            (header::ETAG, manifest.get_digest().clone()),
        ],
    ))
}

async fn put_manifest(
    state: ApiState,
    claims: Option<Extension<Claims>>,
    account: String,
    repository: String,
    reference: String,
    headers: HeaderMap,
    content: axum::body::Bytes,
) -> Result<impl IntoResponse, RegistryApiError> {
    require_action(&claims, &format!("{account}/{repository}"), "push")?;
    let reference = registry_result(ManifestRef::parse(&reference), NotFoundKind::Manifest)?;

    let media_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let Some(Extension(claims)) = &claims else {
        return Err(crate::KeppelError::Unauthorized("push requires a token".into()).into());
    };
    let tenant_id = claims
        .tenant_ids
        .first()
        .cloned()
        .ok_or_else(|| crate::KeppelError::Denied("token carries no tenant".into()))?;

    let account_row = registry_result(
        state.processor.db.get_account(&account).await,
        NotFoundKind::Name,
    )?
    .ok_or_else(|| RegistryApiError::new(crate::KeppelError::NotFound(format!("account {account}")), NotFoundKind::Name))?;

    let manifest = state
        .processor
        .push_manifest(
            &account,
            &tenant_id,
            &repository,
            &media_type,
            content,
            &reference,
            account_row.get_required_labels(),
        )
        .await?;

    let location = format!("/v2/{account}/{repository}/manifests/{}", manifest.get_digest());
    Ok((
        StatusCode::CREATED,
        [API_VERSION_HEADER],
        [
            (header::LOCATION, location),
            (header::ETAG, manifest.get_digest().clone()),
        ],
    ))
}

async fn delete_manifest(
    state: ApiState,
    claims: Option<Extension<Claims>>,
    account: String,
    repository: String,
    reference: String,
) -> Result<impl IntoResponse, RegistryApiError> {
    require_action(&claims, &format!("{account}/{repository}"), "delete")?;
    let reference = registry_result(ManifestRef::parse(&reference), NotFoundKind::Manifest)?;
    state.processor.delete_manifest_or_tag(&account, &repository, &reference).await?;
    Ok((StatusCode::ACCEPTED, [API_VERSION_HEADER]))
}

//--------------------------------------------------------------------------------------------------
// Depth-2 wrappers
//--------------------------------------------------------------------------------------------------

pub async fn list_tags2(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, RegistryApiError> {
    list_tags(state, claims, account, name).await
}

pub async fn get_manifest2(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, name, reference)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, RegistryApiError> {
    get_manifest(state, claims, account, name, reference).await
}

pub async fn head_manifest2(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, name, reference)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, RegistryApiError> {
    head_manifest(state, claims, account, name, reference).await
}

pub async fn put_manifest2(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, name, reference)): Path<(String, String, String)>,
    headers: HeaderMap,
    content: axum::body::Bytes,
) -> Result<impl IntoResponse, RegistryApiError> {
    put_manifest(state, claims, account, name, reference, headers, content).await
}

pub async fn delete_manifest2(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, name, reference)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, RegistryApiError> {
    delete_manifest(state, claims, account, name, reference).await
}

//--------------------------------------------------------------------------------------------------
// Depth-3 wrappers
//--------------------------------------------------------------------------------------------------

pub async fn list_tags3(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, ns, name)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, RegistryApiError> {
    list_tags(state, claims, account, format!("{ns}/{name}")).await
}

pub async fn get_manifest3(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, ns, name, reference)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, RegistryApiError> {
    get_manifest(state, claims, account, format!("{ns}/{name}"), reference).await
}

pub async fn head_manifest3(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, ns, name, reference)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, RegistryApiError> {
    head_manifest(state, claims, account, format!("{ns}/{name}"), reference).await
}

pub async fn put_manifest3(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, ns, name, reference)): Path<(String, String, String, String)>,
    headers: HeaderMap,
    content: axum::body::Bytes,
) -> Result<impl IntoResponse, RegistryApiError> {
    put_manifest(state, claims, account, format!("{ns}/{name}"), reference, headers, content).await
}

pub async fn delete_manifest3(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, ns, name, reference)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, RegistryApiError> {
    delete_manifest(state, claims, account, format!("{ns}/{name}"), reference).await
}
