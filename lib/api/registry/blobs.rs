//! Blob HEAD/GET/DELETE (§4.4 pull path, §3 invariant I8). Handlers are written once against a
//! resolved `(account_name, repository_name)` pair and exposed twice, for the two repository-name
//! path depths this router registers.

use axum::body::Body;
use axum::extract::{Extension, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::token::Claims;

use super::super::error::{registry_result, NotFoundKind, RegistryApiError};
use super::super::ApiState;
use super::API_VERSION_HEADER;

/// Checks that `claims` grants `action` on `repository` (`repository:{repository}:{action}`).
fn require_action(claims: &Option<Extension<Claims>>, repository: &str, action: &str) -> Result<(), RegistryApiError> {
    let granted = claims.as_ref().is_some_and(|Extension(claims)| {
        claims
            .access
            .iter()
            .any(|e| e.resource_type == "repository" && e.name == repository && e.actions.iter().any(|a| a == action))
    });
    if granted {
        Ok(())
    } else {
        Err(crate::KeppelError::Denied(format!("no {action} rights on {repository}")).into())
    }
}

async fn check_blob(
    state: ApiState,
    claims: Option<Extension<Claims>>,
    account: String,
    repository: String,
    digest: String,
) -> Result<impl IntoResponse, RegistryApiError> {
    require_action(&claims, &format!("{account}/{repository}"), "pull")?;
    let blob = registry_result(
        state.processor.db.get_blob(&account, &digest).await,
        NotFoundKind::Blob,
    )?;
    let blob = blob.ok_or_else(|| {
        RegistryApiError::new(crate::KeppelError::NotFound(format!("blob {digest}")), NotFoundKind::Blob)
    })?;

    Ok((
        StatusCode::OK,
        [API_VERSION_HEADER],
        [
            (header::CONTENT_LENGTH, blob.get_size_bytes().to_string()),
            (header::ETAG, blob.get_digest().clone()),
        ],
    ))
}

async fn download_blob(
    state: ApiState,
    claims: Option<Extension<Claims>>,
    account: String,
    repository: String,
    digest: String,
) -> Result<Response, RegistryApiError> {
    require_action(&claims, &format!("{account}/{repository}"), "pull")?;
    let blob = registry_result(
        state.processor.db.get_blob(&account, &digest).await,
        NotFoundKind::Blob,
    )?;
    let blob = blob.ok_or_else(|| {
        RegistryApiError::new(crate::KeppelError::NotFound(format!("blob {digest}")), NotFoundKind::Blob)
    })?;

    let (stream, size) = registry_result(
        state.processor.storage.read_blob(&account, blob.get_storage_id()).await,
        NotFoundKind::Blob,
    )?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, size)
        .header(header::ETAG, blob.get_digest())
        .header(API_VERSION_HEADER.0, API_VERSION_HEADER.1)
        .body(Body::from_stream(stream))
        .expect("static headers are always valid");
    Ok(response)
}

async fn delete_blob(
    state: ApiState,
    claims: Option<Extension<Claims>>,
    account: String,
    repository: String,
    digest: String,
) -> Result<impl IntoResponse, RegistryApiError> {
    require_action(&claims, &format!("{account}/{repository}"), "delete")?;
    let repo = registry_result(
        state.processor.db.get_repository(&account, &repository).await,
        NotFoundKind::Name,
    )?
    .ok_or_else(|| RegistryApiError::new(crate::KeppelError::NotFound(format!("repository {repository}")), NotFoundKind::Name))?;

    let blob = registry_result(
        state.processor.db.get_blob(&account, &digest).await,
        NotFoundKind::Blob,
    )?
    .ok_or_else(|| {
        RegistryApiError::new(crate::KeppelError::NotFound(format!("blob {digest}")), NotFoundKind::Blob)
    })?;

    registry_result(
        state.processor.db.unmount_blob(*blob.get_id(), *repo.get_id()).await,
        NotFoundKind::Blob,
    )?;
    Ok((StatusCode::ACCEPTED, [API_VERSION_HEADER]))
}

//--------------------------------------------------------------------------------------------------
// Depth-2 (`{account}/{name}`) wrappers
//--------------------------------------------------------------------------------------------------

pub async fn check_blob2(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, name, digest)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, RegistryApiError> {
    check_blob(state, claims, account, name, digest).await
}

pub async fn download_blob2(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, name, digest)): Path<(String, String, String)>,
) -> Result<Response, RegistryApiError> {
    download_blob(state, claims, account, name, digest).await
}

pub async fn delete_blob2(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, name, digest)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, RegistryApiError> {
    delete_blob(state, claims, account, name, digest).await
}

//--------------------------------------------------------------------------------------------------
// Depth-3 (`{account}/{ns}/{name}`) wrappers
//--------------------------------------------------------------------------------------------------

pub async fn check_blob3(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, ns, name, digest)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, RegistryApiError> {
    check_blob(state, claims, account, format!("{ns}/{name}"), digest).await
}

pub async fn download_blob3(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, ns, name, digest)): Path<(String, String, String, String)>,
) -> Result<Response, RegistryApiError> {
    download_blob(state, claims, account, format!("{ns}/{name}"), digest).await
}

pub async fn delete_blob3(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, ns, name, digest)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, RegistryApiError> {
    delete_blob(state, claims, account, format!("{ns}/{name}"), digest).await
}
