//! Blob upload state machine (§4.4): `POST .../blobs/uploads/` optionally finishing monolithic or
//! mounting a blob cross-repository, then `PATCH`/`PUT`/`DELETE` against the returned uuid.

use axum::body::Bytes;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use serde::Deserialize;
use uuid::Uuid;

use crate::processor::UploadOutcome;
use crate::token::Claims;

use super::super::error::{registry_result, NotFoundKind, RegistryApiError};
use super::super::ApiState;
use super::API_VERSION_HEADER;

#[derive(Debug, Deserialize, Default)]
pub struct StartUploadQuery {
    digest: Option<String>,
    mount: Option<String>,
    from: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct FinalizeUploadQuery {
    digest: String,
}

fn has_action(claims: &Option<Extension<Claims>>, repository: &str, action: &str) -> bool {
    claims.as_ref().is_some_and(|Extension(claims)| {
        claims
            .access
            .iter()
            .any(|e| e.resource_type == "repository" && e.name == repository && e.actions.iter().any(|a| a == action))
    })
}

fn require_push(claims: &Option<Extension<Claims>>, repository: &str) -> Result<(), RegistryApiError> {
    if has_action(claims, repository, "push") {
        Ok(())
    } else {
        Err(crate::KeppelError::Denied(format!("no push rights on {repository}")).into())
    }
}

async fn start_upload(
    state: ApiState,
    claims: Option<Extension<Claims>>,
    account: String,
    repository: String,
    query: StartUploadQuery,
) -> Result<impl IntoResponse, RegistryApiError> {
    require_push(&claims, &format!("{account}/{repository}"))?;

    if let (Some(digest), Some(from)) = (&query.mount, &query.from) {
        let can_pull_from_source = has_action(&claims, &format!("{account}/{from}"), "pull");
        let mounted = state
            .processor
            .mount_blob(&account, &repository, from, digest, can_pull_from_source)
            .await?;
        if let Some(blob) = mounted {
            let location = format!("/v2/{account}/{repository}/blobs/{}", blob.get_digest());
            return Ok((
                StatusCode::CREATED,
                [API_VERSION_HEADER],
                [(header::LOCATION, location)],
            ));
        }
        // Fall through to a normal upload if the source blob or mount wasn't found.
    }

    let upload = state.processor.start_upload(&account, &repository).await?;

    if let Some(digest) = &query.digest {
        let outcome = state
            .processor
            .finalize_upload(&account, *upload.get_repository_id(), *upload.get_uuid(), None, "application/octet-stream", digest)
            .await?;
        let digest = match outcome {
            UploadOutcome::Finalized(blob) | UploadOutcome::AlreadyExists(blob) => blob.get_digest().clone(),
        };
        let location = format!("/v2/{account}/{repository}/blobs/{digest}");
        return Ok((
            StatusCode::CREATED,
            [API_VERSION_HEADER],
            [(header::LOCATION, location)],
        ));
    }

    let location = format!(
        "/v2/{account}/{repository}/blobs/uploads/{}",
        upload.get_uuid()
    );
    Ok((
        StatusCode::ACCEPTED,
        [API_VERSION_HEADER],
        [(header::LOCATION, location)],
    ))
}

async fn patch_upload(
    state: ApiState,
    claims: Option<Extension<Claims>>,
    account: String,
    repository: String,
    uuid: Uuid,
    chunk: Bytes,
) -> Result<impl IntoResponse, RegistryApiError> {
    require_push(&claims, &format!("{account}/{repository}"))?;
    let repo = registry_result(
        state.processor.db.get_repository(&account, &repository).await,
        NotFoundKind::Upload,
    )?
    .ok_or_else(|| RegistryApiError::new(crate::KeppelError::NotFound(format!("repository {repository}")), NotFoundKind::Upload))?;

    let upload = registry_result(
        state.processor.append_chunk(&account, *repo.get_id(), uuid, chunk).await,
        NotFoundKind::Upload,
    )?;

    let location = format!("/v2/{account}/{repository}/blobs/uploads/{uuid}");
    Ok((
        StatusCode::ACCEPTED,
        [API_VERSION_HEADER],
        [
            (header::LOCATION, location),
            (header::RANGE, format!("0-{}", upload.get_size_bytes())),
        ],
    ))
}

async fn put_upload(
    state: ApiState,
    claims: Option<Extension<Claims>>,
    account: String,
    repository: String,
    uuid: Uuid,
    digest: String,
    final_chunk: Bytes,
) -> Result<impl IntoResponse, RegistryApiError> {
    require_push(&claims, &format!("{account}/{repository}"))?;
    let repo = registry_result(
        state.processor.db.get_repository(&account, &repository).await,
        NotFoundKind::Upload,
    )?
    .ok_or_else(|| RegistryApiError::new(crate::KeppelError::NotFound(format!("repository {repository}")), NotFoundKind::Upload))?;

    let final_chunk = if final_chunk.is_empty() { None } else { Some(final_chunk) };
    let outcome = state
        .processor
        .finalize_upload(&account, *repo.get_id(), uuid, final_chunk, "application/octet-stream", &digest)
        .await?;
    let blob_digest = match outcome {
        UploadOutcome::Finalized(blob) | UploadOutcome::AlreadyExists(blob) => blob.get_digest().clone(),
    };

    let location = format!("/v2/{account}/{repository}/blobs/{blob_digest}");
    Ok((
        StatusCode::CREATED,
        [API_VERSION_HEADER],
        [(header::LOCATION, location)],
    ))
}

async fn abort_upload(
    state: ApiState,
    claims: Option<Extension<Claims>>,
    account: String,
    repository: String,
    uuid: Uuid,
) -> Result<impl IntoResponse, RegistryApiError> {
    require_push(&claims, &format!("{account}/{repository}"))?;
    let repo = registry_result(
        state.processor.db.get_repository(&account, &repository).await,
        NotFoundKind::Upload,
    )?
    .ok_or_else(|| RegistryApiError::new(crate::KeppelError::NotFound(format!("repository {repository}")), NotFoundKind::Upload))?;

    registry_result(
        state.processor.abort_upload(&account, *repo.get_id(), uuid).await,
        NotFoundKind::Upload,
    )?;
    Ok((StatusCode::NO_CONTENT, [API_VERSION_HEADER]))
}

//--------------------------------------------------------------------------------------------------
// Depth-2 wrappers
//--------------------------------------------------------------------------------------------------

pub async fn start_upload2(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, name)): Path<(String, String)>,
    Query(query): Query<StartUploadQuery>,
) -> Result<impl IntoResponse, RegistryApiError> {
    start_upload(state, claims, account, name, query).await
}

pub async fn patch_upload2(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, name, uuid)): Path<(String, String, Uuid)>,
    chunk: Bytes,
) -> Result<impl IntoResponse, RegistryApiError> {
    patch_upload(state, claims, account, name, uuid, chunk).await
}

pub async fn put_upload2(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, name, uuid)): Path<(String, String, Uuid)>,
    Query(query): Query<FinalizeUploadQuery>,
    final_chunk: Bytes,
) -> Result<impl IntoResponse, RegistryApiError> {
    put_upload(state, claims, account, name, uuid, query.digest, final_chunk).await
}

pub async fn abort_upload2(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, name, uuid)): Path<(String, String, Uuid)>,
) -> Result<impl IntoResponse, RegistryApiError> {
    abort_upload(state, claims, account, name, uuid).await
}

//--------------------------------------------------------------------------------------------------
// Depth-3 wrappers
//--------------------------------------------------------------------------------------------------

pub async fn start_upload3(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, ns, name)): Path<(String, String, String)>,
    Query(query): Query<StartUploadQuery>,
) -> Result<impl IntoResponse, RegistryApiError> {
    start_upload(state, claims, account, format!("{ns}/{name}"), query).await
}

pub async fn patch_upload3(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, ns, name, uuid)): Path<(String, String, String, Uuid)>,
    chunk: Bytes,
) -> Result<impl IntoResponse, RegistryApiError> {
    patch_upload(state, claims, account, format!("{ns}/{name}"), uuid, chunk).await
}

pub async fn put_upload3(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, ns, name, uuid)): Path<(String, String, String, Uuid)>,
    Query(query): Query<FinalizeUploadQuery>,
    final_chunk: Bytes,
) -> Result<impl IntoResponse, RegistryApiError> {
    put_upload(state, claims, account, format!("{ns}/{name}"), uuid, query.digest, final_chunk).await
}

pub async fn abort_upload3(
    State(state): State<ApiState>,
    claims: Option<Extension<Claims>>,
    Path((account, ns, name, uuid)): Path<(String, String, String, Uuid)>,
) -> Result<impl IntoResponse, RegistryApiError> {
    abort_upload(state, claims, account, format!("{ns}/{name}"), uuid).await
}
