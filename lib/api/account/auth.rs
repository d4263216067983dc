//! `GET /keppel/v1/auth`, the Docker/OCI bearer-token exchange (§4.3), and `POST
//! /keppel/v1/auth/peering`, the receiving side of the peer-to-peer password rotation handshake
//! (§4.7, the sender is [`crate::janitor::peer_password::IssueNewPasswordForPeerJob`]). Both sit
//! outside [`super::super::middleware::keppel_auth`] because each authenticates itself against a
//! different credential store: the former against the configured [`crate::auth::AuthDriver`], the
//! latter against a peer's own rotating password hash.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::auth::{Credentials, UserIdentity};
use crate::token::RequestedScope;

use super::super::error::KeppelApiError;
use super::super::ApiState;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    service: String,
    #[serde(default)]
    scope: Vec<String>,
    #[serde(default)]
    offline_token: bool,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    token: String,
    access_token: String,
    expires_in: i64,
    issued_at: String,
}

/// `GET /keppel/v1/auth?service=...&scope=...`: authenticates the caller (Basic credentials, or
/// anonymous if none are presented) and mints a bearer token scoped to whatever the identity is
/// actually allowed.
pub async fn token(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, KeppelApiError> {
    let credentials = basic_credentials(&headers)?.unwrap_or(Credentials::Anonymous);
    let identity = resolve_identity(&state, &credentials).await?;

    let requested_scopes: Vec<RequestedScope> =
        query.scope.iter().filter_map(|s| RequestedScope::parse(s)).collect();

    let token = state
        .token_service
        .issue(
            &state.processor.db,
            &*state.processor.auth,
            &identity,
            &query.service,
            &requested_scopes,
            query.offline_token,
        )
        .await?;

    let lifetime_secs = if query.offline_token { 24 * 3600 } else { 3600 };

    Ok(Json(TokenResponse {
        token: token.clone(),
        access_token: token,
        expires_in: lifetime_secs,
        issued_at: chrono::Utc::now().to_rfc3339(),
    }))
}

/// Resolves `credentials` to a [`UserIdentity`], checking the `peers` table first: a registered
/// peer presenting its current rotating password (the same credential
/// [`super::super::middleware::keppel_auth`]'s peering handler validates) authenticates as
/// [`UserIdentity::Peer`] rather than going through the configured [`crate::auth::AuthDriver`],
/// since peer replication identity is not something any driver knows how to resolve.
async fn resolve_identity(
    state: &ApiState,
    credentials: &Credentials,
) -> Result<UserIdentity, KeppelApiError> {
    if let Credentials::Basic { username, password } = credentials {
        if let Some(peer) = state.processor.db.get_peer(username).await? {
            if peer.accepts_password_hash(&sha256_hex(password)) {
                return Ok(UserIdentity::Peer { peer_hostname: username.clone() });
            }
        }
    }
    Ok(state.processor.auth.authenticate(credentials).await?)
}

/// Parses a `Basic` `Authorization` header into [`Credentials::Basic`]. Unlike
/// [`super::super::middleware::keppel_auth`]'s parser, a `Bearer` header here is simply not this
/// endpoint's business — token exchange always starts from a primary credential.
fn basic_credentials(headers: &HeaderMap) -> Result<Option<Credentials>, KeppelApiError> {
    let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return Ok(None);
    };

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| crate::KeppelError::Unauthorized("malformed Authorization header".into()))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| crate::KeppelError::Unauthorized("malformed Authorization header".into()))?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| crate::KeppelError::Unauthorized("malformed Authorization header".into()))?;

    Ok(Some(Credentials::Basic {
        username: username.to_string(),
        password: password.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct PeeringRequest {
    peer: String,
    password: String,
}

/// `POST /keppel/v1/auth/peering`: a peer presents its current password over Basic auth (username
/// = its own hostname) and a freshly generated replacement in the body; we rotate our record of
/// its password if the presented one checks out. See
/// [`crate::janitor::peer_password::IssueNewPasswordForPeerJob`] for the sender side of this
/// exchange.
pub async fn peering(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<PeeringRequest>,
) -> Result<impl IntoResponse, KeppelApiError> {
    let Some(Credentials::Basic { username, password }) = basic_credentials(&headers)? else {
        return Err(crate::KeppelError::Unauthorized("peering requires Basic credentials".into()).into());
    };

    if username != request.peer {
        return Err(crate::KeppelError::Denied(format!(
            "Basic auth username {username:?} does not match peer {:?} in request body",
            request.peer
        ))
        .into());
    }

    let peer = state
        .processor
        .db
        .get_peer(&username)
        .await?
        .ok_or_else(|| crate::KeppelError::NotFound(format!("peer {username}")))?;

    let presented_hash = sha256_hex(&password);
    if !peer.accepts_password_hash(&presented_hash) {
        return Err(crate::KeppelError::Unauthorized(format!("wrong password for peer {username}")).into());
    }

    let new_hash = sha256_hex(&request.password);
    state.processor.db.rotate_peer_their_password(&username, &new_hash).await?;

    Ok(StatusCode::NO_CONTENT)
}

fn sha256_hex(value: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(value.as_bytes())))
}
