//! Auth middleware for the two HTTP surfaces (§4.3). The registry v2 surface only ever validates
//! a self-contained bearer token's signature and claims — no database lookup, by design (§4.3) —
//! and leaves the actual per-repository scope check to each handler, since only the handler knows
//! which repository and action it is serving. The `/keppel/v1/` surface instead resolves a full
//! [`UserIdentity`] up front, either via the configured [`AuthDriver`] (Basic credentials) or by
//! trusting an already-validated bearer token's claims (no second round-trip to the driver).

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;

use crate::auth::Credentials;

use super::error::{ErrorResponse, ErrorType};
use super::ApiState;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Validates a bearer token if one is presented, storing its claims as a request extension for
/// handlers to consult. Anonymous requests are let through with no claims; whether that is
/// sufficient is up to the handler (`GET /v2/` allows it, `GET /v2/{repo}/tags/list` does not).
pub async fn registry_auth(
    State(state): State<ApiState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&req) else {
        return next.run(req).await;
    };

    let audience = state.processor.config.peer_hostname.clone();
    match state.token_service.validate(&token, &audience) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(_) => registry_challenge(&state.processor.config.peer_hostname),
    }
}

/// Resolves the caller's [`UserIdentity`] for the account-management API: Basic credentials go
/// through the configured [`AuthDriver`], a bearer token is trusted directly (its claims were
/// already produced by [`TokenService::issue`](crate::token::TokenService::issue), which itself
/// consulted the driver).
pub async fn keppel_auth(
    State(state): State<ApiState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let credentials = match extract_credentials(&req) {
        Ok(c) => c,
        Err(response) => return response,
    };

    let identity = match credentials {
        Some(Credentials::Bearer(token)) => {
            let audience = state.processor.config.peer_hostname.clone();
            match state.token_service.validate(&token, &audience) {
                Ok(claims) => claims.embedded_user_identity,
                Err(error) => return keppel_error_response(error),
            }
        }
        Some(credentials) => match state.processor.auth.authenticate(&credentials).await {
            Ok(identity) => identity,
            Err(error) => return keppel_error_response(error),
        },
        None => match state.processor.auth.authenticate(&Credentials::Anonymous).await {
            Ok(identity) => identity,
            Err(error) => return keppel_error_response(error),
        },
    };

    req.extensions_mut().insert(identity);
    next.run(req).await
}

/// Extracts a `Bearer` token from the `Authorization` header, if present.
fn bearer_token(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Parses the `Authorization` header into [`Credentials`], accepting `Basic` or `Bearer`.
/// Absence of the header is `Ok(None)`, not an error; anonymous access is a decision for the
/// [`AuthDriver`], not this layer.
fn extract_credentials(req: &Request<Body>) -> Result<Option<Credentials>, Response> {
    let Some(value) = req.headers().get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };

    if let Some(token) = value.strip_prefix("Bearer ") {
        return Ok(Some(Credentials::Bearer(token.to_string())));
    }

    if let Some(encoded) = value.strip_prefix("Basic ") {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| malformed_credentials())?;
        let decoded = String::from_utf8(decoded).map_err(|_| malformed_credentials())?;
        let (username, password) = decoded.split_once(':').ok_or_else(malformed_credentials)?;
        return Ok(Some(Credentials::Basic {
            username: username.to_string(),
            password: password.to_string(),
        }));
    }

    Ok(None)
}

fn malformed_credentials() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            code: 401,
            message: "malformed Authorization header".to_string(),
            error_type: ErrorType::AuthenticationError,
            details: None,
        }),
    )
        .into_response()
}

fn keppel_error_response(error: crate::KeppelError) -> Response {
    super::error::KeppelApiError::from(error).into_response()
}

/// A `401` with the `WWW-Authenticate` challenge Docker/OCI clients use to discover the token
/// endpoint, per the bearer-token exchange flow (§4.3).
fn registry_challenge(registry_hostname: &str) -> Response {
    let challenge = format!(
        "Bearer realm=\"https://{registry_hostname}/keppel/v1/auth\",service=\"{registry_hostname}\""
    );
    let mut response = super::error::RegistryApiError::from(crate::KeppelError::Unauthorized(
        "authentication required".to_string(),
    ))
    .into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, challenge.parse().unwrap());
    response
}
