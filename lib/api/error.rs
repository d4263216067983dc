//! Error-to-HTTP-response mapping for both surfaces. The registry v2 API and the `/keppel/v1/`
//! account API disagree on wire format (§4.5), so each gets its own wrapper around
//! [`KeppelError`] rather than one shared `IntoResponse` impl trying to serve both.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::{KeppelError, KeppelResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Disambiguates which canonical `*_UNKNOWN` registry error code a
/// [`KeppelError::NotFound`](crate::KeppelError::NotFound) maps to, since the error itself carries
/// only a free-text message. Call sites pick the kind that matches what they just looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotFoundKind {
    /// A repository does not exist.
    #[default]
    Name,
    /// A blob does not exist.
    Blob,
    /// A manifest does not exist.
    Manifest,
    /// A blob upload does not exist.
    Upload,
}

/// A [`KeppelError`] paired with enough context to render a registry v2 `{"errors":[...]}` body.
#[derive(Debug)]
pub struct RegistryApiError {
    error: KeppelError,
    not_found_kind: NotFoundKind,
}

/// A [`KeppelError`] rendered as the `/keppel/v1/` account API's `ErrorResponse` JSON shape.
#[derive(Debug)]
pub struct KeppelApiError(KeppelError);

/// One entry of a registry v2 `{"errors":[...]}` body.
#[derive(Debug, Serialize)]
struct RegistryErrorEntry {
    code: &'static str,
    message: String,
    detail: String,
}

#[derive(Debug, Serialize)]
struct RegistryErrorBody {
    errors: Vec<RegistryErrorEntry>,
}

/// The `/keppel/v1/` error body, matching the shape the account API has always used.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// HTTP status code, repeated in the body for clients that only inspect the payload.
    pub code: u16,
    /// Human-readable message.
    pub message: String,
    /// Coarse error category.
    pub error_type: ErrorType,
    /// Extra detail, omitted for 500-level errors to avoid leaking internals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Coarse `/keppel/v1/` error categories.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The request was rejected for lacking valid credentials.
    AuthenticationError,
    /// The caller is authenticated but not permitted to do this.
    AuthorizationError,
    /// The requested resource does not exist.
    NotFound,
    /// The request body or parameters were invalid.
    ValidationError,
    /// A manifest-count quota was exceeded.
    QuotaError,
    /// An unexpected server-side failure.
    InternalError,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RegistryApiError {
    /// Wraps `error`, tagging a [`KeppelError::NotFound`] as `not_found_kind` if it turns out to
    /// be one (ignored for every other variant).
    pub fn new(error: KeppelError, not_found_kind: NotFoundKind) -> Self {
        Self {
            error,
            not_found_kind,
        }
    }

    fn code_and_status(&self) -> (&'static str, StatusCode) {
        match &self.error {
            KeppelError::NotFound(_) => match self.not_found_kind {
                NotFoundKind::Name => ("NAME_UNKNOWN", StatusCode::NOT_FOUND),
                NotFoundKind::Blob => ("BLOB_UNKNOWN", StatusCode::NOT_FOUND),
                NotFoundKind::Manifest => ("MANIFEST_UNKNOWN", StatusCode::NOT_FOUND),
                NotFoundKind::Upload => ("BLOB_UPLOAD_UNKNOWN", StatusCode::NOT_FOUND),
            },
            KeppelError::Unauthorized(_) => ("UNAUTHORIZED", StatusCode::UNAUTHORIZED),
            // §4.4: quota-exceeded is mapped to HTTP 429 with registry error DENIED, same code
            // as an ordinary permission denial.
            KeppelError::Denied(_) | KeppelError::PolicyViolation(_) => {
                ("DENIED", StatusCode::FORBIDDEN)
            }
            KeppelError::QuotaExceeded(_) => ("DENIED", StatusCode::TOO_MANY_REQUESTS),
            KeppelError::NameInvalid(_) => ("NAME_INVALID", StatusCode::BAD_REQUEST),
            KeppelError::ManifestInvalid(_) => ("MANIFEST_INVALID", StatusCode::BAD_REQUEST),
            KeppelError::ManifestBlobUnknown(_) => {
                ("MANIFEST_BLOB_UNKNOWN", StatusCode::BAD_REQUEST)
            }
            KeppelError::DigestMismatch(_) => ("DIGEST_INVALID", StatusCode::BAD_REQUEST),
            KeppelError::SizeMismatch(_) => ("SIZE_INVALID", StatusCode::BAD_REQUEST),
            KeppelError::RangeInvalid(_) => ("RANGE_INVALID", StatusCode::RANGE_NOT_SATISFIABLE),
            KeppelError::Conflict(_) => ("BLOB_UPLOAD_INVALID", StatusCode::CONFLICT),
            // Non-canonical but consistent: upstream trouble and unimplemented driver features
            // both mean "the registry cannot currently serve this", closest canonical code is
            // UNSUPPORTED.
            KeppelError::UpstreamUnavailable(_)
            | KeppelError::HttpRequest(_)
            | KeppelError::HttpMiddleware(_) => {
                ("UNSUPPORTED", StatusCode::SERVICE_UNAVAILABLE)
            }
            KeppelError::DriverUnsupported(_) | KeppelError::NotImplemented(_) => {
                ("UNSUPPORTED", StatusCode::NOT_IMPLEMENTED)
            }
            _ => ("UNSUPPORTED", StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

impl KeppelApiError {
    fn code_and_type(&self) -> (StatusCode, ErrorType) {
        match &self.0 {
            KeppelError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorType::NotFound),
            KeppelError::Unauthorized(_) => {
                (StatusCode::UNAUTHORIZED, ErrorType::AuthenticationError)
            }
            KeppelError::Denied(_) | KeppelError::PolicyViolation(_) => {
                (StatusCode::FORBIDDEN, ErrorType::AuthorizationError)
            }
            KeppelError::QuotaExceeded(_) => {
                (StatusCode::TOO_MANY_REQUESTS, ErrorType::QuotaError)
            }
            KeppelError::NameInvalid(_)
            | KeppelError::ManifestInvalid(_)
            | KeppelError::DigestMismatch(_)
            | KeppelError::SizeMismatch(_)
            | KeppelError::RangeInvalid(_)
            | KeppelError::InvalidArgument(_)
            | KeppelError::Conflict(_) => (StatusCode::BAD_REQUEST, ErrorType::ValidationError),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, ErrorType::InternalError),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<KeppelError> for RegistryApiError {
    fn from(error: KeppelError) -> Self {
        Self::new(error, NotFoundKind::default())
    }
}

impl From<KeppelError> for KeppelApiError {
    fn from(error: KeppelError) -> Self {
        Self(error)
    }
}

impl IntoResponse for RegistryApiError {
    fn into_response(self) -> Response {
        let (code, status) = self.code_and_status();
        let body = RegistryErrorBody {
            errors: vec![RegistryErrorEntry {
                code,
                message: self.error.to_string(),
                detail: String::new(),
            }],
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for KeppelApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.code_and_type();
        let message = self.0.to_string();
        let mut response = ErrorResponse {
            code: status.as_u16(),
            message: message.clone(),
            error_type,
            details: None,
        };
        if status.as_u16() < 500 {
            response.details = Some(message);
        }
        (status, Json(response)).into_response()
    }
}

/// Shorthand for a registry v2 handler result, tagging not-found errors with `kind`.
pub(super) fn registry_result<T>(
    result: KeppelResult<T>,
    kind: NotFoundKind,
) -> Result<T, RegistryApiError> {
    result.map_err(|error| RegistryApiError::new(error, kind))
}
