//! Crate-wide error type for keppel.

use std::fmt::{self, Display};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a keppel operation.
pub type KeppelResult<T> = Result<T, KeppelError>;

/// The error kind taxonomy from the error handling design: every `KeppelError` maps to exactly
/// one of these for the purposes of HTTP status mapping and janitor retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A driver or peer could not be reached.
    Transport,
    /// The requested entity does not exist.
    NotFound,
    /// The operation conflicts with concurrent state (e.g. chunk reordering, duplicate claim).
    Conflict,
    /// The caller presented no or invalid credentials.
    Unauthorized,
    /// The caller is authenticated but lacks the required scope/permission.
    Denied,
    /// An account policy (RBAC, tag, GC, security-scan) vetoed the operation.
    PolicyViolation,
    /// A quota would be exceeded by the operation.
    QuotaExceeded,
    /// A computed digest did not match the expected one.
    DigestMismatch,
    /// A declared size did not match the actual size.
    SizeMismatch,
    /// A `Content-Range`/offset was not satisfiable.
    RangeInvalid,
    /// A manifest failed to parse or reference-check.
    ManifestInvalid,
    /// A manifest references a blob that is not mounted in the repository.
    ManifestBlobUnknown,
    /// An upstream/peer registry could not serve the request.
    UpstreamUnavailable,
    /// The storage driver does not support the requested operation.
    DriverUnsupported,
    /// Anything else; treated as a programming/data-corruption error by callers.
    Internal,
}

/// The crate-wide error type.
#[derive(pretty_error_debug::Debug, Error)]
pub enum KeppelError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An HTTP request to a peer, upstream registry, or Trivy server failed.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// An HTTP middleware (retry policy) error.
    #[error("http middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// A JSON (de)serialization error.
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// A JWT encode/decode/validation error.
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// A requested entity was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation conflicts with concurrent state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No or invalid credentials were presented.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The caller is authenticated but lacks the required scope.
    #[error("denied: {0}")]
    Denied(String),

    /// An account policy vetoed the operation.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// A manifest-count quota would be exceeded.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A computed digest did not match the expected one.
    #[error("digest invalid: {0}")]
    DigestMismatch(String),

    /// A declared size did not match the actual size.
    #[error("size invalid: {0}")]
    SizeMismatch(String),

    /// A `Content-Range`/offset was not satisfiable.
    #[error("range invalid: {0}")]
    RangeInvalid(String),

    /// A manifest failed to parse or reference-check.
    #[error("manifest invalid: {0}")]
    ManifestInvalid(String),

    /// A manifest references a blob that is not mounted in the repository.
    #[error("manifest blob unknown: {0}")]
    ManifestBlobUnknown(String),

    /// An upstream/peer registry could not serve the request.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The storage driver does not support the requested operation.
    #[error("unsupported: {0}")]
    DriverUnsupported(String),

    /// An invalid account, repository, or reference name was supplied.
    #[error("name invalid: {0}")]
    NameInvalid(String),

    /// An invalid argument was supplied to a CLI command or driver factory.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A data-corruption invariant (I1-I9) was violated; callers should treat this as fatal.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    /// A feature is intentionally not implemented in this build.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// An error that can represent any other error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error, for call sites that only have an `anyhow::Error`.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl KeppelError {
    /// Wraps an arbitrary error.
    pub fn custom(error: impl Into<anyhow::Error>) -> KeppelError {
        KeppelError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Maps this error onto the error-kind taxonomy from the error handling design.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeppelError::NotFound(_) => ErrorKind::NotFound,
            KeppelError::Conflict(_) => ErrorKind::Conflict,
            KeppelError::Unauthorized(_) => ErrorKind::Unauthorized,
            KeppelError::Denied(_) => ErrorKind::Denied,
            KeppelError::PolicyViolation(_) => ErrorKind::PolicyViolation,
            KeppelError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            KeppelError::DigestMismatch(_) => ErrorKind::DigestMismatch,
            KeppelError::SizeMismatch(_) => ErrorKind::SizeMismatch,
            KeppelError::RangeInvalid(_) => ErrorKind::RangeInvalid,
            KeppelError::ManifestInvalid(_) | KeppelError::NameInvalid(_) => {
                ErrorKind::ManifestInvalid
            }
            KeppelError::ManifestBlobUnknown(_) => ErrorKind::ManifestBlobUnknown,
            KeppelError::UpstreamUnavailable(_)
            | KeppelError::HttpRequest(_)
            | KeppelError::HttpMiddleware(_) => ErrorKind::UpstreamUnavailable,
            KeppelError::DriverUnsupported(_) => ErrorKind::DriverUnsupported,
            KeppelError::InvariantViolated(_) => ErrorKind::Internal,
            _ => ErrorKind::Internal,
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for AnyError {}
