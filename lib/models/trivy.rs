//! TrivySecurityInfo: per-manifest vulnerability scan status.

use chrono::{DateTime, Utc};
use getset::{Getters, Setters};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The outcome of the most recent (or in-flight) vulnerability scan of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VulnerabilityStatus {
    /// Not yet scanned.
    Pending,
    /// Scan is running.
    Scanning,
    /// Scanned clean.
    Clean,
    /// Scan found at least one vulnerability.
    VulnerabilitiesFound,
    /// The manifest's media type or platform is unsupported by the scanner.
    Unsupported,
    /// The scan failed for reasons other than unsupported input.
    Error,
}

impl VulnerabilityStatus {
    /// The string persisted in storage and exposed over the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Scanning => "Scanning",
            Self::Clean => "Clean",
            Self::VulnerabilitiesFound => "VulnerabilitiesFound",
            Self::Unsupported => "Unsupported",
            Self::Error => "Error",
        }
    }

    /// Parses the string persisted in storage back into a status.
    pub fn from_str(value: &str) -> Option<Self> {
        Some(match value {
            "Pending" => Self::Pending,
            "Scanning" => Self::Scanning,
            "Clean" => Self::Clean,
            "VulnerabilitiesFound" => Self::VulnerabilitiesFound,
            "Unsupported" => Self::Unsupported,
            "Error" => Self::Error,
            _ => return None,
        })
    }
}

/// A manifest's vulnerability scan record.
#[derive(Debug, Clone, PartialEq, Getters, Setters)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct TrivySecurityInfo {
    /// The owning repository.
    repository_id: i64,

    /// The scanned manifest's digest.
    digest: String,

    /// The current scan status.
    status: VulnerabilityStatus,

    /// The error message from the most recent failed scan attempt, if any.
    message: String,

    /// Next time CheckTrivySecurityStatusJob should (re-)scan this manifest.
    next_check_at: Option<DateTime<Utc>>,

    /// When the most recent scan attempt completed.
    checked_at: Option<DateTime<Utc>>,

    /// How long the most recent scan attempt took.
    check_duration_secs: Option<i64>,
}

impl TrivySecurityInfo {
    /// Builds a fresh, unscanned record.
    pub fn new(repository_id: i64, digest: impl Into<String>) -> Self {
        Self {
            repository_id,
            digest: digest.into(),
            status: VulnerabilityStatus::Pending,
            message: String::new(),
            next_check_at: Some(Utc::now()),
            checked_at: None,
            check_duration_secs: None,
        }
    }

    /// Reconstructs a scan record read back from the database.
    pub(crate) fn from_row(
        repository_id: i64,
        digest: String,
        status: VulnerabilityStatus,
        message: String,
        next_check_at: Option<DateTime<Utc>>,
        checked_at: Option<DateTime<Utc>>,
        check_duration_secs: Option<i64>,
    ) -> Self {
        Self {
            repository_id,
            digest,
            status,
            message,
            next_check_at,
            checked_at,
            check_duration_secs,
        }
    }
}
