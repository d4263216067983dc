//! Environment-derived configuration, loaded once at process start.

use std::env;
use std::fs;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{KeppelError, KeppelResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A `{"type": ..., "params": ...}` blob selecting and configuring a pluggable driver.
///
/// Matched against a small static registry of factories per driver kind (the
/// tagged-variant-over-trait pattern), not deserialized into a driver-specific struct directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// The driver variant to instantiate, e.g. `"in-memory"`, `"filesystem"`, `"swift"`.
    #[serde(rename = "type")]
    pub driver_type: String,

    /// Driver-specific parameters, opaque to everything but the chosen driver's factory.
    #[serde(default)]
    pub params: Value,
}

impl DriverConfig {
    /// Parses a driver config from its JSON source string.
    pub fn parse(source: &str) -> KeppelResult<Self> {
        serde_json::from_str(source).map_err(KeppelError::SerdeJson)
    }
}

/// The process-wide, immutable configuration. Built once via [`Config::from_env`] and shared by
/// `Arc` with the processor, janitor and API router — never read from a global at call sites.
#[derive(Debug, Clone)]
pub struct Config {
    /// Selects and configures the [`crate::auth::AuthDriver`].
    pub driver_auth: DriverConfig,
    /// Selects and configures the [`crate::storage::StorageDriver`].
    pub driver_storage: DriverConfig,
    /// Selects and configures the [`crate::federation::FederationDriver`].
    pub driver_federation: DriverConfig,
    /// Selects and configures the inbound cache driver.
    pub driver_inbound_cache: DriverConfig,

    /// The address the registry v2 / account API HTTP server listens on.
    pub api_listen_address: String,
    /// The externally reachable base URL of this deployment, embedded in tokens and
    /// `Location` headers.
    pub api_public_url: String,
    /// The address the janitor's health/metrics HTTP server listens on.
    pub janitor_listen_address: String,

    /// The PEM-encoded (or file-path-to-PEM) private key used to sign bearer tokens.
    pub issuer_key: String,
    /// The PEM-encoded (or file-path-to-PEM) certificate clients use to validate bearer tokens.
    pub issuer_cert: String,

    /// The database connection string (`postgres://...` or `sqlite://...`).
    pub db_uri: String,

    /// This deployment's own hostname, as announced to peers during federation.
    pub peer_hostname: String,

    /// Base URL of the Trivy vulnerability scanner, if security scanning is enabled.
    pub trivy_url: Option<String>,
    /// Bearer token presented to the Trivy scanner.
    pub trivy_token: Option<String>,

    /// Development-only: skip TLS verification on outbound peer/upstream requests.
    pub insecure: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Config {
    /// Loads configuration from the process environment, first pulling in a local `.env` file if
    /// one is present (development convenience; no-op if absent).
    pub fn from_env() -> KeppelResult<Self> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            driver_auth: driver_config_var("KEPPEL_DRIVER_AUTH", r#"{"type":"unittest"}"#)?,
            driver_storage: driver_config_var(
                "KEPPEL_DRIVER_STORAGE",
                r#"{"type":"in-memory"}"#,
            )?,
            driver_federation: driver_config_var(
                "KEPPEL_DRIVER_FEDERATION",
                r#"{"type":"unittest"}"#,
            )?,
            driver_inbound_cache: driver_config_var(
                "KEPPEL_DRIVER_INBOUND_CACHE",
                r#"{"type":"in-memory"}"#,
            )?,
            api_listen_address: env_var_or("KEPPEL_API_LISTEN_ADDRESS", "127.0.0.1:8080"),
            api_public_url: env_var_or("KEPPEL_API_PUBLIC_URL", "http://localhost:8080"),
            janitor_listen_address: env_var_or("KEPPEL_JANITOR_LISTEN_ADDRESS", "127.0.0.1:8081"),
            issuer_key: required_env_var("KEPPEL_ISSUER_KEY")?,
            issuer_cert: required_env_var("KEPPEL_ISSUER_CERT")?,
            db_uri: env_var_or("KEPPEL_DB_URI", "sqlite::memory:"),
            peer_hostname: env_var_or("KEPPEL_PEER_HOSTNAME", "localhost"),
            trivy_url: env::var("KEPPEL_TRIVY_URL").ok(),
            trivy_token: env::var("KEPPEL_TRIVY_TOKEN").ok(),
            insecure: env::var("KEPPEL_INSECURE").as_deref() == Ok("1"),
        })
    }

    /// Resolves `issuer_key`/`issuer_cert` to their PEM bytes, reading from disk if the value
    /// isn't inline PEM (sniffed by whether it starts with `-----BEGIN`).
    pub fn resolve_pem(value: &str) -> KeppelResult<Vec<u8>> {
        if value.trim_start().starts_with("-----BEGIN") {
            Ok(value.as_bytes().to_vec())
        } else {
            fs::read(value).map_err(KeppelError::Io)
        }
    }
}

fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn required_env_var(key: &str) -> KeppelResult<String> {
    env::var(key).map_err(|_| {
        KeppelError::InvalidArgument(format!("required environment variable {key} is not set"))
    })
}

fn driver_config_var(key: &str, default: &str) -> KeppelResult<DriverConfig> {
    let source = env::var(key).unwrap_or_else(|_| default.to_string());
    DriverConfig::parse(&source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_driver_config() {
        let cfg = DriverConfig::parse(r#"{"type":"filesystem","params":{"root":"/tmp/x"}}"#)
            .unwrap();
        assert_eq!(cfg.driver_type, "filesystem");
        assert_eq!(cfg.params["root"], "/tmp/x");
    }

    #[test]
    fn driver_config_without_params_defaults_to_null() {
        let cfg = DriverConfig::parse(r#"{"type":"in-memory"}"#).unwrap();
        assert_eq!(cfg.driver_type, "in-memory");
        assert!(cfg.params.is_null());
    }
}
