//! Token service (§4.3): issues and validates signed, self-contained bearer tokens for the
//! Docker/OCI `/auth` endpoint. Tokens carry their own access grants; validation is signature and
//! claim checks only, never a database lookup.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{AuthDriver, UserIdentity};
use crate::config::Config;
use crate::db::Pool;
use crate::{KeppelError, KeppelResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One granted access entry, embedded in a token's `access` claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    /// The scope's resource type: `repository`, `registry`, or `keppel_account`.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// The scope's resource name, e.g. `myaccount/myrepo` or `myaccount`.
    pub name: String,
    /// The granted actions, e.g. `["pull", "push"]` or `["view"]`.
    pub actions: Vec<String>,
}

/// The JWT claim set. Field names match the Docker/OCI distribution token spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer: this deployment's own identity.
    pub iss: String,
    /// Subject: the authenticated caller's display name.
    pub sub: String,
    /// Audience: the service (registry host) this token was minted for.
    pub aud: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Not-before, Unix seconds.
    pub nbf: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
    /// Unique token id, for audit correlation.
    pub jti: String,
    /// The granted access list.
    pub access: Vec<AccessEntry>,
    /// The caller's auth-tenant ids, embedded so downstream calls don't need to re-authenticate.
    pub tenant_ids: Vec<String>,
    /// The full identity that was authenticated to mint this token, opaque outside the driver
    /// that produced it (§4.3). A bearer-token-authenticated request round-trips this value
    /// directly rather than reconstructing an identity from `sub`/`tenant_ids`, so a peer or
    /// anonymous identity is never silently collapsed into a regular one.
    pub embedded_user_identity: UserIdentity,
}

/// A parsed `repository:ACCOUNT/NAME:ACTIONS` or similar scope string from a token request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedScope {
    /// `registry`, `repository`, or `keppel_account`.
    pub resource_type: String,
    /// The resource name (empty for `registry:catalog:*`).
    pub name: String,
    /// The requested actions.
    pub actions: Vec<String>,
}

impl RequestedScope {
    /// Parses one `type:name:action1,action2` scope string as sent by Docker/OCI clients.
    pub fn parse(scope: &str) -> Option<Self> {
        let mut parts = scope.splitn(3, ':');
        let resource_type = parts.next()?.to_string();
        let name = parts.next()?.to_string();
        let actions = parts.next()?.split(',').map(str::to_string).collect();
        Some(Self {
            resource_type,
            name,
            actions,
        })
    }
}

/// Issues and validates bearer tokens. Holds the signing key (private) and verifying key
/// (public); only the former is used by [`issue`](TokenService::issue).
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TokenService {
    /// Builds a token service from a loaded [`Config`], resolving `issuer_key`/`issuer_cert` to
    /// PEM bytes (inline or file path).
    pub fn from_config(config: &Config) -> KeppelResult<Self> {
        let key_pem = Config::resolve_pem(&config.issuer_key)?;
        let cert_pem = Config::resolve_pem(&config.issuer_cert)?;

        Ok(Self {
            encoding_key: EncodingKey::from_rsa_pem(&key_pem).map_err(KeppelError::Token)?,
            decoding_key: DecodingKey::from_rsa_pem(&cert_pem).map_err(KeppelError::Token)?,
            issuer: config.peer_hostname.clone(),
        })
    }

    /// Resolves requested scopes against the authenticated identity and account ownership,
    /// dropping anything the identity may not have, then signs a token granting what remains.
    ///
    /// `registry:catalog:*` is expanded into one `keppel_account:NAME:view` scope per account the
    /// identity can view, per §4.3.
    pub async fn issue(
        &self,
        db: &Pool,
        auth_driver: &dyn AuthDriver,
        identity: &UserIdentity,
        service: &str,
        requested_scopes: &[RequestedScope],
        offline_token: bool,
    ) -> KeppelResult<String> {
        let mut access = Vec::new();

        for scope in requested_scopes {
            match scope.resource_type.as_str() {
                "registry" if scope.name == "catalog" => {
                    let all_accounts = db.list_all_accounts().await?;
                    for account in all_accounts {
                        if auth_driver.can_view_account(identity, account.get_auth_tenant_id()) {
                            access.push(AccessEntry {
                                resource_type: "keppel_account".into(),
                                name: account.get_name().clone(),
                                actions: vec!["view".into()],
                            });
                        }
                    }
                }
                "repository" => {
                    let Some((account_name, _repo_name)) = scope.name.split_once('/') else {
                        continue;
                    };
                    let Some(account) = db.get_account(account_name).await? else {
                        continue;
                    };

                    let mut granted = HashSet::new();
                    for action in &scope.actions {
                        let allowed = match action.as_str() {
                            "pull" => auth_driver
                                .can_pull_from_account(identity, account.get_auth_tenant_id()),
                            "push" => auth_driver
                                .can_push_to_account(identity, account.get_auth_tenant_id()),
                            "delete" => auth_driver
                                .can_delete_from_account(identity, account.get_auth_tenant_id()),
                            _ => false, // unknown action, dropped
                        };
                        if allowed {
                            granted.insert(action.clone());
                        }
                    }

                    if !granted.is_empty() {
                        access.push(AccessEntry {
                            resource_type: "repository".into(),
                            name: scope.name.clone(),
                            actions: granted.into_iter().collect(),
                        });
                    }
                }
                "keppel_account" => {
                    let Some(account) = db.get_account(&scope.name).await? else {
                        continue;
                    };
                    if scope.actions.iter().any(|a| a == "view")
                        && auth_driver.can_view_account(identity, account.get_auth_tenant_id())
                    {
                        access.push(AccessEntry {
                            resource_type: "keppel_account".into(),
                            name: scope.name.clone(),
                            actions: vec!["view".into()],
                        });
                    }
                }
                _ => {} // unknown resource type, dropped
            }
        }

        let now = Utc::now();
        let lifetime = if offline_token {
            Duration::hours(24)
        } else {
            Duration::hours(1)
        };

        let claims = Claims {
            iss: self.issuer.clone(),
            sub: identity.name().to_string(),
            aud: service.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + lifetime).timestamp(),
            jti: Uuid::new_v4().to_string(),
            access,
            tenant_ids: identity.tenant_ids().to_vec(),
            embedded_user_identity: identity.clone(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(KeppelError::Token)
    }

    /// Validates a bearer token's signature and standard claims, returning its claim set.
    pub fn validate(&self, token: &str, expected_audience: &str) -> KeppelResult<Claims> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[expected_audience]);
        validation.set_issuer(&[self.issuer.clone()]);

        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| KeppelError::Unauthorized(format!("invalid token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repository_scope() {
        let scope = RequestedScope::parse("repository:myaccount/myrepo:pull,push").unwrap();
        assert_eq!(scope.resource_type, "repository");
        assert_eq!(scope.name, "myaccount/myrepo");
        assert_eq!(scope.actions, vec!["pull".to_string(), "push".to_string()]);
    }

    #[test]
    fn parses_catalog_scope() {
        let scope = RequestedScope::parse("registry:catalog:*").unwrap();
        assert_eq!(scope.resource_type, "registry");
        assert_eq!(scope.name, "catalog");
    }

    #[test]
    fn rejects_malformed_scope() {
        assert!(RequestedScope::parse("repository:onlytwo").is_none());
    }
}
