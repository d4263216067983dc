//! Name validation shared by accounts and repositories (data model §3, API §4.5).

use std::sync::LazyLock;

use regex::Regex;

use crate::{KeppelError, KeppelResult};

/// Matches a single path component of an account or repository name:
/// `[a-z0-9]+(?:[._-][a-z0-9]+)*`.
static COMPONENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*$").unwrap());

/// Maximum length of an account name.
pub const MAX_ACCOUNT_NAME_LEN: usize = 48;

/// Maximum length of a repository name (account-relative, slash-joined components).
pub const MAX_REPOSITORY_NAME_LEN: usize = 256;

/// Validates an account name against `[a-z0-9]+(?:[._-][a-z0-9]+)*`, length <= 48.
pub fn validate_account_name(name: &str) -> KeppelResult<()> {
    if name.len() > MAX_ACCOUNT_NAME_LEN {
        return Err(KeppelError::NameInvalid(format!(
            "account name {name:?} exceeds {MAX_ACCOUNT_NAME_LEN} characters"
        )));
    }
    if !COMPONENT_RE.is_match(name) {
        return Err(KeppelError::NameInvalid(format!(
            "account name {name:?} does not match [a-z0-9]+(?:[._-][a-z0-9]+)*"
        )));
    }
    Ok(())
}

/// Validates a repository name: slash-joined components of the same shape as an account name,
/// total length <= 256. Accepts an optional leading slash, per the internal URL parsing note in
/// API §4.5.
pub fn validate_repository_name(name: &str) -> KeppelResult<()> {
    let name = name.strip_prefix('/').unwrap_or(name);
    if name.is_empty() || name.len() > MAX_REPOSITORY_NAME_LEN {
        return Err(KeppelError::NameInvalid(format!(
            "repository name {name:?} must be 1-{MAX_REPOSITORY_NAME_LEN} characters"
        )));
    }
    for component in name.split('/') {
        if !COMPONENT_RE.is_match(component) {
            return Err(KeppelError::NameInvalid(format!(
                "repository name {name:?} has invalid component {component:?}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_names() {
        assert!(validate_account_name("acc1").is_ok());
        assert!(validate_account_name("my-account.1").is_ok());
        assert!(validate_repository_name("img").is_ok());
        assert!(validate_repository_name("team/img").is_ok());
        assert!(validate_repository_name("/team/img").is_ok());
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(validate_account_name("Acc1").is_err());
        assert!(validate_account_name("-acc").is_err());
        assert!(validate_account_name(&"a".repeat(49)).is_err());
        assert!(validate_repository_name("Team/img").is_err());
        assert!(validate_repository_name("team//img").is_err());
        assert!(validate_repository_name("").is_err());
    }
}
