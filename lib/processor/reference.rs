//! Manifest reference parsing (§4.4): an in-repository reference is a digest first, a tag name
//! otherwise. A narrower cousin of a cross-registry `registry/repository:tag@digest` reference
//! parser, cut down to the single-repository case this registry's
//! `/v2/{repo}/manifests/{reference}` path segment actually carries.

use std::fmt;
use std::str::FromStr;

use crate::{KeppelError, KeppelResult};

/// A parsed `{reference}` path segment from a manifest or tag endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestRef {
    /// A content digest, `algorithm:hex`.
    Digest(String),
    /// A tag name.
    Tag(String),
}

impl ManifestRef {
    /// Parses `s` as a digest first (`algorithm:hex`, algorithm one of the recognized digest
    /// algorithms and hex being lowercase hexadecimal); falls back to treating the whole string
    /// as a tag name. A reference of the form `name:garbage@sha256:HEX` — sent by some Docker
    /// clients — is parsed as the digest, with the part before `@` ignored.
    pub fn parse(s: &str) -> KeppelResult<Self> {
        if s.is_empty() {
            return Err(KeppelError::NameInvalid("reference is empty".into()));
        }

        if let Some(at_idx) = s.find('@') {
            let digest_part = &s[at_idx + 1..];
            return parse_digest(digest_part).map(Self::Digest);
        }

        if let Ok(digest) = parse_digest(s) {
            return Ok(Self::Digest(digest));
        }

        Ok(Self::Tag(s.to_string()))
    }
}

impl FromStr for ManifestRef {
    type Err = KeppelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ManifestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Digest(d) => write!(f, "{d}"),
            Self::Tag(t) => write!(f, "{t}"),
        }
    }
}

/// Parses `algorithm:hex`, requiring a known algorithm and a hex-only, non-empty payload.
fn parse_digest(s: &str) -> KeppelResult<String> {
    let Some((algorithm, hex_part)) = s.split_once(':') else {
        return Err(KeppelError::NameInvalid(format!("{s:?} is not a digest")));
    };

    if !matches!(algorithm, "sha256" | "sha512") {
        return Err(KeppelError::NameInvalid(format!("unknown digest algorithm {algorithm:?}")));
    }
    if hex_part.is_empty() || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(KeppelError::NameInvalid(format!("{s:?} is not a valid digest")));
    }

    Ok(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_tag() {
        assert_eq!(ManifestRef::parse("latest").unwrap(), ManifestRef::Tag("latest".into()));
    }

    #[test]
    fn parses_digest() {
        let digest = "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        assert_eq!(ManifestRef::parse(digest).unwrap(), ManifestRef::Digest(digest.into()));
    }

    #[test]
    fn tag_with_garbage_colon_and_digest_prefers_digest() {
        let digest = "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
        let s = format!("name:garbage@{digest}");
        assert_eq!(ManifestRef::parse(&s).unwrap(), ManifestRef::Digest(digest.to_string()));
    }

    #[test]
    fn rejects_empty_reference() {
        assert!(ManifestRef::parse("").is_err());
    }
}
