//! Manifest parsing (§4.4): normalizes the four media types the registry accepts — the two OCI
//! image-spec types (via `oci_spec`) and the two legacy Docker v2 types (no crate models these,
//! so they get light wrapper structs) — into one [`ParsedManifest`] the rest of the Processor
//! operates on.

use oci_spec::image::{ImageIndex, ImageManifest};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{KeppelError, KeppelResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The OCI image manifest media type.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// The OCI image index media type.
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// The legacy Docker v2 image manifest media type.
pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// The legacy Docker v2 manifest list media type.
pub const DOCKER_MANIFEST_LIST_V2: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// A light wrapper around the legacy Docker v2 single-platform manifest, which `oci_spec` does
/// not model (it targets the OCI image spec, not Docker's predecessor format).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DockerManifest {
    config: DockerDescriptor,
    layers: Vec<DockerDescriptor>,
}

/// A light wrapper around the legacy Docker v2 manifest list.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DockerManifestList {
    manifests: Vec<DockerDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DockerDescriptor {
    digest: String,
    #[allow(dead_code)]
    size: i64,
}

/// One manifest or index, normalized across all four accepted media types: the set of child
/// blobs and manifests it references, which the caller must verify are already present in the
/// same repository before persisting (§4.4).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedManifest {
    /// Blob digests this manifest references (config + layers for an image manifest; empty for
    /// an index/list).
    pub blob_digests: Vec<String>,
    /// Child manifest digests this manifest references (an index/list's platform entries).
    pub manifest_digests: Vec<String>,
    /// The `subject` descriptor's digest, if this manifest is a referrer of another artifact
    /// (OCI image manifest only).
    pub subject_digest: Option<String>,
    /// The `artifactType` field, if present (OCI image manifest only).
    pub artifact_type: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses `content` according to `media_type`, failing with
/// [`KeppelError::ManifestInvalid`](crate::KeppelError::ManifestInvalid) for anything else.
pub fn parse_manifest(media_type: &str, content: &[u8]) -> KeppelResult<ParsedManifest> {
    match media_type {
        OCI_MANIFEST => parse_oci_manifest(content),
        OCI_INDEX => parse_oci_index(content),
        DOCKER_MANIFEST_V2 => parse_docker_manifest(content),
        DOCKER_MANIFEST_LIST_V2 => parse_docker_manifest_list(content),
        other => Err(KeppelError::ManifestInvalid(format!(
            "unsupported manifest media type {other:?}"
        ))),
    }
}

fn parse_oci_manifest(content: &[u8]) -> KeppelResult<ParsedManifest> {
    let manifest: ImageManifest = serde_json::from_slice(content)
        .map_err(|e| KeppelError::ManifestInvalid(format!("invalid OCI image manifest: {e}")))?;

    let mut blob_digests = vec![manifest.config().digest().to_string()];
    blob_digests.extend(manifest.layers().iter().map(|l| l.digest().to_string()));

    Ok(ParsedManifest {
        blob_digests,
        manifest_digests: Vec::new(),
        subject_digest: manifest.subject().as_ref().map(|s| s.digest().to_string()),
        artifact_type: manifest.artifact_type().as_ref().map(|t| t.to_string()),
    })
}

fn parse_oci_index(content: &[u8]) -> KeppelResult<ParsedManifest> {
    let index: ImageIndex = serde_json::from_slice(content)
        .map_err(|e| KeppelError::ManifestInvalid(format!("invalid OCI image index: {e}")))?;

    Ok(ParsedManifest {
        blob_digests: Vec::new(),
        manifest_digests: index.manifests().iter().map(|m| m.digest().to_string()).collect(),
        subject_digest: index.subject().as_ref().map(|s| s.digest().to_string()),
        artifact_type: index.artifact_type().as_ref().map(|t| t.to_string()),
    })
}

fn parse_docker_manifest(content: &[u8]) -> KeppelResult<ParsedManifest> {
    let manifest: DockerManifest = serde_json::from_slice(content)
        .map_err(|e| KeppelError::ManifestInvalid(format!("invalid docker manifest: {e}")))?;

    let mut blob_digests = vec![manifest.config.digest];
    blob_digests.extend(manifest.layers.into_iter().map(|l| l.digest));

    Ok(ParsedManifest {
        blob_digests,
        manifest_digests: Vec::new(),
        subject_digest: None,
        artifact_type: None,
    })
}

fn parse_docker_manifest_list(content: &[u8]) -> KeppelResult<ParsedManifest> {
    let list: DockerManifestList = serde_json::from_slice(content)
        .map_err(|e| KeppelError::ManifestInvalid(format!("invalid docker manifest list: {e}")))?;

    Ok(ParsedManifest {
        blob_digests: Vec::new(),
        manifest_digests: list.manifests.into_iter().map(|m| m.digest).collect(),
        subject_digest: None,
        artifact_type: None,
    })
}

/// Extracts the `labels` applied to an image, from its config blob's `config.Labels` field
/// (OCI/Docker config JSON share this shape), for required-label policy enforcement.
pub fn extract_labels(config_content: &[u8]) -> KeppelResult<std::collections::HashMap<String, String>> {
    let config: Value = serde_json::from_slice(config_content)
        .map_err(|e| KeppelError::ManifestInvalid(format!("invalid image config: {e}")))?;

    let labels = config
        .get("config")
        .and_then(|c| c.get("Labels"))
        .and_then(|l| l.as_object())
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_docker_manifest() {
        let json = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
            "config": {"digest": "sha256:aaa", "size": 100},
            "layers": [{"digest": "sha256:bbb", "size": 200}]
        }"#;

        let parsed = parse_manifest(DOCKER_MANIFEST_V2, json.as_bytes()).unwrap();
        assert_eq!(parsed.blob_digests, vec!["sha256:aaa".to_string(), "sha256:bbb".to_string()]);
    }

    #[test]
    fn parses_docker_manifest_list() {
        let json = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.list.v2+json",
            "manifests": [{"digest": "sha256:ccc", "size": 500}]
        }"#;

        let parsed = parse_manifest(DOCKER_MANIFEST_LIST_V2, json.as_bytes()).unwrap();
        assert_eq!(parsed.manifest_digests, vec!["sha256:ccc".to_string()]);
    }

    #[test]
    fn rejects_unknown_media_type() {
        assert!(parse_manifest("application/unknown", b"{}").is_err());
    }

    #[test]
    fn extracts_labels_from_config() {
        let json = r#"{"config":{"Labels":{"org.example.team":"platform"}}}"#;
        let labels = extract_labels(json.as_bytes()).unwrap();
        assert_eq!(labels.get("org.example.team"), Some(&"platform".to_string()));
    }
}
