//! OCI Manifest Parsing
//!
//! Supports OCI image manifests, OCI indexes and their Docker v2 equivalents.
//! Artifact manifests share the image manifest layout; files are carried as
//! layers annotated with `org.opencontainers.image.title`.
//! See: https://github.com/opencontainers/image-spec/blob/main/manifest.md

use crate::registry::TransportError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Annotation naming the file a layer should be written to
pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";

/// OCI Media Types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaType {
    /// OCI Image Index
    OciIndex,
    /// OCI Image Manifest
    OciManifest,
    /// Docker Manifest List (fat manifest)
    DockerManifestList,
    /// Docker Manifest v2
    DockerManifestV2,
    /// Unknown/other media type
    Other(String),
}

impl MediaType {
    pub fn parse(s: &str) -> Self {
        match s {
            "application/vnd.oci.image.index.v1+json" => MediaType::OciIndex,
            "application/vnd.oci.image.manifest.v1+json" => MediaType::OciManifest,
            "application/vnd.docker.distribution.manifest.list.v2+json" => {
                MediaType::DockerManifestList
            }
            "application/vnd.docker.distribution.manifest.v2+json" => MediaType::DockerManifestV2,
            other => MediaType::Other(other.to_string()),
        }
    }

    /// Media types accepted when resolving a manifest
    pub fn manifest_accept_header() -> String {
        [
            MediaType::OciManifest,
            MediaType::OciIndex,
            MediaType::DockerManifestV2,
            MediaType::DockerManifestList,
        ]
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaType::OciIndex => write!(f, "application/vnd.oci.image.index.v1+json"),
            MediaType::OciManifest => write!(f, "application/vnd.oci.image.manifest.v1+json"),
            MediaType::DockerManifestList => {
                write!(
                    f,
                    "application/vnd.docker.distribution.manifest.list.v2+json"
                )
            }
            MediaType::DockerManifestV2 => {
                write!(f, "application/vnd.docker.distribution.manifest.v2+json")
            }
            MediaType::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Content descriptor - refers to a blob by digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// MIME type of the referenced content
    #[serde(rename = "mediaType")]
    pub media_type: String,

    /// Content hash (e.g., "sha256:abc123...")
    pub digest: String,

    /// Size in bytes
    pub size: u64,

    /// Optional annotations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            annotations: None,
        }
    }

    /// Attach a title annotation
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.annotations
            .get_or_insert_with(HashMap::new)
            .insert(ANNOTATION_TITLE.to_string(), title.into());
        self
    }

    /// File name this blob should be written to, if any
    pub fn title(&self) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_TITLE))
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// OCI Image Manifest (also used for Docker v2 manifests, which share the layout)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    #[serde(rename = "artifactType", default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    /// Reference to the configuration blob
    pub config: Descriptor,

    /// Layer descriptors
    #[serde(default)]
    pub layers: Vec<Descriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

impl ImageManifest {
    /// Every blob referenced by this manifest, config first
    pub fn blobs(&self) -> impl Iterator<Item = &Descriptor> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }
}

/// OCI Image Index / Docker Manifest List
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestIndex {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    pub manifests: Vec<Descriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

/// Enum representing the manifest shapes a registry may return
#[derive(Debug, Clone)]
pub enum ManifestKind {
    /// Image or artifact manifest
    Image(ImageManifest),
    /// Index / manifest list
    Index(ManifestIndex),
}

/// Parse any manifest type from JSON
pub fn parse_manifest(data: &[u8]) -> Result<ManifestKind, TransportError> {
    #[derive(Deserialize)]
    struct MediaTypeProbe {
        #[serde(rename = "mediaType")]
        media_type: Option<String>,
        manifests: Option<Vec<serde_json::Value>>,
    }

    let invalid = |e: serde_json::Error| TransportError::InvalidResponse(format!("manifest: {}", e));

    let probe: MediaTypeProbe = serde_json::from_slice(data).map_err(invalid)?;

    let is_index = probe.manifests.is_some()
        || matches!(
            probe.media_type.as_deref().map(MediaType::parse),
            Some(MediaType::OciIndex | MediaType::DockerManifestList)
        );

    if is_index {
        let index: ManifestIndex = serde_json::from_slice(data).map_err(invalid)?;
        return Ok(ManifestKind::Index(index));
    }

    let manifest: ImageManifest = serde_json::from_slice(data).map_err(invalid)?;
    Ok(ManifestKind::Image(manifest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_artifact_manifest() {
        let json = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "artifactType": "application/vnd.example.zone",
            "config": {
                "mediaType": "application/vnd.oci.empty.v1+json",
                "digest": "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a",
                "size": 2
            },
            "layers": [
                {
                    "mediaType": "text/plain",
                    "digest": "sha256:def456",
                    "size": 5678,
                    "annotations": { "org.opencontainers.image.title": "db.example.org" }
                }
            ]
        }"#;

        let ManifestKind::Image(manifest) = parse_manifest(json.as_bytes()).unwrap() else {
            panic!("expected image manifest");
        };
        assert_eq!(manifest.layers.len(), 1);
        assert_eq!(manifest.layers[0].title(), Some("db.example.org"));
        assert_eq!(manifest.config.title(), None);
        assert_eq!(manifest.blobs().count(), 2);
    }

    #[test]
    fn test_parse_index_without_media_type() {
        let json = r#"{
            "schemaVersion": 2,
            "manifests": [
                { "mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "sha256:aaa", "size": 10 }
            ]
        }"#;

        match parse_manifest(json.as_bytes()).unwrap() {
            ManifestKind::Index(index) => assert_eq!(index.manifests[0].digest, "sha256:aaa"),
            other => panic!("expected index, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_garbage_is_invalid_response() {
        let err = parse_manifest(b"not json").unwrap_err();
        assert!(matches!(err, TransportError::InvalidResponse(_)));
    }

    #[test]
    fn test_accept_header_lists_manifest_types() {
        let accept = MediaType::manifest_accept_header();
        assert!(accept.contains("application/vnd.oci.image.manifest.v1+json"));
        assert!(accept.contains("application/vnd.docker.distribution.manifest.list.v2+json"));
    }
}
