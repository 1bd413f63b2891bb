use crate::{
    errors::PullError,
    image::{ContentDigest, Platform},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Annotation some registries use to name the architecture of an index entry
pub const ARCH_ANNOTATION: &str = "com.docker.official-images.bashbrew.arch";

pub mod media_types {
    pub const MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
    pub const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

    /// Every manifest flavour we can resolve, for the `Accept` header
    pub const ACCEPT_MANIFESTS: &str = concat!(
        "application/vnd.docker.distribution.manifest.v2+json, ",
        "application/vnd.docker.distribution.manifest.list.v2+json, ",
        "application/vnd.oci.image.manifest.v1+json, ",
        "application/vnd.oci.image.index.v1+json",
    );

    pub fn is_index(media_type: &str) -> bool {
        media_type == MANIFEST_LIST || media_type == OCI_INDEX
    }

    /// Layer types whose blobs are stored without compression
    pub fn is_uncompressed_layer(media_type: &str) -> bool {
        media_type.ends_with(".tar")
    }

    pub fn is_zstd_layer(media_type: &str) -> bool {
        media_type.ends_with("+zstd")
    }
}

/// Reference from one document to a content-addressed blob or manifest
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct Link {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
    pub digest: ContentDigest,
}

/// A single-platform image: one config blob plus its ordered layers
///
/// Layers are listed base first; the last entry is applied last.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ImageManifest {
    pub config: Link,
    pub layers: Vec<Link>,
}

/// An entry of a multi-platform index
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ManifestDescriptor {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    pub digest: ContentDigest,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub platform: Option<PlatformSpec>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PlatformSpec {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub variant: Option<String>,
}

impl ManifestDescriptor {
    pub fn os(&self) -> &str {
        self.platform.as_ref().map(|p| p.os.as_str()).unwrap_or("")
    }

    pub fn variant(&self) -> Option<&str> {
        self.platform.as_ref().and_then(|p| p.variant.as_deref())
    }

    /// Architecture names this entry answers to, standard field first
    pub fn architectures(&self) -> impl Iterator<Item = &str> {
        self.platform
            .as_ref()
            .map(|p| p.architecture.as_str())
            .into_iter()
            .chain(self.annotations.get(ARCH_ANNOTATION).map(String::as_str))
            .filter(|arch| !arch.is_empty())
    }

    /// Human readable platform label, as used in error messages
    pub fn label(&self) -> String {
        let arch = self.architectures().next().unwrap_or("unknown");
        match self.variant() {
            Some(variant) => format!("{}/{}/{}", self.os(), arch, variant),
            None => format!("{}/{}", self.os(), arch),
        }
    }

    /// Same os and architecture; a requested variant must also match
    pub fn matches(&self, platform: &Platform) -> bool {
        self.os() == platform.os
            && self.architectures().any(|arch| arch == platform.architecture)
            && match &platform.variant {
                Some(wanted) => self.variant() == Some(wanted.as_str()),
                None => true,
            }
    }
}

/// Any manifest document a registry might send back
#[derive(Clone, Debug)]
pub enum ManifestDocument {
    Image(ImageManifest),
    Index(Vec<ManifestDescriptor>),
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(rename = "schemaVersion", default)]
    schema_version: u32,
    #[serde(rename = "mediaType", default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Option<Vec<ManifestDescriptor>>,
    #[serde(default)]
    config: Option<Link>,
    #[serde(default)]
    layers: Option<Vec<Link>>,
}

impl ManifestDocument {
    /// Classify and parse a manifest body
    ///
    /// The media type comes from the document itself when present, falling
    /// back on the response's `Content-Type`.
    pub fn parse(body: &[u8], content_type: Option<&str>) -> Result<Self, PullError> {
        let raw: RawManifest = serde_json::from_slice(body)?;
        if raw.schema_version == 1 {
            return Err(PullError::UnsupportedManifestType(
                "schema version 1".to_owned(),
            ));
        }
        let media_type = raw
            .media_type
            .as_deref()
            .or(content_type)
            .unwrap_or_default()
            .to_owned();
        match (raw.manifests, raw.config, raw.layers) {
            (Some(manifests), _, _) => Ok(ManifestDocument::Index(manifests)),
            (None, Some(config), Some(layers)) if !media_types::is_index(&media_type) => {
                Ok(ManifestDocument::Image(ImageManifest { config, layers }))
            }
            _ => Err(PullError::UnsupportedManifestType(media_type)),
        }
    }
}
