//! Legacy layer identifiers and per-layer metadata

use crate::{errors::PullError, image::ContentDigest};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Creation time recorded for every intermediate layer
pub const PLACEHOLDER_CREATED: &str = "1970-01-01T00:00:00Z";

/// Identifier of a layer in the legacy archive format
///
/// The lowercase hex SHA-256 of `parent + "\n" + blob_digest + "\n"`, with
/// an empty `parent` for the base layer. Each ID therefore depends on the
/// whole chain of layers beneath it.
pub fn synthetic_id(parent: &str, blob: &ContentDigest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent.as_bytes());
    hasher.update(b"\n");
    hasher.update(blob.as_str().as_bytes());
    hasher.update(b"\n");
    format!("{:x}", hasher.finalize())
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    pub hostname: String,
    pub domainname: String,
    pub user: String,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub tty: bool,
    pub open_stdin: bool,
    pub stdin_once: bool,
    pub env: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub image: String,
    pub volumes: Option<HashMap<String, Value>>,
    pub working_dir: String,
    pub entrypoint: Option<Vec<String>>,
    pub on_build: Option<Vec<String>>,
    pub labels: Option<HashMap<String, String>>,
}

/// Metadata shared by every layer except the last
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PlaceholderConfig {
    pub created: String,
    pub container_config: ContainerConfig,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        PlaceholderConfig {
            created: PLACEHOLDER_CREATED.to_owned(),
            container_config: ContainerConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum LayerMetadata {
    Placeholder(PlaceholderConfig),
    /// The image config, minus the fields only the modern format uses
    Image(Map<String, Value>),
}

#[derive(Serialize)]
struct LayerJson<'a> {
    #[serde(flatten)]
    metadata: &'a LayerMetadata,
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<&'a str>,
}

#[derive(Clone, Debug)]
pub struct LayerRecord {
    pub id: String,
    pub parent: Option<String>,
    pub digest: ContentDigest,
    pub metadata: LayerMetadata,
}

impl LayerRecord {
    /// Contents of the layer's `json` file
    pub fn metadata_json(&self) -> Result<Vec<u8>, PullError> {
        Ok(serde_json::to_vec(&LayerJson {
            metadata: &self.metadata,
            id: &self.id,
            parent: self.parent.as_deref(),
        })?)
    }

    /// Archive path of the layer's filesystem diff
    pub fn tar_path(&self) -> String {
        format!("{}/layer.tar", self.id)
    }
}

/// Layers of one image, base first, each linked to its parent
#[derive(Clone, Debug)]
pub struct LayerChain {
    records: Vec<LayerRecord>,
}

impl LayerChain {
    /// Link the layer digests, in manifest order, into a chain
    ///
    /// `config` is the raw image config; it becomes the final layer's
    /// metadata with `history` and `rootfs` removed.
    pub fn build(layers: &[ContentDigest], config: &[u8]) -> Result<Self, PullError> {
        let mut image_config: Map<String, Value> = serde_json::from_slice(config)?;
        for key in ["history", "rootfs", "id", "parent"] {
            image_config.remove(key);
        }
        let last = match layers.len().checked_sub(1) {
            Some(last) => last,
            None => {
                return Err(PullError::UnsupportedManifestType(
                    "image manifest lists no layers".to_owned(),
                ))
            }
        };

        let mut records: Vec<LayerRecord> = Vec::with_capacity(layers.len());
        for (index, digest) in layers.iter().enumerate() {
            let parent = records.last().map(|record| record.id.clone());
            let id = synthetic_id(parent.as_deref().unwrap_or(""), digest);
            let metadata = if index == last {
                LayerMetadata::Image(image_config.clone())
            } else {
                LayerMetadata::Placeholder(PlaceholderConfig::default())
            };
            log::debug!("layer {} {} -> {}", index, digest, id);
            records.push(LayerRecord {
                id,
                parent,
                digest: digest.clone(),
                metadata,
            });
        }
        Ok(LayerChain { records })
    }

    pub fn records(&self) -> &[LayerRecord] {
        &self.records
    }

    /// ID of the last-applied layer, which the repository index points at
    pub fn final_id(&self) -> &str {
        // build() refuses empty chains
        &self.records[self.records.len() - 1].id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &[u8] = br#"{
        "architecture": "amd64",
        "os": "linux",
        "config": {"Cmd": ["/bin/sh"], "Env": ["PATH=/bin"]},
        "history": [{"created_by": "ADD file"}],
        "rootfs": {"type": "layers", "diff_ids": []}
    }"#;

    fn digests() -> Vec<ContentDigest> {
        vec![
            ContentDigest::from_content(b"base"),
            ContentDigest::from_content(b"middle"),
            ContentDigest::from_content(b"top"),
        ]
    }

    #[test]
    fn id_formula() {
        let blob = ContentDigest::from_content(b"base");
        let expected = ContentDigest::from_content(format!("\n{}\n", blob).as_bytes());
        assert_eq!(synthetic_id("", &blob), expected.hex_str());

        let parent = synthetic_id("", &blob);
        let child = ContentDigest::from_content(b"child");
        let expected = ContentDigest::from_content(format!("{}\n{}\n", parent, child).as_bytes());
        assert_eq!(synthetic_id(&parent, &child), expected.hex_str());
    }

    #[test]
    fn chain_links_parents() {
        let chain = LayerChain::build(&digests(), CONFIG).unwrap();
        let records = chain.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].parent, None);
        assert_eq!(records[1].parent.as_deref(), Some(records[0].id.as_str()));
        assert_eq!(records[2].parent.as_deref(), Some(records[1].id.as_str()));
        assert_eq!(chain.final_id(), records[2].id);
        for (record, digest) in records.iter().zip(digests()) {
            assert_eq!(
                record.id,
                synthetic_id(record.parent.as_deref().unwrap_or(""), &digest)
            );
        }
    }

    #[test]
    fn chain_is_deterministic() {
        let a = LayerChain::build(&digests(), CONFIG).unwrap();
        let b = LayerChain::build(&digests(), CONFIG).unwrap();
        let ids = |chain: &LayerChain| -> Vec<String> {
            chain.records().iter().map(|r| r.id.clone()).collect()
        };
        assert_eq!(ids(&a), ids(&b));

        let mut reordered = digests();
        reordered.swap(0, 1);
        let c = LayerChain::build(&reordered, CONFIG).unwrap();
        assert_ne!(ids(&a)[1], ids(&c)[1]);
        assert_ne!(a.final_id(), c.final_id());
    }

    #[test]
    fn placeholder_metadata() {
        let chain = LayerChain::build(&digests(), CONFIG).unwrap();
        let json = String::from_utf8(chain.records()[0].metadata_json().unwrap()).unwrap();
        assert!(json.starts_with(concat!(
            r#"{"created":"1970-01-01T00:00:00Z","container_config":{"Hostname":"","Domainname":"","User":"","#,
            r#""AttachStdin":false,"AttachStdout":false,"AttachStderr":false,"Tty":false,"OpenStdin":false,"#,
            r#""StdinOnce":false,"Env":null,"Cmd":null,"Image":"","Volumes":null,"WorkingDir":"","#,
            r#""Entrypoint":null,"OnBuild":null,"Labels":null},"id":""#,
        )));
        assert!(!json.contains("parent"));

        let second: Value = serde_json::from_slice(&chain.records()[1].metadata_json().unwrap())
            .unwrap();
        assert_eq!(second["parent"], chain.records()[0].id.as_str());
        assert_eq!(second["created"], PLACEHOLDER_CREATED);
    }

    #[test]
    fn final_layer_carries_image_config() {
        let chain = LayerChain::build(&digests(), CONFIG).unwrap();
        let last: Value =
            serde_json::from_slice(&chain.records()[2].metadata_json().unwrap()).unwrap();
        assert_eq!(last["architecture"], "amd64");
        assert_eq!(last["config"]["Cmd"][0], "/bin/sh");
        assert_eq!(last["id"], chain.final_id());
        assert_eq!(last["parent"], chain.records()[1].id.as_str());
        assert!(last.get("history").is_none());
        assert!(last.get("rootfs").is_none());
    }

    #[test]
    fn empty_manifest_is_refused() {
        assert!(LayerChain::build(&[], CONFIG).is_err());
    }
}
