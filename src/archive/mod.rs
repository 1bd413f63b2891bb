//! The legacy image archive understood by `docker load`

mod assemble;
mod chain;

pub use assemble::{
    ArchiveAssembler, ArchiveContents, ArchiveManifestEntry, LAYER_VERSION, MANIFEST_FILE,
    REPOSITORIES_FILE,
};
pub use chain::{
    synthetic_id, ContainerConfig, LayerChain, LayerMetadata, LayerRecord, PlaceholderConfig,
    PLACEHOLDER_CREATED,
};
