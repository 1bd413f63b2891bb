//! Talking to a registry server: authentication, manifests and blobs

mod auth;
mod blob;
mod client;
mod default;
mod resolve;
mod retry;

pub use auth::{AccessToken, AuthChallenge, AuthRequirement, Credentials};
pub use blob::{unpack_layer, BlobFetcher, LayerCompression};
pub use client::RegistryClient;
pub use default::DefaultRegistry;
pub use resolve::{select_manifest, ManifestResolver, Resolution};
pub use retry::RetryPolicy;
