//! Error types you might see while pulling and repacking an image

use crate::image::{ContentDigest, Platform};
use thiserror::Error;

/// Errors during an image pull
#[derive(Error, Debug)]
pub enum PullError {
    /// invalid image reference format
    #[error("invalid image reference format: {0:?}")]
    InvalidReferenceFormat(String),

    /// invalid platform string
    #[error("invalid platform string: {0:?}")]
    InvalidPlatform(String),

    /// network request error
    #[error("network request error: {0}")]
    Network(#[from] reqwest::Error),

    /// registry server could not be reached
    #[error("registry server {url} could not be reached: {reason}")]
    RegistryUnreachable { url: String, reason: String },

    /// registry rejected our credentials or token
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// registry server requested an unsupported type of authentication
    #[error("registry server requested an unsupported type of authentication: {0:?}")]
    UnsupportedAuthentication(String),

    /// unexpected http status
    #[error("unexpected http status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    /// registry has no such resource
    #[error("not found: {0}")]
    NotFound(String),

    /// registry has no manifest for this reference
    #[error("manifest unknown: {0}")]
    ManifestUnknown(String),

    /// registry has no blob with this digest
    #[error("blob {0} is not available from the registry")]
    DigestUnavailable(ContentDigest),

    /// unsupported manifest document
    #[error("unsupported manifest type, {0:?}")]
    UnsupportedManifestType(String),

    /// unsupported type for image layer
    #[error("unsupported type for image layer, {0:?}")]
    UnsupportedLayerType(String),

    /// no manifest in the index matches the requested platform
    #[error("no manifest for platform {requested}, available: {}", available.join(", "))]
    NoMatchingPlatform {
        requested: Platform,
        available: Vec<String>,
    },

    /// calculated digest of downloaded content is not what we asked for
    #[error("calculated digest of downloaded content is not what we asked for, expected {expected}, found {found}")]
    ContentDigestMismatch {
        expected: ContentDigest,
        found: ContentDigest,
    },

    /// unexpected content size
    #[error("unexpected content size for {digest}, expected {expected} bytes, found {found}")]
    UnexpectedContentSize {
        digest: ContentDigest,
        expected: u64,
        found: u64,
    },

    /// storage io error
    #[error("storage io error: {0}")]
    Storage(#[from] std::io::Error),

    /// archive could not be written
    #[error("archive assembly failed: {0}")]
    AssemblyFailed(std::io::Error),

    /// json error
    #[error("json error: {0}")]
    JSON(#[from] serde_json::Error),

    /// asynchronous task failed during the pull
    #[error("asynchronous task failed during the pull")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// the pull was cancelled by the caller
    #[error("pull cancelled")]
    Cancelled,
}

impl PullError {
    /// Was this pull stopped by a cancellation request rather than a failure?
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PullError::Cancelled)
    }

    /// Could repeating the same request plausibly succeed?
    ///
    /// Only connection problems, timeouts and interrupted bodies qualify.
    /// Status codes are classified separately by the retry policy.
    pub fn is_transient(&self) -> bool {
        match self {
            PullError::Network(err) => {
                err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
            }
            _ => false,
        }
    }
}
