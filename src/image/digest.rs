use crate::errors::PullError;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

/// A digest identifying the exact contents of a blob or manifest
///
/// The string form is `<algorithm>:<hex>`. Only `sha256` digests can be
/// verified locally, but other well-formed algorithms still parse so they can
/// be passed back to the registry unchanged.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ContentDigest {
    serialized: String,
    colon: usize,
}

impl ContentDigest {
    /// Parse a `<algorithm>:<hex>` string
    ///
    /// ```
    /// # use tarpull::ContentDigest;
    /// let digest = ContentDigest::parse("sha256:00112233445566778899aabbccddeeff").unwrap();
    /// assert_eq!(digest.algorithm(), "sha256");
    /// assert_eq!(digest.hex_str(), "00112233445566778899aabbccddeeff");
    /// ```
    pub fn parse(s: &str) -> Result<Self, PullError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(&format!("^{}$", ContentDigest::regex_str())).unwrap();
        }
        match RE.captures(s).and_then(|c| c.name("dig_h")) {
            None => Err(PullError::InvalidReferenceFormat(s.to_owned())),
            Some(hex) => Ok(ContentDigest {
                serialized: s.to_owned(),
                colon: hex.start() - 1,
            }),
        }
    }

    /// Digest of a complete in-memory buffer
    ///
    /// ```
    /// # use tarpull::ContentDigest;
    /// let digest = ContentDigest::from_content(b"cat");
    /// assert_eq!(digest.as_str(), "sha256:77af778b51abd4a3c51c5ddd97204a9c3ae614ebccb75a606c3b6865aed6744e");
    /// ```
    pub fn from_content(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        ContentDigest::from_hasher(hasher)
    }

    /// Finish an incremental sha256 computation
    pub fn from_hasher(hasher: Sha256) -> Self {
        let serialized = format!("sha256:{:x}", hasher.finalize());
        ContentDigest {
            serialized,
            colon: "sha256".len(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// The hash algorithm name, before the colon
    pub fn algorithm(&self) -> &str {
        &self.serialized[..self.colon]
    }

    /// The lowercase hex portion, after the colon
    pub fn hex_str(&self) -> &str {
        &self.serialized[self.colon + 1..]
    }

    /// Can we recompute this digest ourselves?
    pub fn is_sha256(&self) -> bool {
        self.algorithm() == "sha256"
    }

    pub(crate) fn regex_str() -> &'static str {
        concat!(
            "(?P<dig>",
            /*  */ "(?:[a-zA-Z][a-zA-Z0-9]*)", // algorithm
            /*  */ "(?:[-_+.][a-zA-Z][a-zA-Z0-9]*)*", // algorithm extensions
            /*  */ ":",
            /*  */ "(?P<dig_h>[a-f0-9]{32,})",
            ")",
        )
    }
}

impl FromStr for ContentDigest {
    type Err = PullError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentDigest::parse(s)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl serde::Serialize for ContentDigest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for ContentDigest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentDigest::parse(&s).map_err(serde::de::Error::custom)
    }
}
