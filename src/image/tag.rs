use crate::errors::PullError;
use regex::Regex;
use std::{fmt, str::FromStr};

/// A named image version, at most 128 characters
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Tag {
    serialized: String,
}

impl Tag {
    pub fn parse(s: &str) -> Result<Self, PullError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(&format!("^{}$", Tag::regex_str())).unwrap();
        }
        if RE.is_match(s) {
            Ok(Tag {
                serialized: s.to_owned(),
            })
        } else {
            Err(PullError::InvalidReferenceFormat(s.to_owned()))
        }
    }

    /// The tag used when a reference names none
    pub fn latest() -> Self {
        Tag {
            serialized: "latest".to_owned(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    pub(crate) fn regex_str() -> &'static str {
        "(?P<tag>[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,127})"
    }
}

impl Default for Tag {
    fn default() -> Self {
        Tag::latest()
    }
}

impl FromStr for Tag {
    type Err = PullError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tag::parse(s)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
