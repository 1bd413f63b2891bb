use crate::errors::PullError;
use regex::Regex;
use std::{fmt, str::FromStr};

/// Path of an image repository on a registry, like `library/alpine`
///
/// One or more slash-separated components of lowercase alphanumerics, each
/// optionally joined internally by a single period, one or two underscores,
/// or any run of dashes.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Repository {
    serialized: String,
}

impl Repository {
    pub fn parse(s: &str) -> Result<Self, PullError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(&format!("^{}$", Repository::regex_str())).unwrap();
        }
        if RE.is_match(s) {
            Ok(Repository {
                serialized: s.to_owned(),
            })
        } else {
            Err(PullError::InvalidReferenceFormat(s.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Does this path have only one component?
    pub fn is_single_component(&self) -> bool {
        !self.serialized.contains('/')
    }

    /// Prefix another path onto this one
    pub fn with_prefix(&self, prefix: &Repository) -> Repository {
        Repository {
            serialized: format!("{}/{}", prefix.serialized, self.serialized),
        }
    }

    pub(crate) fn regex_str() -> &'static str {
        concat!(
            "(?P<repo>",
            /*  */ "[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*",
            /*  */ "(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*",
            ")",
        )
    }
}

impl FromStr for Repository {
    type Err = PullError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Repository::parse(s)
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
