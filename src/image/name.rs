use crate::{
    errors::PullError,
    image::{ContentDigest, Registry, Repository, Tag},
};
use regex::Regex;
use std::{fmt, str::FromStr};

/// Parsed Docker-style image reference, as typed by a user
///
/// A complete name is `[registry/]repository[:tag][@digest]`. Only the
/// repository is mandatory. Like Docker, the first path component is taken to
/// be a registry when it contains a dot or a port number, or is exactly
/// `localhost`; otherwise it belongs to the repository.
///
/// Names are turned into a fully specified [crate::ImageReference] by
/// [crate::registry::DefaultRegistry::resolve].
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct ImageName {
    registry: Option<Registry>,
    repository: Repository,
    tag: Option<Tag>,
    digest: Option<ContentDigest>,
}

impl ImageName {
    pub fn parse(s: &str) -> Result<Self, PullError> {
        lazy_static! {
            static ref HAS_REGISTRY: Regex = Regex::new(concat!(
                "^(?:",
                /* */ "[^/]*[.:][^/]*", // a dot or a port
                /* */ "|localhost",
                ")/",
            ))
            .unwrap();
            static ref WITH_REGISTRY: Regex = Regex::new(&format!(
                "^{}/{}(?::{})?(?:@{})?$",
                Registry::regex_str(),
                Repository::regex_str(),
                Tag::regex_str(),
                ContentDigest::regex_str()
            ))
            .unwrap();
            static ref NO_REGISTRY: Regex = Regex::new(&format!(
                "^{}(?::{})?(?:@{})?$",
                Repository::regex_str(),
                Tag::regex_str(),
                ContentDigest::regex_str()
            ))
            .unwrap();
        }
        let invalid = || PullError::InvalidReferenceFormat(s.to_owned());
        let (captures, has_registry) = if HAS_REGISTRY.is_match(s) {
            (WITH_REGISTRY.captures(s).ok_or_else(invalid)?, true)
        } else {
            (NO_REGISTRY.captures(s).ok_or_else(invalid)?, false)
        };
        let registry = match captures.name("reg") {
            Some(m) if has_registry => Some(Registry::parse(m.as_str())?),
            _ => None,
        };
        let repository = Repository::parse(captures.name("repo").ok_or_else(invalid)?.as_str())?;
        let tag = captures.name("tag").map(|m| Tag::parse(m.as_str())).transpose()?;
        let digest = captures
            .name("dig")
            .map(|m| ContentDigest::parse(m.as_str()))
            .transpose()?;
        Ok(ImageName {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Assemble a name from separate parts, checking that it would parse back
    /// the same way
    pub fn from_parts(
        registry: Option<&str>,
        repository: &str,
        tag: Option<&str>,
        digest: Option<&str>,
    ) -> Result<Self, PullError> {
        let mut combined = String::new();
        if let Some(registry) = registry {
            combined.push_str(registry);
            combined.push('/');
        }
        combined.push_str(repository);
        if let Some(tag) = tag {
            combined.push(':');
            combined.push_str(tag);
        }
        if let Some(digest) = digest {
            combined.push('@');
            combined.push_str(digest);
        }
        let parsed = ImageName::parse(&combined)?;
        if parsed.as_parts() == (registry, repository, tag, digest) {
            Ok(parsed)
        } else {
            Err(PullError::InvalidReferenceFormat(combined))
        }
    }

    pub fn as_parts(&self) -> (Option<&str>, &str, Option<&str>, Option<&str>) {
        (
            self.registry.as_ref().map(Registry::as_str),
            self.repository.as_str(),
            self.tag.as_ref().map(Tag::as_str),
            self.digest.as_ref().map(ContentDigest::as_str),
        )
    }

    pub fn registry(&self) -> Option<&Registry> {
        self.registry.as_ref()
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    pub fn content_digest(&self) -> Option<&ContentDigest> {
        self.digest.as_ref()
    }
}

impl FromStr for ImageName {
    type Err = PullError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageName::parse(s)
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
