use crate::image::{ContentDigest, Registry, Repository, Tag};
use std::fmt;

/// Either an image tag or a content digest
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum ImageVersion {
    Tag(Tag),
    ContentDigest(ContentDigest),
}

impl ImageVersion {
    pub fn as_str(&self) -> &str {
        match self {
            ImageVersion::Tag(tag) => tag.as_str(),
            ImageVersion::ContentDigest(digest) => digest.as_str(),
        }
    }
}

impl fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved image location: which server, which repository, which
/// version
///
/// Every reference has a tag, `latest` when none was given. A digest, when
/// present, pins the manifest and takes precedence over the tag for fetching;
/// the tag is still what the output archive is labelled with.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ImageReference {
    pub registry: Registry,
    pub repository: Repository,
    pub tag: Tag,
    pub digest: Option<ContentDigest>,
}

impl ImageReference {
    pub fn new(registry: Registry, repository: Repository, tag: Option<Tag>) -> Self {
        ImageReference {
            registry,
            repository,
            tag: tag.unwrap_or_default(),
            digest: None,
        }
    }

    pub fn with_digest(mut self, digest: ContentDigest) -> Self {
        self.digest = Some(digest);
        self
    }

    /// The most specific version available, used to request the manifest
    pub fn version(&self) -> ImageVersion {
        match &self.digest {
            Some(digest) => ImageVersion::ContentDigest(digest.clone()),
            None => ImageVersion::Tag(self.tag.clone()),
        }
    }

    /// Scope string for a read-only registry token
    pub fn pull_scope(&self) -> String {
        format!("repository:{}:pull", self.repository)
    }

    /// Repository name as it should appear after `docker load`
    ///
    /// Docker Hub's implicit `library/` namespace is dropped, so
    /// `library/alpine` becomes `alpine`. Other paths are kept whole.
    pub fn local_name(&self) -> String {
        match self.repository.as_str().strip_prefix("library/") {
            Some(short) => short.to_owned(),
            None => self.repository.to_string(),
        }
    }

    /// The `name:tag` entry recorded in the archive's `RepoTags`
    pub fn repo_tag(&self) -> String {
        format!("{}:{}", self.local_name(), self.tag)
    }

    /// File name for the archive, `<repository>_<tag>_<arch>.tar` with
    /// slashes flattened to underscores
    pub fn archive_file_name(&self, architecture: &str) -> String {
        format!(
            "{}_{}_{}.tar",
            self.repository.as_str().replace('/', "_"),
            self.tag,
            architecture
        )
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)?;
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}
