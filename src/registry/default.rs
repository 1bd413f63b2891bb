use crate::image::{ImageName, ImageReference, Registry, Repository};

/// The registry used for image names that don't say where they live
///
/// Docker Hub is reached as `registry-1.docker.io` but users write
/// `docker.io`, and its official images sit under an implicit `library/`
/// namespace. A plain [Registry] converts [Into] a [DefaultRegistry] with
/// neither quirk.
#[derive(Clone, Debug)]
pub struct DefaultRegistry {
    /// Connect to the registry under this name
    pub network_name: Registry,
    /// Image names may also refer to the registry by these names
    pub also_known_as: Vec<Registry>,
    /// Prepended to repositories that have only a single path component
    pub library_prefix: Option<Repository>,
}

impl From<Registry> for DefaultRegistry {
    fn from(network_name: Registry) -> Self {
        DefaultRegistry {
            network_name,
            also_known_as: vec![],
            library_prefix: None,
        }
    }
}

impl Default for DefaultRegistry {
    fn default() -> Self {
        DefaultRegistry::docker_hub()
    }
}

impl DefaultRegistry {
    pub fn docker_hub() -> Self {
        DefaultRegistry {
            network_name: "registry-1.docker.io".parse().unwrap(),
            also_known_as: vec!["docker.io".parse().unwrap()],
            library_prefix: Some("library".parse().unwrap()),
        }
    }

    /// Send default-registry pulls to a mirror instead, keeping the library
    /// prefix and recognizing the old names
    pub fn mirror(&self, mirror: Registry) -> Self {
        let mut also_known_as = self.also_known_as.clone();
        also_known_as.push(self.network_name.clone());
        DefaultRegistry {
            network_name: mirror,
            also_known_as,
            library_prefix: self.library_prefix.clone(),
        }
    }

    /// Does this image name refer to the default registry?
    pub fn is_default(&self, registry: Option<&Registry>) -> bool {
        match registry {
            None => true,
            Some(registry) => {
                registry == &self.network_name || self.also_known_as.contains(registry)
            }
        }
    }

    /// Fill in the server and complete repository path for an image name
    pub fn resolve(&self, name: &ImageName) -> ImageReference {
        let (registry, prefix) = match name.registry() {
            Some(registry) if !self.is_default(Some(registry)) => (registry.clone(), None),
            _ => (self.network_name.clone(), self.library_prefix.as_ref()),
        };
        let repository = match prefix {
            Some(prefix) if name.repository().is_single_component() => {
                name.repository().with_prefix(prefix)
            }
            _ => name.repository().clone(),
        };
        let reference = ImageReference::new(registry, repository, name.tag().cloned());
        match name.content_digest() {
            Some(digest) => reference.with_digest(digest.clone()),
            None => reference,
        }
    }
}
