//! From an image reference to one platform-specific manifest

use crate::{
    errors::PullError,
    image::{ContentDigest, ImageReference, ImageVersion, Platform},
    manifest::{ImageManifest, ManifestDescriptor, ManifestDocument},
    registry::RegistryClient,
};
use reqwest::header;
use tokio_util::sync::CancellationToken;

/// Outcome of manifest resolution
#[derive(Clone, Debug)]
pub struct Resolution {
    pub manifest: ImageManifest,
    /// Digest of the platform-specific manifest document
    pub digest: ContentDigest,
    /// Platform labels offered by the index, empty for a single manifest
    pub available: Vec<String>,
}

impl Resolution {
    pub fn was_index(&self) -> bool {
        !self.available.is_empty()
    }
}

pub struct ManifestResolver {
    client: RegistryClient,
    verify_digests: bool,
    fallback_architecture: Option<String>,
}

impl ManifestResolver {
    pub fn new(
        client: RegistryClient,
        verify_digests: bool,
        fallback_architecture: Option<String>,
    ) -> Self {
        ManifestResolver {
            client,
            verify_digests,
            fallback_architecture,
        }
    }

    /// Fetch the manifest for `reference`, following an index to the entry
    /// for `platform`
    pub async fn resolve(
        &self,
        reference: &ImageReference,
        platform: &Platform,
        cancel: &CancellationToken,
    ) -> Result<Resolution, PullError> {
        let (document, digest) = self.fetch(reference, reference.version(), cancel).await?;
        let entries = match document {
            ManifestDocument::Image(manifest) => {
                log::debug!("{} is a single-platform manifest", reference);
                return Ok(Resolution {
                    manifest,
                    digest,
                    available: vec![],
                });
            }
            ManifestDocument::Index(entries) => entries,
        };

        let available: Vec<String> = entries.iter().map(ManifestDescriptor::label).collect();
        log::info!(
            "{} is a multi-platform index, linux platforms: {}",
            reference,
            entries
                .iter()
                .filter(|entry| entry.os() == "linux")
                .map(ManifestDescriptor::label)
                .collect::<Vec<_>>()
                .join(", ")
        );
        let selected = select_manifest(&entries, platform, self.fallback_architecture.as_deref())?;
        log::info!("selected {} manifest {}", selected.label(), selected.digest);

        let version = ImageVersion::ContentDigest(selected.digest.clone());
        match self.fetch(reference, version, cancel).await? {
            (ManifestDocument::Image(manifest), digest) => Ok(Resolution {
                manifest,
                digest,
                available,
            }),
            (ManifestDocument::Index(_), _) => Err(PullError::UnsupportedManifestType(
                "index nested inside an index".to_owned(),
            )),
        }
    }

    async fn fetch(
        &self,
        reference: &ImageReference,
        version: ImageVersion,
        cancel: &CancellationToken,
    ) -> Result<(ManifestDocument, ContentDigest), PullError> {
        let url = self.client.manifest_url(&reference.repository, &version);
        log::debug!("fetching manifest {}", url);
        let response = match self.client.get(&url, cancel).await {
            Err(PullError::NotFound(_)) => {
                return Err(PullError::ManifestUnknown(format!(
                    "{}/{}:{}",
                    reference.registry, reference.repository, version
                )))
            }
            other => other?,
        };
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_owned());
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PullError::Cancelled),
            body = response.bytes() => body?,
        };
        log::trace!("raw json manifest, {}", String::from_utf8_lossy(&body));

        let found = ContentDigest::from_content(&body);
        if let ImageVersion::ContentDigest(expected) = &version {
            if !expected.is_sha256() || !self.verify_digests {
                log::warn!("manifest {} was not verified", expected);
            } else if expected != &found {
                return Err(PullError::ContentDigestMismatch {
                    expected: expected.clone(),
                    found,
                });
            }
        }
        let document = ManifestDocument::parse(&body, content_type.as_deref())?;
        Ok((document, found))
    }
}

/// Choose the index entry to pull
///
/// An entry matching `platform` exactly wins. Failing that, an entry for the
/// same os and the `fallback` architecture is accepted.
pub fn select_manifest<'a>(
    entries: &'a [ManifestDescriptor],
    platform: &Platform,
    fallback: Option<&str>,
) -> Result<&'a ManifestDescriptor, PullError> {
    if let Some(entry) = entries.iter().find(|entry| entry.matches(platform)) {
        return Ok(entry);
    }
    if let Some(arch) = fallback.filter(|arch| *arch != platform.architecture) {
        let fallback_platform = Platform {
            os: platform.os.clone(),
            architecture: arch.to_owned(),
            variant: None,
        };
        if let Some(entry) = entries.iter().find(|entry| entry.matches(&fallback_platform)) {
            log::warn!(
                "no manifest for {}, falling back to {}",
                platform,
                entry.label()
            );
            return Ok(entry);
        }
    }
    Err(PullError::NoMatchingPlatform {
        requested: platform.clone(),
        available: entries.iter().map(ManifestDescriptor::label).collect(),
    })
}
