//! Streaming downloads of content-addressed blobs

use crate::{
    errors::PullError,
    image::{ContentDigest, Repository},
    manifest::{media_types, Link},
    registry::{retry, RegistryClient},
};
use async_compression::tokio::bufread::GzipDecoder;
use sha2::{Digest, Sha256};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter},
};
use tokio_util::sync::CancellationToken;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// How a layer blob is stored on the registry
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LayerCompression {
    Gzip,
    Uncompressed,
}

impl LayerCompression {
    /// Decide from the descriptor's media type, rejecting what we can't unpack
    pub fn from_link(link: &Link) -> Result<Self, PullError> {
        if media_types::is_zstd_layer(&link.media_type) {
            Err(PullError::UnsupportedLayerType(link.media_type.clone()))
        } else if media_types::is_uncompressed_layer(&link.media_type) {
            Ok(LayerCompression::Uncompressed)
        } else {
            Ok(LayerCompression::Gzip)
        }
    }
}

/// Downloads blobs from one repository
#[derive(Clone)]
pub struct BlobFetcher {
    client: RegistryClient,
    repository: Repository,
    verify_digests: bool,
}

impl BlobFetcher {
    pub fn new(client: RegistryClient, repository: Repository, verify_digests: bool) -> Self {
        BlobFetcher {
            client,
            repository,
            verify_digests,
        }
    }

    /// Will the content of this blob be checked against its digest?
    pub fn verifies(&self, link: &Link) -> bool {
        self.verify_digests && link.digest.is_sha256()
    }

    /// Stream a blob to `dest`, returning the number of bytes written
    ///
    /// Data goes to a `.part` file next to `dest`, which is renamed only
    /// after the body is complete and verified. On any failure, including
    /// cancellation, the partial file is removed. Bodies interrupted by a
    /// transient network error are downloaded again from the start.
    ///
    /// `on_progress` receives `(bytes_so_far, total)`, where `total` is 0 if
    /// the server sent no length.
    pub async fn fetch(
        &self,
        link: &Link,
        dest: &Path,
        on_progress: &(dyn Fn(u64, u64) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<u64, PullError> {
        let url = self.client.blob_url(&self.repository, &link.digest);
        let part = part_path(dest);
        let policy = self.client.retry_policy().clone();
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(PullError::Cancelled);
            }
            match self.fetch_once(&url, link, &part, on_progress, cancel).await {
                Ok(written) => {
                    fs::rename(&part, dest).await?;
                    log::debug!("{} complete, {} bytes", link.digest, written);
                    return Ok(written);
                }
                Err(err) => {
                    remove_if_present(&part).await?;
                    if !(err.is_transient() && policy.allows_another(attempt)) {
                        return Err(match err {
                            PullError::NotFound(_) => {
                                PullError::DigestUnavailable(link.digest.clone())
                            }
                            err => err,
                        });
                    }
                    let delay = policy.backoff(attempt);
                    log::warn!(
                        "download of {} interrupted: {}, restarting in {:?}",
                        link.digest,
                        err,
                        delay
                    );
                    retry::pause(delay, cancel).await?;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_once(
        &self,
        url: &str,
        link: &Link,
        part: &Path,
        on_progress: &(dyn Fn(u64, u64) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<u64, PullError> {
        let mut response = self.client.get(url, cancel).await?;
        let total = response.content_length().unwrap_or(link.size);
        let mut writer = BufWriter::new(File::create(part).await?);
        let mut hasher = Sha256::new();
        let mut written = 0;
        on_progress(0, total);
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PullError::Cancelled),
                chunk = response.chunk() => chunk?,
            };
            match chunk {
                None => break,
                Some(chunk) => {
                    writer.write_all(&chunk).await?;
                    hasher.update(&chunk);
                    written += chunk.len() as u64;
                    on_progress(written, total);
                }
            }
        }
        writer.flush().await?;
        self.check(link, hasher, written)?;
        Ok(written)
    }

    /// Download a small blob into memory, gunzipping it if it arrived
    /// compressed
    ///
    /// Interrupted bodies are downloaded again, as for [BlobFetcher::fetch].
    pub async fn fetch_config(
        &self,
        link: &Link,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, PullError> {
        let url = self.client.blob_url(&self.repository, &link.digest);
        let policy = self.client.retry_policy().clone();
        let mut attempt = 1;
        let body = loop {
            match self.read_body(&url, cancel).await {
                Ok(body) => break body,
                Err(PullError::NotFound(_)) => {
                    return Err(PullError::DigestUnavailable(link.digest.clone()))
                }
                Err(err) if err.is_transient() && policy.allows_another(attempt) => {
                    let delay = policy.backoff(attempt);
                    log::warn!(
                        "download of config {} interrupted: {}, restarting in {:?}",
                        link.digest,
                        err,
                        delay
                    );
                    retry::pause(delay, cancel).await?;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };
        let mut hasher = Sha256::new();
        hasher.update(&body);
        self.check(link, hasher, body.len() as u64)?;

        if body.starts_with(&GZIP_MAGIC) {
            log::debug!("config {} is gzip compressed", link.digest);
            let mut plain = Vec::new();
            GzipDecoder::new(&body[..]).read_to_end(&mut plain).await?;
            Ok(plain)
        } else {
            Ok(body)
        }
    }

    async fn read_body(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>, PullError> {
        let response = self.client.get(url, cancel).await?;
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PullError::Cancelled),
            body = response.bytes() => body?,
        };
        Ok(body.to_vec())
    }

    fn check(&self, link: &Link, hasher: Sha256, written: u64) -> Result<(), PullError> {
        if !self.verifies(link) {
            return Ok(());
        }
        if link.size != 0 && link.size != written {
            return Err(PullError::UnexpectedContentSize {
                digest: link.digest.clone(),
                expected: link.size,
                found: written,
            });
        }
        let found = ContentDigest::from_hasher(hasher);
        if found != link.digest {
            return Err(PullError::ContentDigestMismatch {
                expected: link.digest.clone(),
                found,
            });
        }
        Ok(())
    }
}

/// Turn a downloaded layer blob into a plain tar file at `dest`
///
/// The compressed blob is consumed. Gzip layers whose content turns out not
/// to start with the gzip magic are treated as plain tar.
pub async fn unpack_layer(
    compression: LayerCompression,
    blob: &Path,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<u64, PullError> {
    let gzipped = compression == LayerCompression::Gzip && has_gzip_magic(blob).await?;
    if !gzipped {
        fs::rename(blob, dest).await?;
        return Ok(fs::metadata(dest).await?.len());
    }

    let part = part_path(dest);
    let mut decoder = GzipDecoder::new(BufReader::new(File::open(blob).await?));
    decoder.multiple_members(true);
    let mut writer = BufWriter::new(File::create(&part).await?);
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PullError::Cancelled),
        copied = tokio::io::copy(&mut decoder, &mut writer) => copied.map_err(PullError::from),
    };
    let result = match result {
        Ok(size) => writer.flush().await.map(|()| size).map_err(PullError::from),
        Err(err) => Err(err),
    };
    drop(writer);
    match result {
        Ok(size) => {
            fs::rename(&part, dest).await?;
            fs::remove_file(blob).await?;
            log::debug!("decompressed {:?} into {} bytes", blob, size);
            Ok(size)
        }
        Err(err) => {
            remove_if_present(&part).await?;
            Err(err)
        }
    }
}

async fn has_gzip_magic(path: &Path) -> Result<bool, PullError> {
    let mut magic = [0u8; 2];
    let mut file = File::open(path).await?;
    match file.read_exact(&mut magic).await {
        Ok(_) => Ok(magic == GZIP_MAGIC),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

pub(crate) async fn remove_if_present(path: &Path) -> Result<(), PullError> {
    match fs::remove_file(path).await {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
        _ => Ok(()),
    }
}
