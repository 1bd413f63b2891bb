//! The pull operation, from image name to archive file

mod observer;
mod progress;

pub use observer::{NoopObserver, PullObserver, PullState};

use crate::{
    archive::{ArchiveAssembler, ArchiveContents, LayerChain},
    builder::PullerBuilder,
    errors::PullError,
    image::{ContentDigest, ImageName, ImageReference, Platform, Registry},
    manifest::Link,
    registry::{
        unpack_layer, BlobFetcher, Credentials, DefaultRegistry, LayerCompression,
        ManifestResolver, RegistryClient, RetryPolicy,
    },
};
use progress::ProgressTracker;
use reqwest::header::HeaderValue;
use std::{
    collections::{HashMap, HashSet},
    env,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs, sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;

/// A finished pull
#[derive(Clone, Debug)]
pub struct PulledImage {
    /// The archive file, ready for `docker load`
    pub archive: PathBuf,
    pub reference: ImageReference,
    /// Digest of the platform-specific manifest that was pulled
    pub manifest_digest: ContentDigest,
    /// Synthetic ID of the top layer, as recorded in `repositories`
    pub final_layer_id: String,
}

/// Pulls images and writes them as loadable archives
///
/// One puller can run any number of pulls, concurrently if you like; each
/// pull gets its own working directory and its own registry session.
#[derive(Clone)]
pub struct Puller {
    pub(crate) http: reqwest::Client,
    pub(crate) default_registry: DefaultRegistry,
    pub(crate) logins: HashMap<Registry, Credentials>,
    pub(crate) plain_http: HashSet<Registry>,
    pub(crate) retry: RetryPolicy,
    pub(crate) concurrency: usize,
    pub(crate) verify_digests: bool,
    pub(crate) fallback_architecture: Option<String>,
    pub(crate) work_root: PathBuf,
    pub(crate) output_dir: PathBuf,
}

impl Puller {
    /// A puller with default settings
    pub fn new() -> Result<Puller, PullError> {
        Puller::builder().build()
    }

    pub fn builder() -> PullerBuilder {
        PullerBuilder::new()
    }

    /// The `User-Agent` sent unless the builder sets another
    pub fn default_user_agent() -> HeaderValue {
        static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
        HeaderValue::from_static(USER_AGENT)
    }

    /// Where working directories go unless the builder says otherwise
    ///
    /// This is `$TARPULL_TMPDIR` when set, else the system temp directory.
    pub fn default_work_root() -> PathBuf {
        match env::var_os("TARPULL_TMPDIR") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => env::temp_dir(),
        }
    }

    /// Fill in the registry, library prefix and transport for an image name
    pub fn reference_for(&self, name: &ImageName) -> ImageReference {
        let mut reference = self.default_registry.resolve(name);
        if self.plain_http.contains(&reference.registry) {
            reference.registry = reference.registry.plain_http();
        }
        reference
    }

    fn credentials_for(&self, registry: &Registry) -> Option<Credentials> {
        if let Some(credentials) = self.logins.get(registry) {
            return Some(credentials.clone());
        }
        if self.default_registry.is_default(Some(registry)) {
            let default = &self.default_registry;
            return std::iter::once(&default.network_name)
                .chain(default.also_known_as.iter())
                .find_map(|name| self.logins.get(name).cloned());
        }
        None
    }

    /// Path the archive for `reference` will be written to
    pub fn archive_path(&self, reference: &ImageReference, platform: &Platform) -> PathBuf {
        self.output_dir
            .join(reference.archive_file_name(&platform.architecture))
    }

    /// Pull an image and write it as an archive in the output directory
    ///
    /// Cancelling `cancel` stops the pull at the next opportunity; the result
    /// is then [PullError::Cancelled]. Whatever the outcome, the working
    /// directory is removed and no partially written archive is left behind.
    pub async fn pull(
        &self,
        name: &ImageName,
        platform: &Platform,
        observer: Arc<dyn PullObserver>,
        cancel: &CancellationToken,
    ) -> Result<PulledImage, PullError> {
        let reference = self.reference_for(name);
        let session = PullSession {
            puller: self,
            platform,
            observer: observer.clone(),
            progress: ProgressTracker::new(observer.clone()),
        };
        observer.state_changed(PullState::Idle);
        session.say(log::Level::Info, &format!("pulling {} for {}", reference, platform));

        let work_dir = WorkDir::create(&self.work_root).await?;
        let result = session.run(&reference, &work_dir, cancel).await;
        if let Err(err) = &result {
            if err.is_cancelled() {
                observer.state_changed(PullState::Cancelling);
            }
        }
        if let Err(err) = work_dir.remove().await {
            log::warn!("could not remove {:?}: {}", work_dir.path, err);
        }
        match &result {
            Ok(pulled) => {
                session.progress.overall(100);
                observer.state_changed(PullState::Done);
                session.say(log::Level::Info, &format!("wrote {:?}", pulled.archive));
            }
            Err(err) if err.is_cancelled() => {
                observer.state_changed(PullState::Cancelled);
                session.say(log::Level::Warn, &format!("pull of {} cancelled", reference));
            }
            Err(err) => {
                session.say(log::Level::Error, &format!("pull of {} failed: {}", reference, err));
            }
        }
        result
    }
}

/// Directory holding everything a single pull writes before the archive
///
/// Removed on drop as well, for pulls whose future is dropped before
/// they finish.
struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    async fn create(root: &Path) -> Result<Self, PullError> {
        fs::create_dir_all(root).await?;
        let path = root.join(format!(
            "tarpull-{}-{}",
            std::process::id(),
            rand::random::<u64>()
        ));
        fs::create_dir(&path).await?;
        log::debug!("working directory {:?}", path);
        Ok(WorkDir { path })
    }

    fn blobs(&self) -> PathBuf {
        self.path.join("blobs")
    }

    fn layout(&self) -> PathBuf {
        self.path.join("image")
    }

    async fn remove(&self) -> std::io::Result<()> {
        match fs::remove_dir_all(&self.path).await {
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Err(err) if err.kind() != ErrorKind::NotFound => {
                log::warn!("could not remove {:?}: {}", self.path, err)
            }
            _ => (),
        }
    }
}

struct PullSession<'a> {
    puller: &'a Puller,
    platform: &'a Platform,
    observer: Arc<dyn PullObserver>,
    progress: ProgressTracker,
}

impl<'a> PullSession<'a> {
    fn say(&self, level: log::Level, message: &str) {
        log::log!(level, "{}", message);
        self.observer.log(level, message);
    }

    fn enter(&self, state: PullState, cancel: &CancellationToken) -> Result<(), PullError> {
        if cancel.is_cancelled() {
            return Err(PullError::Cancelled);
        }
        log::debug!("state: {}", state);
        self.observer.state_changed(state);
        Ok(())
    }

    async fn run(
        &self,
        reference: &ImageReference,
        work_dir: &WorkDir,
        cancel: &CancellationToken,
    ) -> Result<PulledImage, PullError> {
        let puller = self.puller;
        let client = RegistryClient::new(
            puller.http.clone(),
            reference.registry.clone(),
            puller.credentials_for(&reference.registry),
            puller.retry.clone(),
        );

        self.enter(PullState::Authenticating, cancel)?;
        client.login(&reference.pull_scope(), cancel).await?;

        self.enter(PullState::ResolvingManifest, cancel)?;
        let resolver = ManifestResolver::new(
            client.clone(),
            puller.verify_digests,
            puller.fallback_architecture.clone(),
        );
        let resolution = resolver.resolve(reference, self.platform, cancel).await?;
        let manifest = &resolution.manifest;
        self.say(
            log::Level::Info,
            &format!(
                "manifest {} has {} layers",
                resolution.digest,
                manifest.layers.len()
            ),
        );
        self.progress.overall(5);

        self.enter(PullState::FetchingConfig, cancel)?;
        let fetcher = BlobFetcher::new(
            client.clone(),
            reference.repository.clone(),
            puller.verify_digests,
        );
        self.warn_if_unverified(&fetcher, &manifest.config);
        let config = fetcher.fetch_config(&manifest.config, cancel).await?;
        if !resolution.was_index() {
            self.check_config_platform(&config);
        }
        self.progress.overall(10);

        self.enter(PullState::FetchingLayers, cancel)?;
        let layers = self
            .fetch_layers(&fetcher, &manifest.layers, &work_dir.blobs(), cancel)
            .await?;

        self.enter(PullState::BuildingChain, cancel)?;
        let digests: Vec<ContentDigest> = manifest
            .layers
            .iter()
            .map(|link| link.digest.clone())
            .collect();
        let chain = LayerChain::build(&digests, &config)?;
        let final_layer_id = chain.final_id().to_owned();
        self.progress.overall(92);

        self.enter(PullState::Assembling, cancel)?;
        fs::create_dir_all(&puller.output_dir).await?;
        let contents = ArchiveContents {
            chain,
            config_digest: manifest.config.digest.clone(),
            config,
            repository: reference.local_name(),
            tag: reference.tag.to_string(),
            layers,
        };
        let archive = ArchiveAssembler::new(work_dir.layout())
            .assemble(contents, puller.archive_path(reference, self.platform))
            .await?;

        Ok(PulledImage {
            archive,
            reference: reference.clone(),
            manifest_digest: resolution.digest,
            final_layer_id,
        })
    }

    fn warn_if_unverified(&self, fetcher: &BlobFetcher, link: &Link) {
        if !fetcher.verifies(link) {
            self.say(
                log::Level::Warn,
                &format!("integrity of {} will not be verified", link.digest),
            );
        }
    }

    fn check_config_platform(&self, config: &[u8]) {
        let found = serde_json::from_slice::<serde_json::Value>(config)
            .ok()
            .and_then(|config| {
                config
                    .get("architecture")
                    .and_then(|arch| arch.as_str())
                    .map(str::to_owned)
            });
        if let Some(found) = found {
            if found != self.platform.architecture {
                self.say(
                    log::Level::Warn,
                    &format!(
                        "image is built for {}, not the requested {}",
                        found, self.platform.architecture
                    ),
                );
            }
        }
    }

    /// Download and unpack every distinct layer, at most `concurrency` at once
    ///
    /// The first failure cancels the remaining downloads, and dropping the
    /// returned future aborts them. Returns the location of each unpacked
    /// layer tar by blob digest.
    async fn fetch_layers(
        &self,
        fetcher: &BlobFetcher,
        links: &[Link],
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<HashMap<ContentDigest, PathBuf>, PullError> {
        let mut seen = HashSet::new();
        let mut unique = vec![];
        for link in links {
            let compression = LayerCompression::from_link(link)?;
            if seen.insert(link.digest.clone()) {
                unique.push((link.clone(), compression));
            } else {
                log::debug!("layer {} appears more than once", link.digest);
            }
        }
        for (link, _) in &unique {
            self.warn_if_unverified(fetcher, link);
        }
        fs::create_dir_all(staging).await?;
        self.progress
            .begin_layers(unique.iter().map(|(link, _)| link.size).sum(), unique.len());

        let semaphore = Arc::new(Semaphore::new(self.puller.concurrency.max(1)));
        let layer_cancel = cancel.child_token();
        let _stop_on_drop = layer_cancel.clone().drop_guard();
        let mut tasks = JoinSet::new();
        for (link, compression) in unique {
            let fetcher = fetcher.clone();
            let semaphore = semaphore.clone();
            let cancel = layer_cancel.clone();
            let progress = self.progress.clone();
            let blob = staging.join(link.digest.hex_str());
            let dest = staging.join(format!("{}.tar", link.digest.hex_str()));
            tasks.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PullError::Cancelled),
                    permit = semaphore.acquire_owned() => permit.map_err(|_| PullError::Cancelled)?,
                };
                if cancel.is_cancelled() {
                    return Err(PullError::Cancelled);
                }
                let layer = progress.layer(&link.digest);
                fetcher
                    .fetch(&link, &blob, &|done, total| layer.update(done, total), &cancel)
                    .await?;
                unpack_layer(compression, &blob, &dest, &cancel).await?;
                layer.finish(link.size);
                Ok::<_, PullError>((link.digest, dest))
            });
        }

        let mut staged = HashMap::new();
        let mut failure: Option<PullError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(PullError::from).and_then(|result| result) {
                Ok((digest, path)) => {
                    staged.insert(digest, path);
                }
                Err(err) => {
                    if failure.is_none() {
                        if !err.is_cancelled() {
                            log::warn!("layer download failed, stopping the others: {}", err);
                        }
                        layer_cancel.cancel();
                        failure = Some(err);
                    }
                }
            }
        }
        match failure {
            Some(_) if cancel.is_cancelled() => Err(PullError::Cancelled),
            Some(err) => Err(err),
            None => Ok(staged),
        }
    }
}
