//! In-process registry server for integration tests

#![allow(dead_code)]

use async_compression::tokio::write::GzipEncoder;
use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::StreamExt;
use serde_json::json;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use tarpull::{
    manifest::media_types, ContentDigest, DefaultRegistry, PullObserver, PullState, Puller,
    PullerBuilder, Registry,
};
use tempfile::TempDir;
use tokio::{io::AsyncWriteExt, net::TcpListener, sync::Notify};

pub const SERVICE: &str = "mock-registry";
pub const USERNAME: &str = "user";
pub const PASSWORD: &str = "pass";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthMode {
    Anonymous,
    Basic,
    Bearer,
}

#[derive(Default)]
struct RegistryState {
    manifests: HashMap<(String, String), (String, Vec<u8>)>,
    blobs: HashMap<String, Vec<u8>>,
    valid_token: Option<String>,
    tokens_issued: u32,
    scopes: Vec<String>,
    unavailable: HashMap<String, u32>,
    revoke_token_on: HashSet<String>,
    always_unauthorized: HashSet<String>,
    delays: HashMap<String, Duration>,
    hanging: HashSet<String>,
    truncated: HashSet<String>,
    hits: HashMap<String, u32>,
}

#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<RegistryState>>,
    auth: AuthMode,
    addr: String,
    hang_started: Arc<Notify>,
}

/// A registry on a random loopback port
pub struct MockRegistry {
    shared: Shared,
}

/// Everything the mock knows about one single-platform image
#[derive(Clone, Debug)]
pub struct TestImage {
    pub manifest: Vec<u8>,
    pub manifest_digest: String,
    pub config: Vec<u8>,
    pub config_digest: String,
    pub layer_tars: Vec<Vec<u8>>,
    pub layer_digests: Vec<String>,
}

impl MockRegistry {
    pub async fn start(auth: AuthMode) -> Self {
        init_logging();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shared = Shared {
            state: Default::default(),
            auth,
            addr: listener.local_addr().unwrap().to_string(),
            hang_started: Arc::new(Notify::new()),
        };
        let app = Router::new()
            .route("/token", get(token))
            .fallback(distribution)
            .with_state(shared.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        MockRegistry { shared }
    }

    pub fn registry(&self) -> Registry {
        self.shared.addr.parse().unwrap()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.shared.state.lock().unwrap()
    }

    /// A puller that treats this server as Docker Hub
    pub fn puller(&self, dirs: &TestDirs) -> PullerBuilder {
        Puller::builder()
            .registry(&DefaultRegistry::docker_hub().mirror(self.registry()))
            .retry_backoff(Duration::from_millis(5))
            .work_dir(dirs.work.path())
            .output_dir(dirs.output.path())
    }

    pub fn add_blob(&self, data: Vec<u8>) -> String {
        let digest = digest_of(&data);
        self.state().blobs.insert(digest.clone(), data);
        digest
    }

    /// Serve different bytes than the ones a digest names
    pub fn replace_blob(&self, digest: &str, data: Vec<u8>) {
        self.state().blobs.insert(digest.to_owned(), data);
    }

    pub fn remove_blob(&self, digest: &str) {
        self.state().blobs.remove(digest);
    }

    pub fn add_manifest(&self, repo: &str, reference: &str, media_type: &str, body: Vec<u8>) {
        self.state().manifests.insert(
            (repo.to_owned(), reference.to_owned()),
            (media_type.to_owned(), body),
        );
    }

    /// Store an image whose layers have the given files, tagged if `tag` is
    /// given
    pub async fn add_image(
        &self,
        repo: &str,
        tag: Option<&str>,
        arch: &str,
        layers: &[&[(&str, &str)]],
    ) -> TestImage {
        let layer_tars: Vec<Vec<u8>> = layers.iter().map(|files| layer_tar(files)).collect();
        let mut layer_digests = vec![];
        let mut layer_links = vec![];
        for tar in &layer_tars {
            let blob = gzip(tar).await;
            let size = blob.len();
            let digest = self.add_blob(blob);
            layer_links.push(json!({
                "mediaType": media_types::DOCKER_LAYER_GZIP,
                "size": size,
                "digest": digest,
            }));
            layer_digests.push(digest);
        }
        let config = serde_json::to_vec(&json!({
            "architecture": arch,
            "os": "linux",
            "config": {"Cmd": ["/bin/sh"], "Env": ["PATH=/usr/bin:/bin"]},
            "history": [{"created_by": "test"}],
            "rootfs": {
                "type": "layers",
                "diff_ids": layer_tars.iter().map(|tar| digest_of(tar)).collect::<Vec<_>>(),
            },
        }))
        .unwrap();
        let config_digest = self.add_blob(config.clone());
        let manifest = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": media_types::MANIFEST,
            "config": {
                "mediaType": media_types::DOCKER_CONFIG,
                "size": config.len(),
                "digest": config_digest,
            },
            "layers": layer_links,
        }))
        .unwrap();
        let manifest_digest = digest_of(&manifest);
        self.add_manifest(repo, &manifest_digest, media_types::MANIFEST, manifest.clone());
        if let Some(tag) = tag {
            self.add_manifest(repo, tag, media_types::MANIFEST, manifest.clone());
        }
        TestImage {
            manifest,
            manifest_digest,
            config,
            config_digest,
            layer_tars,
            layer_digests,
        }
    }

    /// Tag a multi-platform index over single-platform images
    pub fn add_index(&self, repo: &str, tag: &str, entries: &[(&str, &TestImage)]) -> String {
        let manifests: Vec<_> = entries
            .iter()
            .map(|(arch, image)| {
                json!({
                    "mediaType": media_types::MANIFEST,
                    "size": image.manifest.len(),
                    "digest": image.manifest_digest,
                    "platform": {"os": "linux", "architecture": arch},
                })
            })
            .collect();
        let index = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": media_types::OCI_INDEX,
            "manifests": manifests,
        }))
        .unwrap();
        self.add_manifest(repo, tag, media_types::OCI_INDEX, index.clone());
        digest_of(&index)
    }

    /// Answer the next `times` requests for `path` with 503
    pub fn fail_with_503(&self, path: &str, times: u32) {
        self.state().unavailable.insert(path.to_owned(), times);
    }

    /// The first request for `path` invalidates the current token
    pub fn revoke_token_on(&self, path: &str) {
        self.state().revoke_token_on.insert(path.to_owned());
    }

    /// Requests for `path` are refused with 401 whatever token they carry
    pub fn always_unauthorized(&self, path: &str) {
        self.state().always_unauthorized.insert(path.to_owned());
    }

    pub fn delay_blob(&self, digest: &str, delay: Duration) {
        self.state().delays.insert(digest.to_owned(), delay);
    }

    /// Send the first bytes of this blob and then stall forever
    pub fn hang_blob(&self, digest: &str) {
        self.state().hanging.insert(digest.to_owned());
    }

    /// Break off the next download of this blob halfway through
    pub fn truncate_blob_once(&self, digest: &str) {
        self.state().truncated.insert(digest.to_owned());
    }

    /// Resolves once a stalled blob download has begun
    pub async fn hang_started(&self) {
        self.shared.hang_started.notified().await
    }

    pub fn tokens_issued(&self) -> u32 {
        self.state().tokens_issued
    }

    pub fn scopes(&self) -> Vec<String> {
        self.state().scopes.clone()
    }

    pub fn hits(&self, path: &str) -> u32 {
        self.state().hits.get(path).copied().unwrap_or(0)
    }

    pub fn blob_path(repo: &str, digest: &str) -> String {
        format!("/v2/{}/blobs/{}", repo, digest)
    }

    pub fn manifest_path(repo: &str, reference: &str) -> String {
        format!("/v2/{}/manifests/{}", repo, reference)
    }
}

fn challenge(shared: &Shared) -> String {
    match shared.auth {
        AuthMode::Basic => "Basic realm=\"mock\"".to_owned(),
        _ => format!(
            "Bearer realm=\"http://{}/token\",service=\"{}\"",
            shared.addr, SERVICE
        ),
    }
}

fn unauthorized(shared: &Shared) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge(shared))],
        Json(json!({"errors": [{"code": "UNAUTHORIZED"}]})),
    )
        .into_response()
}

fn not_found(code: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"errors": [{"code": code}]})),
    )
        .into_response()
}

fn basic_header() -> String {
    // base64("user:pass")
    "Basic dXNlcjpwYXNz".to_owned()
}

async fn token(
    State(shared): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut state = shared.state.lock().unwrap();
    if params.get("service").map(String::as_str) != Some(SERVICE) {
        return StatusCode::BAD_REQUEST.into_response();
    }
    state.tokens_issued += 1;
    state.scopes.extend(params.get("scope").cloned());
    let token = format!("token-{}", state.tokens_issued);
    state.valid_token = Some(token.clone());
    Json(json!({"token": token, "access_token": token, "expires_in": 300})).into_response()
}

async fn distribution(State(shared): State<Shared>, uri: Uri, headers: HeaderMap) -> Response {
    let path = uri.path().to_owned();
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let (delay, hanging, truncated, response) = {
        let mut state = shared.state.lock().unwrap();
        *state.hits.entry(path.clone()).or_default() += 1;

        if let Some(remaining) = state.unavailable.get_mut(&path) {
            if *remaining > 0 {
                *remaining -= 1;
                return (StatusCode::SERVICE_UNAVAILABLE, [(header::RETRY_AFTER, "0")])
                    .into_response();
            }
        }

        let authorized = match shared.auth {
            AuthMode::Anonymous => true,
            AuthMode::Basic => authorization == Some(basic_header()),
            AuthMode::Bearer => match (&authorization, &state.valid_token) {
                (Some(given), Some(valid)) => *given == format!("Bearer {}", valid),
                _ => false,
            },
        };
        if !authorized || state.always_unauthorized.contains(&path) {
            return unauthorized(&shared);
        }
        if state.revoke_token_on.remove(&path) {
            state.valid_token = None;
            return unauthorized(&shared);
        }

        if path == "/v2/" {
            return Json(json!({})).into_response();
        }
        let rest = match path.strip_prefix("/v2/") {
            Some(rest) => rest,
            None => return not_found("NAME_UNKNOWN"),
        };
        if let Some((repo, reference)) = rest.rsplit_once("/manifests/") {
            return match state
                .manifests
                .get(&(repo.to_owned(), reference.to_owned()))
            {
                Some((media_type, body)) => (
                    [(header::CONTENT_TYPE, media_type.clone())],
                    body.clone(),
                )
                    .into_response(),
                None => not_found("MANIFEST_UNKNOWN"),
            };
        }
        let digest = match rest.rsplit_once("/blobs/") {
            Some((_, digest)) => digest.to_owned(),
            None => return not_found("NAME_UNKNOWN"),
        };
        let blob = match state.blobs.get(&digest) {
            Some(blob) => blob.clone(),
            None => return not_found("BLOB_UNKNOWN"),
        };
        (
            state.delays.get(&digest).copied(),
            state.hanging.contains(&digest),
            state.truncated.remove(&digest),
            blob,
        )
    };

    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if hanging {
        shared.hang_started.notify_one();
        let first = Bytes::from(response[..response.len() / 2].to_vec());
        let stream = futures_util::stream::once(async move { Ok::<_, std::io::Error>(first) })
            .chain(futures_util::stream::pending());
        return (
            [(header::CONTENT_LENGTH, response.len().to_string())],
            Body::from_stream(stream),
        )
            .into_response();
    }
    if truncated {
        let first = Bytes::from(response[..response.len() / 2].to_vec());
        let stream = futures_util::stream::iter(vec![
            Ok(first),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "dropped",
            )),
        ]);
        return (
            [(header::CONTENT_LENGTH, response.len().to_string())],
            Body::from_stream(stream),
        )
            .into_response();
    }
    response.into_response()
}

pub fn digest_of(data: &[u8]) -> String {
    ContentDigest::from_content(data).to_string()
}

/// A layer tarball holding the given text files
pub fn layer_tar(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_path(name).unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, content.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap()
}

pub async fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(data).await.unwrap();
    encoder.shutdown().await.unwrap();
    encoder.into_inner()
}

/// Scratch directories for one pull
pub struct TestDirs {
    pub work: TempDir,
    pub output: TempDir,
}

impl TestDirs {
    pub fn new() -> Self {
        TestDirs {
            work: tempfile::tempdir().unwrap(),
            output: tempfile::tempdir().unwrap(),
        }
    }

    /// Anything a pull left behind in the work directory root
    pub fn work_leftovers(&self) -> Vec<PathBuf> {
        list(self.work.path())
    }

    pub fn outputs(&self) -> Vec<PathBuf> {
        list(self.output.path())
    }
}

fn list(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

/// Entry names in order, and their contents
pub fn read_archive(path: &Path) -> (Vec<String>, BTreeMap<String, Vec<u8>>) {
    let mut archive = tar::Archive::new(File::open(path).unwrap());
    let mut names = vec![];
    let mut contents = BTreeMap::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().to_string_lossy().into_owned();
        let name = name.trim_end_matches('/').to_owned();
        let mut data = vec![];
        entry.read_to_end(&mut data).unwrap();
        names.push(name.clone());
        contents.insert(name, data);
    }
    (names, contents)
}

/// Observer that remembers what it was told
#[derive(Default)]
pub struct Recorder {
    pub states: Mutex<Vec<PullState>>,
    pub overall: Mutex<Vec<u8>>,
    pub layers: Mutex<Vec<(ContentDigest, u8)>>,
    pub messages: Mutex<Vec<(log::Level, String)>>,
}

impl PullObserver for Recorder {
    fn log(&self, level: log::Level, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((level, message.to_owned()));
    }

    fn layer_progress(&self, digest: &ContentDigest, percent: u8) {
        self.layers.lock().unwrap().push((digest.clone(), percent));
    }

    fn overall_progress(&self, percent: u8) {
        self.overall.lock().unwrap().push(percent);
    }

    fn state_changed(&self, state: PullState) {
        self.states.lock().unwrap().push(state);
    }
}

impl Recorder {
    pub fn states(&self) -> Vec<PullState> {
        self.states.lock().unwrap().clone()
    }

    pub fn overall(&self) -> Vec<u8> {
        self.overall.lock().unwrap().clone()
    }
}
