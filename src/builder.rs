//! Configuring a [Puller]

use crate::{
    errors::PullError,
    image::Registry,
    pull::Puller,
    registry::{Credentials, DefaultRegistry, RetryPolicy},
};
use reqwest::{header::HeaderValue, Certificate, Client, ClientBuilder, Proxy};
use std::{
    collections::{HashMap, HashSet},
    convert::TryInto,
    path::{Path, PathBuf},
    time::Duration,
};

/// Builder for configuring custom [Puller] instances
pub struct PullerBuilder {
    network: ClientBuilder,
    proxy: Option<String>,
    default_registry: Option<DefaultRegistry>,
    logins: HashMap<Registry, Credentials>,
    plain_http: HashSet<Registry>,
    retry: RetryPolicy,
    concurrency: usize,
    verify_digests: bool,
    fallback_architecture: Option<String>,
    work_root: Option<PathBuf>,
    output_dir: Option<PathBuf>,
}

impl Default for PullerBuilder {
    fn default() -> Self {
        PullerBuilder::new()
    }
}

impl PullerBuilder {
    /// Start constructing a custom puller
    pub fn new() -> Self {
        PullerBuilder {
            network: Client::builder().user_agent(Puller::default_user_agent()),
            proxy: None,
            default_registry: None,
            logins: HashMap::new(),
            plain_http: HashSet::new(),
            retry: RetryPolicy::default(),
            concurrency: 4,
            verify_digests: true,
            fallback_architecture: None,
            work_root: None,
            output_dir: None,
        }
    }

    /// Change the default registry server
    ///
    /// This registry is used for images that do not name a server. Docker
    /// Hub is used if unset. A plain [Registry] can be converted directly
    /// into a [DefaultRegistry] by calling its `into()`.
    pub fn registry(mut self, default_registry: &DefaultRegistry) -> Self {
        self.default_registry = Some(default_registry.clone());
        self
    }

    /// Store a username and password for use with a particular registry
    pub fn login(mut self, registry: Registry, username: String, password: Option<String>) -> Self {
        self.logins
            .insert(registry, Credentials::new(username, password));
        self
    }

    /// Contact this registry over unencrypted http
    ///
    /// Loopback registries like `localhost:5000` already use http.
    pub fn plain_http_registry(mut self, registry: Registry) -> Self {
        self.plain_http.insert(registry);
        self
    }

    /// Set a timeout for each network request
    ///
    /// This timeout applies from the beginning of a request until the
    /// last byte has been received, so keep it generous when layers are large.
    /// By default there is no timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.network = self.network.timeout(timeout);
        self
    }

    /// Set a timeout for only the initial connect phase of each network request
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.network = self.network.connect_timeout(timeout);
        self
    }

    /// Sets the `User-Agent` header
    ///
    /// By default, the value returned by [Puller::default_user_agent()] is
    /// used.
    pub fn user_agent<V>(mut self, value: V) -> Self
    where
        V: TryInto<HeaderValue>,
        V::Error: Into<http::Error>,
    {
        self.network = self.network.user_agent(value);
        self
    }

    /// Send all requests through this proxy
    ///
    /// The URL is checked when [PullerBuilder::build] runs.
    pub fn proxy(mut self, url: &str) -> Self {
        self.proxy = Some(url.to_owned());
        self
    }

    /// Trust an additional root certificate
    pub fn add_root_certificate(mut self, certificate: Certificate) -> Self {
        self.network = self.network.add_root_certificate(certificate);
        self
    }

    /// Accept any TLS certificate, including self-signed and expired ones
    ///
    /// This removes any protection https offers against a network attacker.
    /// Prefer [PullerBuilder::add_root_certificate] where possible.
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        log::warn!("TLS certificate validation is disabled");
        self.network = self.network.danger_accept_invalid_certs(true);
        self
    }

    /// Total tries per request, counting the first; at least one
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.retry.max_attempts = attempts.max(1);
        self
    }

    /// Delay before the first retry; later retries double it
    pub fn retry_backoff(mut self, base_delay: Duration) -> Self {
        self.retry.base_delay = base_delay;
        self
    }

    /// How many layers to download at once, 4 by default
    pub fn concurrency(mut self, layers: usize) -> Self {
        self.concurrency = layers.max(1);
        self
    }

    /// Check downloaded content against its digest, on by default
    pub fn verify_digests(mut self, verify: bool) -> Self {
        self.verify_digests = verify;
        self
    }

    /// Architecture to pull when an index has nothing for the one asked for
    pub fn fallback_architecture(mut self, architecture: &str) -> Self {
        self.fallback_architecture = Some(architecture.to_owned());
        self
    }

    /// Where each pull creates its working directory
    ///
    /// The default comes from [Puller::default_work_root()].
    pub fn work_dir(mut self, dir: &Path) -> Self {
        self.work_root = Some(dir.to_path_buf());
        self
    }

    /// Where finished archives are written, the current directory by default
    pub fn output_dir(mut self, dir: &Path) -> Self {
        self.output_dir = Some(dir.to_path_buf());
        self
    }

    /// Construct a Puller using the parameters from this Builder
    pub fn build(self) -> Result<Puller, PullError> {
        let mut network = self.network;
        if let Some(url) = &self.proxy {
            let proxy = Proxy::all(url.as_str())?;
            log::debug!("using proxy {}", url);
            network = network.proxy(proxy);
        }
        let work_root = self.work_root.unwrap_or_else(Puller::default_work_root);
        log::debug!("using work directory root {:?}", work_root);
        Ok(Puller {
            http: network.build()?,
            default_registry: self.default_registry.unwrap_or_default(),
            logins: self.logins,
            plain_http: self.plain_http,
            retry: self.retry,
            concurrency: self.concurrency,
            verify_digests: self.verify_digests,
            fallback_architecture: self.fallback_architecture,
            work_root,
            output_dir: self.output_dir.unwrap_or_else(|| PathBuf::from(".")),
        })
    }
}
