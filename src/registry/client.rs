//! HTTP access to one registry server, with authentication and retries

use crate::{
    errors::PullError,
    image::{ContentDigest, ImageVersion, Registry, Repository},
    manifest::media_types,
    registry::{
        auth::{AccessToken, AuthChallenge, AuthRequirement, Credentials, TokenResponse},
        retry::{self, RetryPolicy},
    },
};
use reqwest::{header, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct AuthState {
    requirement: AuthRequirement,
    scope: Option<String>,
    token: Option<AccessToken>,
}

enum Authorization {
    Anonymous,
    Basic(Credentials),
    Bearer(AccessToken),
}

/// Client for the read-only half of the distribution API on one registry
///
/// Clones share the authentication state, so a token obtained by one
/// concurrent download is used by all of them.
#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    registry: Registry,
    credentials: Option<Credentials>,
    retry: RetryPolicy,
    auth: Arc<Mutex<AuthState>>,
}

impl RegistryClient {
    pub fn new(
        http: reqwest::Client,
        registry: Registry,
        credentials: Option<Credentials>,
        retry: RetryPolicy,
    ) -> Self {
        RegistryClient {
            http,
            registry,
            credentials,
            retry,
            auth: Arc::new(Mutex::new(AuthState {
                requirement: AuthRequirement::Unauthenticated,
                scope: None,
                token: None,
            })),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn manifest_url(&self, repository: &Repository, version: &ImageVersion) -> String {
        format!(
            "{}{}/manifests/{}",
            self.registry.api_root(),
            repository,
            version
        )
    }

    pub fn blob_url(&self, repository: &Repository, digest: &ContentDigest) -> String {
        format!("{}{}/blobs/{}", self.registry.api_root(), repository, digest)
    }

    /// Ask `/v2/` whether, and how, we need to authenticate
    pub async fn probe(&self, cancel: &CancellationToken) -> Result<AuthRequirement, PullError> {
        let url = self.registry.api_root();
        log::debug!("probing {}", url);
        let unreachable = |reason: String| PullError::RegistryUnreachable {
            url: url.clone(),
            reason,
        };
        let response = match self.send_with_retry(&url, cancel, || self.http.get(&url)).await {
            Ok(response) => response,
            Err(PullError::Network(err)) => return Err(unreachable(err.to_string())),
            Err(err) => return Err(err),
        };
        let requirement = match response.status() {
            status if status.is_success() => AuthRequirement::Unauthenticated,
            StatusCode::UNAUTHORIZED => match response.headers().get(header::WWW_AUTHENTICATE) {
                Some(value) => AuthRequirement::from_header(value.to_str().unwrap_or(""))?,
                None => {
                    return Err(PullError::UnsupportedAuthentication(
                        "401 without a WWW-Authenticate challenge".to_owned(),
                    ))
                }
            },
            status => return Err(unreachable(format!("unexpected status {}", status))),
        };
        log::debug!("{} requires {:?}", self.registry, requirement);
        self.auth.lock().await.requirement = requirement.clone();
        Ok(requirement)
    }

    /// Exchange a bearer challenge for a token scoped to `scope`
    ///
    /// The configured credentials, if any, are presented to the token
    /// endpoint. The token is cached and attached to every later request.
    pub async fn authenticate(
        &self,
        challenge: &AuthChallenge,
        scope: &str,
        cancel: &CancellationToken,
    ) -> Result<AccessToken, PullError> {
        if challenge.realm.scheme() != "https" && self.registry.is_https() {
            return Err(PullError::UnsupportedAuthentication(format!(
                "refusing to send credentials to insecure token endpoint {}",
                challenge.realm
            )));
        }
        let realm = challenge.realm.as_str();
        let mut query = vec![("scope", scope)];
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }
        log::debug!("requesting token from {} for {}", realm, scope);
        let response = self
            .send_with_retry(realm, cancel, || {
                let req = self.http.get(challenge.realm.clone()).query(&query);
                match &self.credentials {
                    Some(credentials) => credentials.apply(req),
                    None => req,
                }
            })
            .await?;
        match response.status() {
            status if status.is_success() => (),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(PullError::AuthenticationFailed(format!(
                    "token endpoint {} refused access to {}",
                    realm, scope
                )))
            }
            status => {
                return Err(PullError::UnexpectedStatus {
                    url: realm.to_owned(),
                    status: status.as_u16(),
                })
            }
        }
        let token = response.json::<TokenResponse>().await?.into_token()?;
        log::debug!("received token for {}", self.registry);

        let mut state = self.auth.lock().await;
        state.requirement = AuthRequirement::Bearer(challenge.clone());
        state.scope = Some(scope.to_owned());
        state.token = Some(token.clone());
        Ok(token)
    }

    /// Probe, then fetch a token if the registry asks for one
    pub async fn login(&self, scope: &str, cancel: &CancellationToken) -> Result<(), PullError> {
        match self.probe(cancel).await? {
            AuthRequirement::Bearer(challenge) => {
                self.authenticate(&challenge, scope, cancel).await?;
            }
            AuthRequirement::Basic if self.credentials.is_none() => {
                return Err(PullError::AuthenticationFailed(format!(
                    "{} requires a username and password",
                    self.registry
                )))
            }
            _ => (),
        }
        Ok(())
    }

    /// Authenticated GET
    ///
    /// Transient failures are retried by the [RetryPolicy]. A `401` causes
    /// exactly one re-authentication followed by one more try; a second `401`
    /// is final. Any other unsuccessful status is returned as an error.
    pub async fn get(&self, url: &str, cancel: &CancellationToken) -> Result<Response, PullError> {
        let mut reauthenticated = false;
        loop {
            let authorization = self.authorization().await;
            let response = self
                .send_with_retry(url, cancel, || {
                    let req = self
                        .http
                        .get(url)
                        .header(header::ACCEPT, media_types::ACCEPT_MANIFESTS);
                    match &authorization {
                        Authorization::Anonymous => req,
                        Authorization::Basic(credentials) => credentials.apply(req),
                        Authorization::Bearer(token) => req.bearer_auth(token.as_str()),
                    }
                })
                .await?;
            match response.status() {
                status if status.is_success() => return Ok(response),
                StatusCode::UNAUTHORIZED if !reauthenticated => {
                    log::info!("{} answered 401, authenticating again", url);
                    reauthenticated = true;
                    self.reauthenticate(&response, cancel).await?;
                }
                status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                    return Err(PullError::AuthenticationFailed(format!(
                        "{} answered {}",
                        url, status
                    )))
                }
                StatusCode::NOT_FOUND => return Err(PullError::NotFound(url.to_owned())),
                status => {
                    return Err(PullError::UnexpectedStatus {
                        url: url.to_owned(),
                        status: status.as_u16(),
                    })
                }
            }
        }
    }

    async fn authorization(&self) -> Authorization {
        let state = self.auth.lock().await;
        match (&state.requirement, &state.token, &self.credentials) {
            (AuthRequirement::Bearer(_), Some(token), _) => Authorization::Bearer(token.clone()),
            (AuthRequirement::Basic, _, Some(credentials)) => {
                Authorization::Basic(credentials.clone())
            }
            _ => Authorization::Anonymous,
        }
    }

    async fn reauthenticate(
        &self,
        response: &Response,
        cancel: &CancellationToken,
    ) -> Result<(), PullError> {
        let (known, scope) = {
            let state = self.auth.lock().await;
            (state.requirement.clone(), state.scope.clone())
        };
        let requirement = match response.headers().get(header::WWW_AUTHENTICATE) {
            Some(value) => AuthRequirement::from_header(value.to_str().unwrap_or(""))?,
            None => known,
        };
        match requirement {
            AuthRequirement::Bearer(challenge) => {
                let scope = scope
                    .or_else(|| challenge.scope.clone())
                    .ok_or_else(|| {
                        PullError::AuthenticationFailed(
                            "bearer challenge without a scope to request".to_owned(),
                        )
                    })?;
                self.authenticate(&challenge, &scope, cancel).await?;
                Ok(())
            }
            AuthRequirement::Basic if self.credentials.is_some() => {
                self.auth.lock().await.requirement = AuthRequirement::Basic;
                Ok(())
            }
            AuthRequirement::Basic | AuthRequirement::Unauthenticated => {
                Err(PullError::AuthenticationFailed(format!(
                    "{} requires credentials",
                    self.registry
                )))
            }
        }
    }

    /// Send one request, repeating it on transient failures
    ///
    /// The returned response may still carry an error status; only the
    /// retryable ones are absorbed here, and only while attempts remain.
    async fn send_with_retry<F>(
        &self,
        url: &str,
        cancel: &CancellationToken,
        build: F,
    ) -> Result<Response, PullError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(PullError::Cancelled);
            }
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PullError::Cancelled),
                result = build().send() => result,
            };
            let delay = match result {
                Ok(response)
                    if RetryPolicy::is_retryable_status(response.status())
                        && self.retry.allows_another(attempt) =>
                {
                    let delay = self.retry.backoff_for_response(attempt, response.headers());
                    log::warn!(
                        "{} answered {} (attempt {}/{}), retrying in {:?}",
                        url,
                        response.status(),
                        attempt,
                        self.retry.max_attempts,
                        delay
                    );
                    delay
                }
                Ok(response) => return Ok(response),
                Err(err) => {
                    let err = PullError::from(err);
                    if !(err.is_transient() && self.retry.allows_another(attempt)) {
                        return Err(err);
                    }
                    let delay = self.retry.backoff(attempt);
                    log::warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        url,
                        attempt,
                        self.retry.max_attempts,
                        err,
                        delay
                    );
                    delay
                }
            };
            retry::pause(delay, cancel).await?;
            attempt += 1;
        }
    }
}
