use crate::errors::PullError;
use regex::Regex;
use reqwest::{RequestBuilder, Url};
use serde::Deserialize;
use std::fmt;

/// Username and optional password presented to a registry or its token server
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: String, password: Option<String>) -> Self {
        Credentials { username, password }
    }

    pub(crate) fn apply(&self, req: RequestBuilder) -> RequestBuilder {
        req.basic_auth(&self.username, self.password.as_ref())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials({}, ***)", self.username)
    }
}

/// What a registry's `/v2/` endpoint asked of us
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthRequirement {
    /// The registry answered without a challenge
    Unauthenticated,
    /// HTTP Basic credentials go directly on every request
    Basic,
    /// A token must be fetched from a separate endpoint
    Bearer(AuthChallenge),
}

impl AuthRequirement {
    /// Interpret a `WWW-Authenticate` header value
    pub fn from_header(value: &str) -> Result<Self, PullError> {
        let scheme = value.trim_start().split_whitespace().next().unwrap_or("");
        if scheme.eq_ignore_ascii_case("basic") {
            Ok(AuthRequirement::Basic)
        } else if scheme.eq_ignore_ascii_case("bearer") {
            Ok(AuthRequirement::Bearer(AuthChallenge::parse(value)?))
        } else {
            Err(PullError::UnsupportedAuthentication(value.to_owned()))
        }
    }
}

/// Token endpoint details from a bearer challenge
///
/// Reference: <https://distribution.github.io/distribution/spec/auth/token/>
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthChallenge {
    pub realm: Url,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl AuthChallenge {
    /// Parse `Bearer realm="...",service="...",scope="..."`
    ///
    /// Parameters may come in any order, unknown parameters such as `error`
    /// are skipped, and only `realm` is mandatory.
    pub fn parse(header: &str) -> Result<Self, PullError> {
        lazy_static! {
            static ref CHALLENGE: Regex = Regex::new(concat!(
                "^\\s*(?i:bearer)\\s+",
                "(?P<params>",
                /* */ "[a-zA-Z_]+=\"[\\x20-\\x21\\x23-\\x5B\\x5D-\\x7E]*\"", // chars from RFC 6750
                /* */ "(?:\\s*,\\s*[a-zA-Z_]+=\"[\\x20-\\x21\\x23-\\x5B\\x5D-\\x7E]*\")*",
                ")\\s*$",
            ))
            .unwrap();
            static ref PARAM: Regex =
                Regex::new("(?P<key>[a-zA-Z_]+)=\"(?P<value>[^\"]*)\"").unwrap();
        }
        let unsupported = || PullError::UnsupportedAuthentication(header.to_owned());
        let params = CHALLENGE
            .captures(header)
            .and_then(|captures| captures.name("params"))
            .ok_or_else(unsupported)?;

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for param in PARAM.captures_iter(params.as_str()) {
            let value = param["value"].to_owned();
            match param["key"].to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => (),
            }
        }
        let realm = realm
            .and_then(|realm| realm.parse::<Url>().ok())
            .filter(|url| url.scheme() == "https" || url.scheme() == "http")
            .ok_or_else(unsupported)?;
        Ok(AuthChallenge {
            realm,
            service,
            scope,
        })
    }
}

/// Bearer token handed out by a token endpoint
///
/// Expiry is not tracked; a `401` on a later request triggers a refresh.
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Token endpoints disagree on the field name; Docker Hub sends both
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_token(self) -> Result<AccessToken, PullError> {
        self.token
            .or(self.access_token)
            .filter(|token| !token.is_empty())
            .map(AccessToken)
            .ok_or_else(|| {
                PullError::AuthenticationFailed("token endpoint returned no token".to_owned())
            })
    }
}
