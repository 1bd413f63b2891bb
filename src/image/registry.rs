use crate::errors::PullError;
use regex::Regex;
use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

/// Name of an image registry server
///
/// This is a domain name with an optional port. Registries are contacted over
/// https, except for loopback addresses (`localhost`, `127.x.x.x`) which
/// follow Docker's insecure-registry default and use plain http. Any other
/// server can be switched to http explicitly with [Registry::plain_http].
#[derive(Clone)]
pub struct Registry {
    serialized: String,
    domain_len: usize,
    port: Option<u16>,
    plain_http: bool,
}

impl Registry {
    /// Parse a `host[:port]` string
    pub fn parse(s: &str) -> Result<Self, PullError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(&format!("^{}$", Registry::regex_str())).unwrap();
        }
        let captures = RE
            .captures(s)
            .ok_or_else(|| PullError::InvalidReferenceFormat(s.to_owned()))?;
        let domain = captures
            .name("reg_d")
            .ok_or_else(|| PullError::InvalidReferenceFormat(s.to_owned()))?;
        let port = match captures.name("reg_p") {
            None => None,
            Some(m) => Some(
                m.as_str()
                    .parse()
                    .map_err(|_| PullError::InvalidReferenceFormat(s.to_owned()))?,
            ),
        };
        Ok(Registry {
            serialized: s.to_owned(),
            domain_len: domain.end(),
            port,
            plain_http: is_loopback(domain.as_str()),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// The host name without any port
    pub fn domain_str(&self) -> &str {
        &self.serialized[..self.domain_len]
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Use unencrypted http for this registry
    pub fn plain_http(mut self) -> Self {
        self.plain_http = true;
        self
    }

    pub fn is_https(&self) -> bool {
        !self.plain_http
    }

    /// The protocol to use, either "http" or "https"
    pub fn protocol_str(&self) -> &str {
        if self.is_https() {
            "https"
        } else {
            "http"
        }
    }

    /// Root of the distribution API, like `https://example.com/v2/`
    pub fn api_root(&self) -> String {
        format!("{}://{}/v2/", self.protocol_str(), self.serialized)
    }

    pub(crate) fn regex_str() -> &'static str {
        concat!(
            "(?P<reg>",
            /*  */ "(?P<reg_d>",
            /* -- */ "(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])",
            /* -- */ "(?:\\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*",
            /*  */ ")",
            /*  */ "(?::(?P<reg_p>[0-9]+))?",
            ")",
        )
    }
}

fn is_loopback(domain: &str) -> bool {
    domain == "localhost" || (domain.starts_with("127.") && domain.split('.').count() == 4)
}

// The transport choice is a connection setting, not part of the name
impl PartialEq for Registry {
    fn eq(&self, other: &Self) -> bool {
        self.serialized == other.serialized
    }
}

impl Eq for Registry {}

impl Hash for Registry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serialized.hash(state);
    }
}

impl FromStr for Registry {
    type Err = PullError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Registry::parse(s)
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
