use crate::errors::PullError;
use std::{fmt, str::FromStr};

/// The operating system and CPU architecture an image is built for
///
/// Parsed from `arch`, `os/arch` or `os/arch/variant`. The operating system
/// defaults to `linux`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
}

impl Platform {
    /// A linux platform with the given architecture
    pub fn linux(architecture: &str) -> Self {
        Platform {
            os: "linux".to_owned(),
            architecture: architecture.to_owned(),
            variant: None,
        }
    }

    pub fn parse(s: &str) -> Result<Self, PullError> {
        let valid = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        };
        let parts: Vec<&str> = s.split('/').collect();
        if !parts.iter().all(|part| valid(part)) {
            return Err(PullError::InvalidPlatform(s.to_owned()));
        }
        match parts.as_slice() {
            [arch] => Ok(Platform::linux(arch)),
            [os, arch] => Ok(Platform {
                os: os.to_string(),
                architecture: arch.to_string(),
                variant: None,
            }),
            [os, arch, variant] => Ok(Platform {
                os: os.to_string(),
                architecture: arch.to_string(),
                variant: Some(variant.to_string()),
            }),
            _ => Err(PullError::InvalidPlatform(s.to_owned())),
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Platform::linux("amd64")
    }
}

impl FromStr for Platform {
    type Err = PullError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::parse(s)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}
