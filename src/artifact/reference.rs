//! Artifact Reference Parsing
//!
//! Parses registry references like:
//! - ghcr.io/owner/repo:1.0.2
//! - localhost:5000/owner/repo
//! - registry.example.com:5000/app@sha256:abc...
//!
//! The registry host is always explicit; there is no implicit Docker Hub.

use crate::error::{Result, SyncError};

/// Tag used when a reference names neither a tag nor a digest
pub const DEFAULT_TAG: &str = "latest";

/// Resolved registry coordinates of an artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinates {
    /// Registry host with optional port (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,

    /// Repository path (e.g., "owner/repo")
    pub repository: String,

    /// Tag or digest; empty when the reference named neither
    pub reference: String,
}

/// Result of resolving a reference string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub coordinates: Coordinates,

    /// Non-fatal problems found while resolving
    pub warnings: Vec<String>,
}

impl Coordinates {
    /// Parse a reference string
    pub fn parse(s: &str) -> Result<Self> {
        Self::resolve(s).map(|r| r.coordinates)
    }

    /// Parse a reference string, collecting warnings instead of failing on
    /// recoverable input (a URL scheme prefix, surrounding whitespace)
    pub fn resolve(s: &str) -> Result<Resolution> {
        let mut warnings = Vec::new();

        let trimmed = s.trim();
        if trimmed.len() != s.len() {
            warnings.push(format!("ignoring surrounding whitespace in '{}'", s));
        }

        if trimmed.is_empty() {
            return Err(invalid(s, "empty reference"));
        }

        let mut rest = trimmed;
        for scheme in ["oci://", "https://", "http://"] {
            if let Some(stripped) = rest.strip_prefix(scheme) {
                warnings.push(format!(
                    "ignoring scheme '{}' in '{}'; use the insecure option for plain HTTP",
                    scheme, trimmed
                ));
                rest = stripped;
                break;
            }
        }

        let (registry, path) = rest
            .split_once('/')
            .ok_or_else(|| invalid(s, "missing registry or repository"))?;

        validate_registry(s, registry)?;

        // Split off digest if present; a tag before the digest is ignored
        let (name_part, digest) = match path.split_once('@') {
            Some((n, d)) => (n, Some(d)),
            None => (path, None),
        };

        // The tag separator is the last ':' after the last '/'
        let (repository, tag) = match name_part.rfind(':') {
            Some(idx) if !name_part[idx..].contains('/') => {
                (&name_part[..idx], Some(&name_part[idx + 1..]))
            }
            _ => (name_part, None),
        };

        validate_repository(s, repository)?;

        let reference = match (digest, tag) {
            (Some(d), tag) => {
                validate_digest(s, d)?;
                if let Some(t) = tag {
                    warnings.push(format!("tag '{}' ignored in favour of digest {}", t, d));
                }
                d.to_string()
            }
            (None, Some(t)) => {
                validate_tag(s, t)?;
                t.to_string()
            }
            (None, None) => String::new(),
        };

        Ok(Resolution {
            coordinates: Self {
                registry: registry.to_string(),
                repository: repository.to_string(),
                reference,
            },
            warnings,
        })
    }

    /// Whether a tag or digest was given
    pub fn has_reference(&self) -> bool {
        !self.reference.is_empty()
    }

    /// Whether the reference is a content digest
    pub fn is_digest(&self) -> bool {
        self.reference.contains(':')
    }

    /// Host to contact for API calls
    pub fn api_host(&self) -> &str {
        match self.registry.as_str() {
            "docker.io" | "index.docker.io" => "registry-1.docker.io",
            r => r,
        }
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.reference.is_empty() {
            write!(f, "{}/{}", self.registry, self.repository)
        } else if self.is_digest() {
            write!(f, "{}/{}@{}", self.registry, self.repository, self.reference)
        } else {
            write!(f, "{}/{}:{}", self.registry, self.repository, self.reference)
        }
    }
}

impl std::str::FromStr for Coordinates {
    type Err = SyncError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn invalid(input: &str, reason: &str) -> SyncError {
    SyncError::Configuration(format!("invalid reference '{}': {}", input, reason))
}

fn validate_registry(input: &str, registry: &str) -> Result<()> {
    if registry.is_empty() {
        return Err(invalid(input, "missing registry or repository"));
    }

    let (host, port) = match registry.rsplit_once(':') {
        Some((h, p)) => (h, Some(p)),
        None => (registry, None),
    };

    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '[' || c == ']');
    if !host_ok {
        return Err(invalid(input, "invalid registry host"));
    }

    if let Some(port) = port {
        if port.parse::<u16>().is_err() {
            return Err(invalid(input, "invalid registry port"));
        }
    }

    Ok(())
}

fn validate_repository(input: &str, repository: &str) -> Result<()> {
    if repository.is_empty() {
        return Err(invalid(input, "missing registry or repository"));
    }

    for component in repository.split('/') {
        let ok = !component.is_empty()
            && component
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c))
            && component
                .chars()
                .next()
                .map(|c| c.is_ascii_alphanumeric())
                .unwrap_or(false);
        if !ok {
            return Err(invalid(input, "invalid repository name"));
        }
    }

    Ok(())
}

fn validate_tag(input: &str, tag: &str) -> Result<()> {
    let ok = !tag.is_empty()
        && tag.len() <= 128
        && tag
            .chars()
            .next()
            .map(|c| c.is_ascii_alphanumeric() || c == '_')
            .unwrap_or(false)
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c));
    if !ok {
        return Err(invalid(input, "invalid tag"));
    }
    Ok(())
}

fn validate_digest(input: &str, digest: &str) -> Result<()> {
    let (algorithm, encoded) = digest
        .split_once(':')
        .ok_or_else(|| invalid(input, "invalid digest"))?;

    let algorithm_ok = !algorithm.is_empty()
        && algorithm
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c));
    let encoded_ok = encoded.len() >= 32 && encoded.chars().all(|c| c.is_ascii_hexdigit());

    if !algorithm_ok || !encoded_ok {
        return Err(invalid(input, "invalid digest"));
    }
    Ok(())
}
