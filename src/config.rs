//! Sync configuration file
//!
//! ```toml
//! root = "/srv/zones"
//!
//! [tunables]
//! deadline_secs = 60
//! retry_interval_secs = 10
//! max_attempts = 3
//! minimum_interval_secs = 180
//!
//! [[artifact]]
//! url = "ghcr.io/owner/zones:1.2.0"
//! path = "zones"
//! interval_secs = 300
//! username = "user"
//! password = "token"
//! insecure = false
//! ```

use crate::artifact::ArtifactDescriptor;
use crate::error::{Result, SyncError};
use crate::registry::Credential;
use crate::sync::SyncTunables;
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Base directory for relative artifact paths
    #[serde(default)]
    pub root: Option<PathBuf>,

    #[serde(default)]
    pub tunables: TunablesConfig,

    #[serde(default, rename = "artifact")]
    pub artifacts: Vec<ArtifactConfig>,
}

/// Overrides for [`SyncTunables`]; unset keys keep the defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunablesConfig {
    pub deadline_secs: Option<u64>,
    pub retry_interval_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub minimum_interval_secs: Option<u64>,
}

/// One `[[artifact]]` table
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactConfig {
    #[serde(default)]
    pub url: String,

    /// Destination directory; defaults to the root
    pub path: Option<PathBuf>,

    /// Seconds between pulls; non-positive values keep the default
    pub interval_secs: Option<i64>,

    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default)]
    pub insecure: bool,
}

impl SyncConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_toml_str(&content).map_err(|e| match e {
            SyncError::Configuration(msg) => {
                SyncError::Configuration(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| SyncError::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Timing knobs with overrides applied
    pub fn tunables(&self) -> Result<SyncTunables> {
        let mut tunables = SyncTunables::default();
        let t = &self.tunables;

        if let Some(secs) = t.deadline_secs {
            tunables.deadline = positive_secs("deadline_secs", secs)?;
        }
        if let Some(secs) = t.retry_interval_secs {
            tunables.retry_interval = positive_secs("retry_interval_secs", secs)?;
        }
        if let Some(attempts) = t.max_attempts {
            if attempts == 0 {
                return Err(SyncError::Configuration(
                    "max_attempts must be at least 1".to_string(),
                ));
            }
            tunables.max_attempts = attempts;
        }
        if let Some(secs) = t.minimum_interval_secs {
            tunables.minimum_interval = positive_secs("minimum_interval_secs", secs)?;
        }

        Ok(tunables)
    }

    /// One validated descriptor (or the reason it was rejected) per artifact
    pub fn descriptors(&self, tunables: &SyncTunables) -> Vec<Result<ArtifactDescriptor>> {
        self.artifacts
            .iter()
            .map(|entry| self.descriptor(entry, tunables.minimum_interval))
            .collect()
    }

    fn descriptor(&self, entry: &ArtifactConfig, minimum: Duration) -> Result<ArtifactDescriptor> {
        let path = match &entry.path {
            Some(p) => self.resolve_path(p),
            None => self.root.clone().unwrap_or_default(),
        };

        let mut descriptor =
            ArtifactDescriptor::new(entry.url.trim(), path).with_insecure(entry.insecure);

        if let Some(secs) = entry.interval_secs.filter(|s| *s > 0) {
            descriptor = descriptor.with_interval(Duration::from_secs(secs as u64));
        }

        if entry.username.is_some() || entry.password.is_some() {
            descriptor = descriptor.with_credential(Credential::new(
                entry.username.clone().unwrap_or_default(),
                entry.password.clone().unwrap_or_default(),
            ));
        }

        descriptor.enforce_minimum_interval(minimum);

        if let Err(e) = descriptor.validate() {
            tracing::debug!("Rejected artifact {:?}: {}", entry.url, e);
            return Err(e);
        }

        Ok(descriptor)
    }

    /// Absolute paths are cleaned, relative ones joined onto the root
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.as_os_str().is_empty() {
            return PathBuf::new();
        }
        if path.is_absolute() {
            return clean_path(path);
        }
        match &self.root {
            Some(root) => clean_path(&root.join(path)),
            None => clean_path(path),
        }
    }
}

fn positive_secs(key: &str, secs: u64) -> Result<Duration> {
    if secs == 0 {
        return Err(SyncError::Configuration(format!("{} must be positive", key)));
    }
    Ok(Duration::from_secs(secs))
}

/// Lexically normalize `path`, dropping `.` and resolving `..`
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last_is_normal =
                    matches!(cleaned.components().next_back(), Some(Component::Normal(_)));
                if last_is_normal {
                    cleaned.pop();
                } else if !cleaned.has_root() {
                    cleaned.push("..");
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }

    if cleaned.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        cleaned
    }
}
