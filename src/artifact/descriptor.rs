use crate::error::{Result, SyncError};
use crate::registry::Credential;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Interval used when the configuration does not set one
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(180);

/// Shortest interval between two pulls of the same artifact
pub const MINIMUM_INTERVAL: Duration = Duration::from_secs(180);

/// What to pull, where to put it and how often
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    url: String,
    path: PathBuf,
    interval: Duration,
    credential: Option<Credential>,
    insecure: bool,
}

impl ArtifactDescriptor {
    pub fn new(url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            interval: DEFAULT_INTERVAL,
            credential: None,
            insecure: false,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Allow plain HTTP to the registry
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn insecure(&self) -> bool {
        self.insecure
    }

    /// Check the descriptor before any network activity
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(SyncError::Configuration("no URL set".to_string()));
        }

        if self.path.as_os_str().is_empty() {
            return Err(SyncError::Configuration(format!(
                "no path set for {}",
                self.url
            )));
        }

        if self.interval.is_zero() {
            return Err(SyncError::Configuration(format!(
                "interval for {} must be positive",
                self.url
            )));
        }

        if let Some(cred) = &self.credential {
            if cred.is_partial() {
                return Err(SyncError::Credential(format!(
                    "username and password are required for {}",
                    self.url
                )));
            }
        }

        Ok(())
    }

    /// Raise the interval to `floor` if it is shorter. Returns true if it was raised.
    pub fn enforce_minimum_interval(&mut self, floor: Duration) -> bool {
        if self.interval >= floor {
            return false;
        }

        tracing::warn!(
            "Interval {:?} for {} is below the minimum, using {:?}",
            self.interval,
            self.url,
            floor
        );
        self.interval = floor;
        true
    }
}
