//! Artifact lifecycle
//!
//! An [`Artifact`] couples a validated [`ArtifactDescriptor`] with the runtime
//! state needed to pull it: resolved coordinates, a registry client handle,
//! login state and the time of the last successful pull.
//!
//! Lifecycle: `Unconfigured -> Resolved -> (Authenticated) -> Ready`. Only a
//! `Ready` artifact can be pulled.

mod descriptor;
mod reference;

pub use descriptor::{ArtifactDescriptor, DEFAULT_INTERVAL, MINIMUM_INTERVAL};
pub use reference::{Coordinates, Resolution, DEFAULT_TAG};

use crate::error::{Result, SyncError};
use crate::registry::{Descriptor, OciRegistryClient, RegistryClient};
use crate::store::{ContentStore, FileStore};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;

/// Where an artifact is in its setup sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    Unconfigured,
    Resolved,
    Authenticated,
    Ready,
}

impl std::fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArtifactState::Unconfigured => "unconfigured",
            ArtifactState::Resolved => "resolved",
            ArtifactState::Authenticated => "authenticated",
            ArtifactState::Ready => "ready",
        };
        write!(f, "{}", s)
    }
}

/// A configured artifact and its pull state
pub struct Artifact {
    descriptor: ArtifactDescriptor,
    coordinates: Option<Coordinates>,
    client: Option<Box<dyn RegistryClient>>,
    state: ArtifactState,

    /// True iff a credential was supplied
    login_required: bool,

    last_pull_at: Option<DateTime<Utc>>,
    pulled: bool,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("descriptor", &self.descriptor)
            .field("coordinates", &self.coordinates)
            .field("state", &self.state)
            .field("login_required", &self.login_required)
            .field("last_pull_at", &self.last_pull_at)
            .field("pulled", &self.pulled)
            .finish_non_exhaustive()
    }
}

impl Artifact {
    pub fn new(descriptor: ArtifactDescriptor) -> Self {
        let login_required = descriptor.credential().is_some();
        Self {
            descriptor,
            coordinates: None,
            client: None,
            state: ArtifactState::Unconfigured,
            login_required,
            last_pull_at: None,
            pulled: false,
        }
    }

    /// Validate, resolve and authenticate `descriptor` against its registry
    pub fn prepare(descriptor: ArtifactDescriptor) -> Result<Self> {
        Self::prepare_with(descriptor, |coordinates| {
            Ok(Box::new(OciRegistryClient::new(coordinates)?) as Box<dyn RegistryClient>)
        })
    }

    /// Like [`Artifact::prepare`], building the registry client with `connect`
    pub fn prepare_with<F>(descriptor: ArtifactDescriptor, connect: F) -> Result<Self>
    where
        F: FnOnce(&Coordinates) -> Result<Box<dyn RegistryClient>>,
    {
        descriptor.validate()?;

        let mut artifact = Self::new(descriptor);
        artifact.setup_with(connect)?;

        if artifact.login_required {
            artifact.login()?;
        }

        // Applied after the client is built so construction cannot reset it
        if artifact.descriptor.insecure() {
            tracing::warn!(
                "Using plain HTTP for {}; traffic is not encrypted",
                artifact.display_name()
            );
            if let Some(client) = artifact.client.as_mut() {
                client.set_plain_http(true);
            }
        }

        artifact.state = ArtifactState::Ready;
        tracing::debug!("Artifact {} is ready", artifact.display_name());
        Ok(artifact)
    }

    /// Resolve the URL into coordinates and build the registry client
    pub fn setup_with<F>(&mut self, connect: F) -> Result<()>
    where
        F: FnOnce(&Coordinates) -> Result<Box<dyn RegistryClient>>,
    {
        let mut resolution = Coordinates::resolve(self.descriptor.url())?;

        if !resolution.coordinates.has_reference() {
            let url = format!("{}:{}", resolution.coordinates, DEFAULT_TAG);
            tracing::debug!(
                "No tag or digest in {}, resolving {}",
                self.descriptor.url(),
                url
            );
            let earlier = std::mem::take(&mut resolution.warnings);
            resolution = Coordinates::resolve(&url)?;
            resolution.warnings.splice(0..0, earlier);
        }

        for warning in &resolution.warnings {
            tracing::warn!("{}: {}", self.descriptor.url(), warning);
        }

        let client = connect(&resolution.coordinates)?;

        self.coordinates = Some(resolution.coordinates);
        self.client = Some(client);
        self.state = ArtifactState::Resolved;
        Ok(())
    }

    /// Install the static credential on the registry client. Never contacts the server.
    pub fn login(&mut self) -> Result<()> {
        if !self.login_required {
            return Ok(());
        }

        let credential = self
            .descriptor
            .credential()
            .cloned()
            .unwrap_or_default();
        if credential.is_empty() {
            return Err(SyncError::Credential(format!(
                "username and password are required for {}",
                self.descriptor.url()
            )));
        }

        let name = self.display_name();
        let client = self.client.as_mut().ok_or_else(|| {
            SyncError::Configuration(format!("{} has not been set up", name))
        })?;
        client.authenticate(credential);

        self.state = ArtifactState::Authenticated;
        tracing::info!("Configured credentials for {}", name);
        Ok(())
    }

    /// Copy the artifact into its destination once and verify the root object.
    ///
    /// The store is opened for this call only and closed on every path.
    pub async fn fetch(&self) -> Result<Descriptor> {
        if self.state != ArtifactState::Ready {
            return Err(SyncError::Configuration(format!(
                "{} is {}, not ready",
                self.display_name(),
                self.state
            )));
        }

        let (coordinates, client) = match (&self.coordinates, &self.client) {
            (Some(c), Some(client)) => (c, client),
            _ => {
                return Err(SyncError::Configuration(format!(
                    "{} has not been set up",
                    self.display_name()
                )))
            }
        };

        let mut store = FileStore::open(self.descriptor.path())?;
        let outcome = copy_and_verify(&**client, coordinates, &mut store).await;
        let closed = store.close();

        let root = outcome?;
        closed?;
        Ok(root)
    }

    /// Fetch and record the pull
    pub async fn pull(&mut self) -> Result<Descriptor> {
        let root = self.fetch().await?;
        self.record_pull();
        Ok(root)
    }

    pub(crate) fn record_pull(&mut self) {
        self.last_pull_at = Some(Utc::now());
        self.pulled = true;
    }

    pub fn descriptor(&self) -> &ArtifactDescriptor {
        &self.descriptor
    }

    pub fn coordinates(&self) -> Option<&Coordinates> {
        self.coordinates.as_ref()
    }

    pub fn registry(&self) -> Option<&str> {
        self.coordinates.as_ref().map(|c| c.registry.as_str())
    }

    pub fn repository(&self) -> Option<&str> {
        self.coordinates.as_ref().map(|c| c.repository.as_str())
    }

    pub fn reference(&self) -> Option<&str> {
        self.coordinates.as_ref().map(|c| c.reference.as_str())
    }

    pub fn path(&self) -> &Path {
        self.descriptor.path()
    }

    pub fn interval(&self) -> Duration {
        self.descriptor.interval()
    }

    /// Raise the sync interval to `floor` if it is shorter
    pub fn enforce_minimum_interval(&mut self, floor: Duration) -> bool {
        self.descriptor.enforce_minimum_interval(floor)
    }

    pub fn login_required(&self) -> bool {
        self.login_required
    }

    pub fn last_pull_at(&self) -> Option<DateTime<Utc>> {
        self.last_pull_at
    }

    pub fn pulled(&self) -> bool {
        self.pulled
    }

    pub fn state(&self) -> ArtifactState {
        self.state
    }

    /// Coordinates if resolved, otherwise the configured URL
    pub fn display_name(&self) -> String {
        match &self.coordinates {
            Some(c) => c.to_string(),
            None => self.descriptor.url().to_string(),
        }
    }
}

async fn copy_and_verify(
    client: &dyn RegistryClient,
    coordinates: &Coordinates,
    store: &mut FileStore,
) -> Result<Descriptor> {
    let root = client.copy(&coordinates.reference, store).await?;

    match store.exists(&root) {
        Ok(true) => Ok(root),
        Ok(false) => Err(SyncError::Verification(format!(
            "{} ({}) not found in {} after copy",
            coordinates,
            root.digest,
            store.root().display()
        ))),
        Err(e) => Err(SyncError::Verification(format!(
            "could not check {} ({}) after copy: {}",
            coordinates, root.digest, e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::registry::Credential;
    use crate::testing::{Outcome, ScriptedClient};
    use tempfile::tempdir;

    #[test]
    fn test_prepare_resolves_default_tag() {
        let dir = tempdir().unwrap();
        let client = ScriptedClient::new(vec![]);
        let desc = ArtifactDescriptor::new("ghcr.io/owner/zones", dir.path());

        let artifact = Artifact::prepare_with(desc, client.connector()).unwrap();

        assert_eq!(artifact.registry(), Some("ghcr.io"));
        assert_eq!(artifact.repository(), Some("owner/zones"));
        assert_eq!(artifact.reference(), Some("latest"));
        assert_eq!(artifact.state(), ArtifactState::Ready);
        assert!(!artifact.login_required());
        assert!(client.credential().is_none());
    }

    #[test]
    fn test_prepare_installs_credential() {
        let dir = tempdir().unwrap();
        let client = ScriptedClient::new(vec![]);
        let desc = ArtifactDescriptor::new("ghcr.io/owner/zones:1.0", dir.path())
            .with_credential(Credential::new("user", "pass"));

        let artifact = Artifact::prepare_with(desc, client.connector()).unwrap();

        assert!(artifact.login_required());
        assert_eq!(client.credential(), Some(Credential::new("user", "pass")));
        assert!(!client.plain_http());
    }

    #[test]
    fn test_empty_credential_fails_login() {
        let dir = tempdir().unwrap();
        let client = ScriptedClient::new(vec![]);
        let desc = ArtifactDescriptor::new("ghcr.io/owner/zones:1.0", dir.path())
            .with_credential(Credential::default());

        let err = Artifact::prepare_with(desc, client.connector()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Credential);
    }

    #[test]
    fn test_insecure_applied_after_client_built() {
        let dir = tempdir().unwrap();
        let client = ScriptedClient::new(vec![]);
        let desc = ArtifactDescriptor::new("localhost:5000/owner/zones:1.0", dir.path())
            .with_insecure(true);

        Artifact::prepare_with(desc, client.connector()).unwrap();
        assert!(client.plain_http());
    }

    #[test]
    fn test_invalid_descriptor_never_connects() {
        let dir = tempdir().unwrap();
        let desc = ArtifactDescriptor::new("", dir.path());

        let err = Artifact::prepare_with(desc, |_| {
            panic!("client must not be built for an invalid descriptor")
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_malformed_url() {
        let dir = tempdir().unwrap();
        let client = ScriptedClient::new(vec![]);
        let desc = ArtifactDescriptor::new("not a reference", dir.path());

        let err = Artifact::prepare_with(desc, client.connector()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_pull_writes_object_and_records_time() {
        let dir = tempdir().unwrap();
        let client = ScriptedClient::new(vec![Outcome::Ok]);
        let desc = ArtifactDescriptor::new("ghcr.io/owner/zones:1.0", dir.path());
        let mut artifact = Artifact::prepare_with(desc, client.connector()).unwrap();

        assert!(!artifact.pulled());
        artifact.pull().await.unwrap();

        assert!(artifact.pulled());
        assert!(artifact.last_pull_at().is_some());
        assert_eq!(
            std::fs::read(dir.path().join(crate::testing::TITLE)).unwrap(),
            crate::testing::CONTENT
        );
    }

    #[tokio::test]
    async fn test_missing_root_is_verification_error() {
        let dir = tempdir().unwrap();
        let client = ScriptedClient::new(vec![Outcome::Lie]);
        let desc = ArtifactDescriptor::new("ghcr.io/owner/zones:1.0", dir.path());
        let artifact = Artifact::prepare_with(desc, client.connector()).unwrap();

        let err = artifact.fetch().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Verification);
    }

    #[tokio::test]
    async fn test_fetch_requires_ready() {
        let dir = tempdir().unwrap();
        let artifact = Artifact::new(ArtifactDescriptor::new(
            "ghcr.io/owner/zones:1.0",
            dir.path(),
        ));

        let err = artifact.fetch().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
