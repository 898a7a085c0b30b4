//! Quilt OCI artifact sync
//!
//! Keeps local directories synchronized with artifacts stored in OCI
//! registries. Each configured artifact gets its own background task that
//! pulls immediately and then re-pulls on a fixed interval, retrying transient
//! registry failures under a bounded deadline.
//!
//! Entry points:
//! - [`Artifact::prepare`] turns a validated [`ArtifactDescriptor`] into a
//!   ready-to-pull artifact
//! - [`sync::Puller::pull_with_retry`] runs one bounded pull
//! - [`sync::SyncController`] owns the per-artifact background loops

pub mod artifact;
pub mod config;
pub mod error;
pub mod registry;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use artifact::{Artifact, ArtifactDescriptor, ArtifactState, Coordinates};
pub use config::SyncConfig;
pub use error::{CancelReason, ErrorKind, Result, SyncError};
pub use registry::{Credential, OciRegistryClient, RegistryClient};
pub use store::{ContentStore, FileStore, MemoryStore};
pub use sync::{Puller, PullReport, SyncController, SyncTunables};
