//! OCI Distribution (Registry) Client
//!
//! The sync engine only needs one capability from a registry: copy the
//! artifact behind a reference into a [`ContentStore`]. That capability is the
//! [`RegistryClient`] trait; [`OciRegistryClient`] implements it over the OCI
//! Distribution HTTP API with:
//! - Bearer token and basic authentication
//! - Per-request retries driven by the retry predicate
//! - Digest verification of every downloaded blob

mod auth;
mod client;
pub mod manifest;

pub use auth::{Credential, RegistryAuth};
pub use client::OciRegistryClient;
pub use manifest::Descriptor;

use crate::error::Result;
use crate::store::ContentStore;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the HTTP transport, classified later by the retry predicate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Registry returned {status} for {url}: {message}")]
    Status {
        status: u16,
        url: String,
        message: String,
        /// Server-provided `Retry-After`, if any
        retry_after: Option<Duration>,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return TransportError::Timeout(e.to_string());
        }
        if let Some(status) = e.status() {
            return TransportError::Status {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
                message: e.to_string(),
                retry_after: None,
            };
        }
        if e.is_decode() || e.is_body() {
            return TransportError::InvalidResponse(e.to_string());
        }
        TransportError::Network(e.to_string())
    }
}

/// Handle on one remote repository
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Install a static credential and a fresh token cache. Never contacts the server.
    fn authenticate(&mut self, credential: Credential);

    /// Switch between HTTPS and plain HTTP
    fn set_plain_http(&mut self, plain_http: bool);

    /// Copy the graph rooted at `reference` into `store`, returning the root descriptor
    async fn copy(&self, reference: &str, store: &mut dyn ContentStore) -> Result<Descriptor>;
}
