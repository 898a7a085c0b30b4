//! Content stores the registry client copies into
//!
//! A store is opened per pull attempt and closed on every exit path. Objects
//! are verified against their descriptor (size and SHA-256 digest) before they
//! are accepted, so a store never holds content that does not match what the
//! manifest promised.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::registry::Descriptor;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Content verification failed: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("Size mismatch for {digest}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        digest: String,
        expected: u64,
        actual: u64,
    },

    #[error("Unsupported digest algorithm: {0}")]
    UnsupportedDigest(String),

    #[error("Invalid file name '{0}'")]
    InvalidName(String),

    #[error("Duplicate file name '{0}' with different content")]
    DuplicateName(String),

    #[error("Store is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Destination for copied artifact content
pub trait ContentStore: Send {
    /// Write one object described by `descriptor`
    fn push(&mut self, descriptor: &Descriptor, content: &[u8]) -> Result<()>;

    /// Whether an object matching `descriptor` is present
    fn exists(&self, descriptor: &Descriptor) -> Result<bool>;

    /// Release the handle. Further use fails with [`StoreError::Closed`].
    fn close(&mut self) -> Result<()>;
}

/// Compute the SHA256 digest of data
pub fn compute_digest(data: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(data))
}

/// Check `content` against the size and digest in `descriptor`
pub fn verify_content(descriptor: &Descriptor, content: &[u8]) -> Result<()> {
    if content.len() as u64 != descriptor.size {
        return Err(StoreError::SizeMismatch {
            digest: descriptor.digest.clone(),
            expected: descriptor.size,
            actual: content.len() as u64,
        });
    }

    let (algorithm, _) = descriptor
        .digest
        .split_once(':')
        .ok_or_else(|| StoreError::UnsupportedDigest(descriptor.digest.clone()))?;
    if algorithm != "sha256" {
        return Err(StoreError::UnsupportedDigest(descriptor.digest.clone()));
    }

    let actual = compute_digest(content);
    if actual != descriptor.digest {
        return Err(StoreError::DigestMismatch {
            expected: descriptor.digest.clone(),
            actual,
        });
    }

    Ok(())
}
