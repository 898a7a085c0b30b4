use crate::registry::Descriptor;
use crate::store::{verify_content, ContentStore, Result, StoreError};
use std::collections::HashMap;

/// In-memory content store keyed by digest.
///
/// Holds blobs that have no file name (manifests, configs) for the lifetime
/// of one pull attempt, and serves as a staging store in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: HashMap<String, Vec<u8>>,
    closed: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content stored under `digest`
    pub fn get(&self, digest: &str) -> Option<&[u8]> {
        self.blobs.get(digest).map(|b| b.as_slice())
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl ContentStore for MemoryStore {
    fn push(&mut self, descriptor: &Descriptor, content: &[u8]) -> Result<()> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        verify_content(descriptor, content)?;
        self.blobs
            .entry(descriptor.digest.clone())
            .or_insert_with(|| content.to_vec());
        Ok(())
    }

    fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(self.blobs.contains_key(&descriptor.digest))
    }

    fn close(&mut self) -> Result<()> {
        self.blobs.clear();
        self.closed = true;
        Ok(())
    }
}
