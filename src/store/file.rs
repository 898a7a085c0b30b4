//! Destination-directory content store
//!
//! Blobs carrying an `org.opencontainers.image.title` annotation are written
//! to `<root>/<title>`. Every write goes to a hidden temporary file next to
//! the target and is renamed into place, so readers of the directory see
//! either the previous file or the complete new one. Blobs without a title
//! stay in memory for the lifetime of the handle.

use crate::registry::Descriptor;
use crate::store::{compute_digest, verify_content, ContentStore, MemoryStore, Result, StoreError};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

const TEMP_PREFIX: &str = ".quilt-sync-";
const TEMP_SUFFIX: &str = ".tmp";

/// Content store rooted at an artifact's destination directory
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,

    /// Blobs without a file name
    fallback: MemoryStore,

    /// Titles written through this handle -> digest
    named: HashMap<String, String>,

    /// Temporary files not yet renamed into place
    pending: Vec<PathBuf>,

    closed: bool,
}

impl FileStore {
    /// Open a store at `root`, creating the directory if needed.
    ///
    /// Temporary files left behind by an interrupted earlier run are removed.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        sweep_temporaries(&root);

        Ok(Self {
            root,
            fallback: MemoryStore::new(),
            named: HashMap::new(),
            pending: Vec::new(),
            closed: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a titled blob is written to
    pub fn path_for(&self, title: &str) -> Result<PathBuf> {
        let relative = Path::new(title);
        let mut safe = PathBuf::new();

        for component in relative.components() {
            match component {
                Component::Normal(part) => safe.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StoreError::InvalidName(title.to_string()))
                }
            }
        }

        if safe.as_os_str().is_empty() {
            return Err(StoreError::InvalidName(title.to_string()));
        }

        Ok(self.root.join(safe))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn write_named(&mut self, title: &str, descriptor: &Descriptor, content: &[u8]) -> Result<()> {
        if let Some(existing) = self.named.get(title) {
            if existing != &descriptor.digest {
                return Err(StoreError::DuplicateName(title.to_string()));
            }
            return Ok(());
        }

        let target = self.path_for(title)?;

        // Unchanged content is left untouched
        if file_matches(&target, descriptor)? {
            tracing::debug!("{} already up to date", target.display());
            self.named
                .insert(title.to_string(), descriptor.digest.clone());
            return Ok(());
        }

        let parent = target.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&parent)?;

        let temp_path = parent.join(format!(
            "{}{}{}",
            TEMP_PREFIX,
            uuid::Uuid::new_v4(),
            TEMP_SUFFIX
        ));
        self.pending.push(temp_path.clone());

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &target)?;
        self.pending.retain(|p| p != &temp_path);

        tracing::debug!(
            "Wrote {} ({} bytes, {})",
            target.display(),
            content.len(),
            descriptor.digest
        );

        self.named
            .insert(title.to_string(), descriptor.digest.clone());
        Ok(())
    }

    fn remove_pending(&mut self) {
        for path in self.pending.drain(..) {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove temporary file {}: {}", path.display(), e);
                }
            }
        }
    }
}

impl ContentStore for FileStore {
    fn push(&mut self, descriptor: &Descriptor, content: &[u8]) -> Result<()> {
        self.ensure_open()?;
        verify_content(descriptor, content)?;

        match descriptor.title() {
            Some(title) => {
                let title = title.to_string();
                self.write_named(&title, descriptor, content)
            }
            None => self.fallback.push(descriptor, content),
        }
    }

    fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        self.ensure_open()?;

        match descriptor.title() {
            Some(title) => file_matches(&self.path_for(title)?, descriptor),
            None => self.fallback.exists(descriptor),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.remove_pending();
        self.fallback.close()?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if !self.closed {
            self.remove_pending();
        }
    }
}

/// Whether `path` holds exactly the content described by `descriptor`
fn file_matches(path: &Path, descriptor: &Descriptor) -> Result<bool> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    if !metadata.is_file() || metadata.len() != descriptor.size {
        return Ok(false);
    }

    let data = fs::read(path)?;
    Ok(compute_digest(&data) == descriptor.digest)
}

fn is_temporary(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

fn sweep_temporaries(root: &Path) {
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        if !is_temporary(&entry.file_name().to_string_lossy()) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => tracing::debug!("Removed stale temporary file {}", entry.path().display()),
            Err(e) => tracing::warn!(
                "Failed to remove stale temporary file {}: {}",
                entry.path().display(),
                e
            ),
        }
    }
}
