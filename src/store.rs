//! Blob storage for source and derivative bytes.
//!
//! The resolver only ever talks to a [`BlobStore`]; where the bytes live is
//! the caller's business. [`FsStore`] keeps them under a directory,
//! [`MemoryStore`] keeps them in a map and records every call so tests can
//! assert on store traffic.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Blob not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Named blob storage. Implementations must be shareable across the
/// resolver's worker threads.
pub trait BlobStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Vec<u8>>;

    fn put(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Remove a blob. Deleting a missing blob is not an error.
    fn delete(&self, name: &str) -> Result<()>;

    fn exists(&self, name: &str) -> Result<bool>;
}

impl<T: BlobStore + ?Sized> BlobStore for std::sync::Arc<T> {
    fn get(&self, name: &str) -> Result<Vec<u8>> {
        (**self).get(name)
    }

    fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        (**self).put(name, bytes)
    }

    fn delete(&self, name: &str) -> Result<()> {
        (**self).delete(name)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        (**self).exists(name)
    }
}

/// One recorded [`MemoryStore`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Get(String),
    Put(String),
    Delete(String),
    Exists(String),
}

/// In-memory store. Uses Mutex (not RefCell) so it is Sync and can sit
/// behind the resolver like any other store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    operations: Mutex<Vec<StoreOp>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call made so far, in order.
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Stored blob names, sorted for stable assertions.
    pub fn blob_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_blobs().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock_blobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_blobs().is_empty()
    }

    fn lock_blobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, op: StoreOp) {
        self.operations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(op);
    }
}

impl BlobStore for MemoryStore {
    fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.record(StoreOp::Get(name.to_string()));
        self.lock_blobs()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.record(StoreOp::Put(name.to_string()));
        self.lock_blobs().insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.record(StoreOp::Delete(name.to_string()));
        self.lock_blobs().remove(name);
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool> {
        self.record(StoreOp::Exists(name.to_string()));
        Ok(self.lock_blobs().contains_key(name))
    }
}

/// Store on a directory. Blob names map directly to paths under the root;
/// writes create intermediate directories as needed.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl BlobStore for FsStore {
    fn get(&self, name: &str) -> Result<Vec<u8>> {
        match fs::read(self.path_for(name)) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.path_for(name).try_exists()?)
    }
}
