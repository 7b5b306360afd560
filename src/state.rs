//! Resolution-state snapshots for warm restarts.
//!
//! The resolver's in-memory map of cached derivatives can be saved to a
//! JSON snapshot and restored on the next start, so a restart does not
//! demote every derivative back to unresolved. The snapshot is advisory:
//! a missing, corrupt, or version-mismatched file just means starting
//! cold, never an error.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::raster::OutputFormat;
use crate::resolver::DerivativeKey;

/// Version of the snapshot format. Bump to discard existing snapshots
/// when the layout or key computation changes.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One cached derivative, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: DerivativeKey,
    pub entity_id: String,
    pub spec_name: String,
    pub name: String,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub source_fingerprint: String,
}

/// On-disk snapshot of every cached derivative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub entries: Vec<SnapshotEntry>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            entries: Vec::new(),
        }
    }
}

impl StateSnapshot {
    /// Load from `path`. Anything unusable yields an empty snapshot.
    pub fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "snapshot unreadable, starting cold");
                return Self::default();
            }
        };
        match serde_json::from_str::<Self>(&raw) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => snapshot,
            Ok(snapshot) => {
                debug!(
                    found = snapshot.version,
                    expected = SNAPSHOT_VERSION,
                    "snapshot version mismatch, starting cold"
                );
                Self::default()
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "snapshot corrupt, starting cold");
                Self::default()
            }
        }
    }

    /// Save to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
