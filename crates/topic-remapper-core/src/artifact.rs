//! Snapshot artifacts.
//!
//! Every live run writes the snapshot it read and the plan it computed to
//! disk before touching any broker. Artifacts are pretty-printed JSON and
//! are never overwritten.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use crate::error::{PersistError, PersistResult};
use crate::mapping::MappingSnapshot;

/// Upper bound on collision suffixes tried for one artifact name.
const MAX_NAME_ATTEMPTS: u32 = 1_000;

/// Serialize a snapshot to its artifact form.
///
/// # Errors
///
/// Returns [`PersistError::Encode`] if serialization fails.
pub fn encode(snapshot: &MappingSnapshot) -> PersistResult<Vec<u8>> {
    serde_json::to_vec_pretty(snapshot).map_err(PersistError::Encode)
}

/// Parse an artifact back into a snapshot.
///
/// # Errors
///
/// Returns [`PersistError::Decode`] if the bytes are not a snapshot.
pub fn decode(bytes: &[u8]) -> PersistResult<MappingSnapshot> {
    serde_json::from_slice(bytes).map_err(PersistError::Decode)
}

/// Writes and reads artifacts in one directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory artifacts are written to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `snapshot` as `<topic>-<epoch>-<label>-<timestamp>.json`.
    ///
    /// If that name is taken, `-1`, `-2`, ... is appended before the
    /// extension.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`] if encoding or any filesystem call fails.
    pub fn write_artifact(&self, snapshot: &MappingSnapshot, label: &str) -> PersistResult<PathBuf> {
        let bytes = encode(snapshot)?;

        std::fs::create_dir_all(&self.dir).map_err(|e| PersistError::Io {
            path: self.dir.clone(),
            source: e,
        })?;

        let stem = format!(
            "{}-{}-{}-{}",
            snapshot.topic,
            snapshot.epoch,
            label,
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        );

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{stem}.json")
            } else {
                format!("{stem}-{attempt}.json")
            };
            let path = self.dir.join(name);

            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(PersistError::Io { path, source: e }),
            };

            file.write_all(&bytes)
                .and_then(|()| file.sync_all())
                .map_err(|e| PersistError::Io {
                    path: path.clone(),
                    source: e,
                })?;

            info!(
                topic = %snapshot.topic,
                epoch = snapshot.epoch,
                label,
                path = %path.display(),
                "wrote mapping artifact"
            );
            return Ok(path);
        }

        Err(PersistError::Io {
            path: self.dir.join(format!("{stem}.json")),
            source: std::io::Error::new(ErrorKind::AlreadyExists, "no free artifact name"),
        })
    }

    /// Read a snapshot previously written by [`write_artifact`](Self::write_artifact)
    /// or by hand.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`] if the file cannot be read or decoded.
    pub fn read_artifact(path: impl AsRef<Path>) -> PersistResult<MappingSnapshot> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| PersistError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        decode(&bytes)
    }
}
