//! On-disk session store: one JSON blob per session id.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use gbs_core::Result;

use super::model::Session;

const EXTENSION: &str = "json";

/// Directory of persisted sessions.
///
/// Writes go to a temporary file that is flushed and renamed over the
/// blob, so a crash never leaves a truncated session behind.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Blob path for `id`, or `None` if the id could escape the directory.
    fn path(&self, id: &str) -> Option<PathBuf> {
        is_valid_id(id).then(|| self.dir.join(format!("{}.{}", id, EXTENSION)))
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        let Some(path) = self.path(&session.id) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid session id {:?}", session.id),
            )
            .into());
        };
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", session.id, uuid::Uuid::new_v4().simple()));

        let bytes = serde_json::to_vec(session)?;
        if let Err(e) = write_synced(&tmp, &bytes).and_then(|()| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!("Persisted session {} ({} bytes)", session.id, bytes.len());
        Ok(())
    }

    /// Read a persisted session. `Ok(None)` if there is none.
    pub fn load(&self, id: &str) -> Result<Option<Session>> {
        let Some(path) = self.path(id) else {
            return Ok(None);
        };
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Remove a persisted session; missing blobs are fine.
    pub fn remove(&self, id: &str) -> Result<()> {
        let Some(path) = self.path(id) else {
            return Ok(());
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Ids of every persisted session.
    pub fn ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if is_valid_id(stem) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
