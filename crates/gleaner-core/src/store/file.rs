//! JSON documents on disk, one file per key (write to a temp file, then rename).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::{StateStore, StoreError};

/// File-backed store rooted at a directory, by default `~/.local/state/gleaner/state/`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under the XDG state directory.
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self::new(crate::config::state_dir()?.join("state")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys may contain `/`; it maps to `_` so every document is a direct child of `dir`.
    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                c => c,
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }

    fn io_err(key: &str, source: std::io::Error) -> StoreError {
        StoreError::Io {
            key: key.to_string(),
            source,
        }
    }
}

impl StateStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_err(key, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            })
    }

    fn save(&self, key: &str, doc: &Value) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| Self::io_err(key, e))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(doc).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        fs::write(&tmp, json).map_err(|e| Self::io_err(key, e))?;
        fs::rename(&tmp, &path).map_err(|e| Self::io_err(key, e))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(key, e)),
        }
    }
}
