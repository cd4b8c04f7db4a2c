//! Directory-backed key storage.
//!
//! A key file is the raw 32 key bytes, named `<fingerprint>.key`. The store
//! is deliberately dumb, no wrapping and no passphrase; protecting the
//! directory is the caller's job.

use std::fs;
use std::io::Result as IoResult;
use std::path::{Path, PathBuf};

use crate::Key;

const KEY_FILE_EXTENSION: &str = "key";

/// Loads and saves raw key files under one directory.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Opens a store rooted at `dir` (created on first save).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory this store reads and writes.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, key_id: &str) -> PathBuf {
        self.dir.join(format!("{key_id}.{KEY_FILE_EXTENSION}"))
    }

    /// Saves `key` under its fingerprint, returning the file path.
    pub fn save(&self, key: &Key) -> IoResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_of(&key.fingerprint());
        fs::write(&path, key.as_bytes())?;
        Ok(path)
    }

    /// Loads the key with the given fingerprint.
    pub fn load(&self, key_id: &str) -> IoResult<Key> {
        read_key_file(&self.path_of(key_id))
    }

    /// Loads every `*.key` file in the directory.
    ///
    /// A missing directory is an empty ring, not an error.
    pub fn load_all(&self) -> IoResult<Vec<Key>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(KEY_FILE_EXTENSION) {
                keys.push(read_key_file(&path)?);
            }
        }
        Ok(keys)
    }
}

/// Reads a raw key file.
pub fn read_key_file(path: &Path) -> IoResult<Key> {
    Key::try_from(fs::read(path)?.as_slice())
}

/// Reads a key file, generating and saving a fresh key when it is missing.
pub fn load_or_generate(path: &Path) -> IoResult<Key> {
    match fs::read(path) {
        Ok(bytes) => Key::try_from(bytes.as_slice()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let key = Key::generate();
            fs::write(path, key.as_bytes())?;
            tracing::info!(path = %path.display(), key_id = %key.fingerprint(), "generated new key");
            Ok(key)
        }
        Err(e) => Err(e),
    }
}
