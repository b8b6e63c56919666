//! Simple (non-transactional) key/value namespaces.
//!
//! The write-behind queue persists one value per task id into a
//! [`KeyValueStore`], and the pre-SQLite editor kept its whole state as a
//! single blob in one. Both are plain string-to-string namespaces with no
//! transactions: every `set` is independent.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Key/value store abstraction.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), KvError>;

    /// List all keys currently present (unordered).
    fn keys(&self) -> Result<Vec<String>, KvError>;
}

/// Key/value store error.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("invalid key: {0:?}")]
    InvalidKey(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("unreadable entry {path:?}")]
    Corrupt { path: PathBuf },
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn check_key(key: &str) -> Result<(), KvError> {
    if key.is_empty() {
        return Err(KvError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// In-memory key/value store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        check_key(key)?;
        let entries = self
            .entries
            .read()
            .map_err(|_| KvError::Unavailable("lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        check_key(key)?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| KvError::Unavailable("lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        check_key(key)?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| KvError::Unavailable("lock poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| KvError::Unavailable("lock poisoned".to_string()))?;
        Ok(entries.keys().cloned().collect())
    }
}

/// Directory-backed key/value store: one file per key.
///
/// File names are the hex encoding of the key, so any key is a valid file
/// name. Keys whose hex form would exceed [`MAX_DIRECT_NAME`] are stored under
/// `h-<sha256 of key>` instead, with the hex key as the first line of the file
/// so that `keys()` can still list them. A `set` writes a temp file and
/// renames it over the target, so a reader never observes a half-written
/// value.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

const TMP_SUFFIX: &str = ".tmp";

/// Longest hex file name used as is (leaves room for the temp suffix within
/// the usual 255-byte file name limit).
pub const MAX_DIRECT_NAME: usize = 200;

const DIGEST_PREFIX: &str = "h-";

impl FileKeyValueStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, KvError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| KvError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name(key))
    }
}

/// File name holding `key`.
fn file_name(key: &str) -> String {
    let name = encode_key(key);
    if name.len() <= MAX_DIRECT_NAME {
        name
    } else {
        format!("{DIGEST_PREFIX}{}", hex(&Sha256::digest(key.as_bytes())))
    }
}

/// Split a digest-named file into its hex key header and value.
fn split_header<'a>(contents: &'a str, path: &Path) -> Result<(String, &'a str), KvError> {
    contents
        .split_once('\n')
        .and_then(|(header, value)| Some((decode_key(header)?, value)))
        .ok_or_else(|| KvError::Corrupt {
            path: path.to_path_buf(),
        })
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        check_key(key)?;
        let name = file_name(key);
        let path = self.dir.join(&name);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(KvError::Io { path, source }),
        };

        if !name.starts_with(DIGEST_PREFIX) {
            return Ok(Some(contents));
        }
        let (stored_key, value) = split_header(&contents, &path)?;
        if stored_key != key {
            return Ok(None);
        }
        Ok(Some(value.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        check_key(key)?;
        let name = file_name(key);
        let path = self.dir.join(&name);
        let tmp = self
            .dir
            .join(format!("{name}.{}{TMP_SUFFIX}", Uuid::now_v7().simple()));

        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            if name.starts_with(DIGEST_PREFIX) {
                writeln!(file, "{}", encode_key(key))?;
            }
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };

        write().map_err(|source| {
            let _ = fs::remove_file(&tmp);
            KvError::Io {
                path: path.clone(),
                source,
            }
        })
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        check_key(key)?;
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(KvError::Io { path, source }),
        }
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| KvError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| KvError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            if name.starts_with(DIGEST_PREFIX) {
                let path = entry.path();
                let contents = fs::read_to_string(&path).map_err(|source| KvError::Io {
                    path: path.clone(),
                    source,
                })?;
                keys.push(split_header(&contents, &path)?.0);
            } else if let Some(key) = decode_key(name) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

impl<S> KeyValueStore for Arc<S>
where
    S: KeyValueStore + ?Sized,
{
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        (**self).keys()
    }
}

fn encode_key(key: &str) -> String {
    hex(key.as_bytes())
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    if name.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..name.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(name.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}
