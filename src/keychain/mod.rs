//! Secure storage for the account hint and the token cache.
//!
//! On macOS items live in the Keychain as generic passwords whose service is
//! the configured access group. Other platforms use a file store under the
//! platform data directory with owner-only permissions.

pub mod secure;

use crate::error::KeychainError;
use directories::ProjectDirs;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Key-value secure storage scoped to one access group.
pub trait SecureStore: Send + Sync {
    /// Read the value stored under `key`, `None` when nothing is stored.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeychainError>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, value: &[u8], key: &str) -> Result<(), KeychainError>;

    /// Remove the value under `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), KeychainError>;

    /// Read a UTF-8 value.
    fn get_string(&self, key: &str) -> Result<Option<String>, KeychainError> {
        match self.get(key)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| KeychainError::Corrupted(e.to_string())),
            None => Ok(None),
        }
    }
}

/// Open the platform's secure store for `access_group`.
pub fn platform_store(access_group: &str) -> Result<Box<dyn SecureStore>, KeychainError> {
    #[cfg(target_os = "macos")]
    {
        Ok(Box::new(KeychainStore::new(access_group)))
    }

    #[cfg(not(target_os = "macos"))]
    {
        Ok(Box::new(FileStore::for_access_group(access_group)?))
    }
}

/// macOS Keychain generic-password store.
#[cfg(target_os = "macos")]
pub struct KeychainStore {
    service: String,
}

#[cfg(target_os = "macos")]
impl KeychainStore {
    pub fn new(access_group: &str) -> Self {
        Self {
            service: access_group.to_string(),
        }
    }
}

#[cfg(target_os = "macos")]
impl SecureStore for KeychainStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeychainError> {
        match security_framework::passwords::get_generic_password(&self.service, key) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if is_not_found_error(&e) => Ok(None),
            Err(e) => Err(KeychainError::RetrieveFailed(e.to_string())),
        }
    }

    fn set(&self, value: &[u8], key: &str) -> Result<(), KeychainError> {
        security_framework::passwords::set_generic_password(&self.service, key, value)
            .map_err(|e| KeychainError::StoreFailed(e.to_string()))
    }

    fn delete(&self, key: &str) -> Result<(), KeychainError> {
        match security_framework::passwords::delete_generic_password(&self.service, key) {
            Ok(()) => Ok(()),
            Err(e) if is_not_found_error(&e) => Ok(()),
            Err(e) => Err(KeychainError::DeleteFailed(e.to_string())),
        }
    }
}

/// Helper to check if a security framework error is "item not found".
#[cfg(target_os = "macos")]
fn is_not_found_error(error: &security_framework::base::Error) -> bool {
    // errSecItemNotFound = -25300
    error.code() == -25300
}

/// File-backed store: one file per key inside the access group directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store rooted at `<data dir>/<access group>`.
    pub fn for_access_group(access_group: &str) -> Result<Self, KeychainError> {
        let dirs = ProjectDirs::from("com", "example", "b2c-session").ok_or_else(|| {
            KeychainError::StoreFailed("Could not determine data directory".to_string())
        })?;
        Ok(Self::new(dirs.data_local_dir().join(access_group)))
    }

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are fixed identifiers, but keep them inside the directory regardless.
        let mut file_name: String = key
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
                _ => '_',
            })
            .collect();
        // "", "." and ".." would name the directory or its parent
        if file_name.chars().all(|c| c == '.') {
            file_name = "_".to_string();
        }
        self.dir.join(file_name)
    }
}

impl SecureStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeychainError> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KeychainError::RetrieveFailed(e.to_string())),
        }
    }

    fn set(&self, value: &[u8], key: &str) -> Result<(), KeychainError> {
        fs::create_dir_all(&self.dir).map_err(|e| KeychainError::StoreFailed(e.to_string()))?;
        let path = self.path_for(key);
        write_private(&path, value).map_err(|e| KeychainError::StoreFailed(e.to_string()))?;
        debug!("Stored {} in {:?}", key, self.dir);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KeychainError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeychainError::DeleteFailed(e.to_string())),
        }
    }
}

#[cfg(unix)]
fn write_private(path: &Path, value: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(value)?;
    file.flush()
}

#[cfg(not(unix))]
fn write_private(path: &Path, value: &[u8]) -> std::io::Result<()> {
    fs::write(path, value)
}

/// In-memory store, used when secure storage is unavailable and in tests.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeychainError> {
        let items = self
            .items
            .lock()
            .map_err(|e| KeychainError::RetrieveFailed(e.to_string()))?;
        Ok(items.get(key).cloned())
    }

    fn set(&self, value: &[u8], key: &str) -> Result<(), KeychainError> {
        let mut items = self
            .items
            .lock()
            .map_err(|e| KeychainError::StoreFailed(e.to_string()))?;
        items.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), KeychainError> {
        let mut items = self
            .items
            .lock()
            .map_err(|e| KeychainError::DeleteFailed(e.to_string()))?;
        items.remove(key);
        Ok(())
    }
}
