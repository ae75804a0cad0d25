//! Credential persistence
//!
//! `AccountDelegate` is the callback the token refresher invokes after every
//! successful exchange. `StoreDelegate` implements it on top of a
//! `KeyValueStore`, writing each account's credential JSON under its
//! account id.
//!
//! `FileStore` keeps all records in one JSON file. Writes use an atomic
//! temp-file + rename and a tokio Mutex serializes concurrent writers, so a
//! background refresh and a request-time refresh cannot interleave.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credentials::CredentialState;
use crate::error::{Error, Result};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Host-side persistence callback.
///
/// Returns false when the credentials could not be stored durably.
pub trait AccountDelegate: Send + Sync {
    fn save_to_database<'a>(&'a self, state: &'a CredentialState) -> BoxFuture<'a, bool>;
}

/// String records keyed by account id.
pub trait KeyValueStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

    fn put<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>>;

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;
}

/// Records held in memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Ok(self.records.lock().await.get(key).cloned()) })
    }

    fn put<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.records.lock().await.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Ok(self.records.lock().await.remove(key)) })
    }
}

/// Records kept in a single JSON file, mode 0600.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Load records from `path`, creating an empty file if none exists.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let records: HashMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), accounts = records.len(), "loaded credential records");
            records
        } else {
            info!(path = %path.display(), "credential file not found, starting empty");
            let records = HashMap::new();
            write_atomic(&path, &records).await?;
            records
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn keys(&self) -> Vec<String> {
        self.state.lock().await.keys().cloned().collect()
    }
}

impl KeyValueStore for FileStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Ok(self.state.lock().await.get(key).cloned()) })
    }

    fn put<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.insert(key.to_string(), value);
            debug!(key, "stored credential record");
            write_atomic(&self.path, &state).await
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let removed = state.remove(key);
            if removed.is_some() {
                debug!(key, "removed credential record");
                write_atomic(&self.path, &state).await?;
            }
            Ok(removed)
        })
    }
}

/// Write records to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are 0600 since the file holds tokens.
async fn write_atomic(path: &Path, data: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credential records: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Io("credential path has no file name".into()))?;
    // Unique per target file so stores sharing a directory never collide
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential records");
    Ok(())
}

/// Persists credentials into a key-value store under their account id.
pub struct StoreDelegate<S: KeyValueStore> {
    store: Arc<S>,
    default_key: String,
}

impl<S: KeyValueStore> StoreDelegate<S> {
    /// `default_key` is used for credentials that carry no account id.
    pub fn new(store: Arc<S>, default_key: impl Into<String>) -> Self {
        Self {
            store,
            default_key: default_key.into(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Load the credential stored under `key`, if any.
    pub async fn load(&self, key: &str) -> Result<Option<CredentialState>> {
        match self.store.get(key).await? {
            Some(json) => CredentialState::from_json(&json).map(Some),
            None => Ok(None),
        }
    }
}

impl<S: KeyValueStore> AccountDelegate for StoreDelegate<S> {
    fn save_to_database<'a>(&'a self, state: &'a CredentialState) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let key = state.account_id().unwrap_or(&self.default_key);
            let json = match state.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(key, error = %e, "could not serialize credentials");
                    return false;
                }
            };
            match self.store.put(key, json).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(key, error = %e, "could not persist credentials");
                    false
                }
            }
        })
    }
}
