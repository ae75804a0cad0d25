//! In-process storage backend.
//!
//! Holds files in a map keyed by `(folder, name)`. Follows the same upload
//! policy as the remote backends (folder required, valid MIME type, no
//! overwrite) so hosts can run against it in tests or offline mode.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    BoxFuture, CloudStorage, DownloadResult, FileNameOptions, Result, StorageError, UploadResult,
};

#[derive(Debug, Clone)]
struct StoredFile {
    mime_type: mime::Mime,
    data: Bytes,
}

/// Files kept in memory for the life of the value.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<(String, String), StoredFile>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// MIME type recorded for a stored file.
    pub async fn mime_type(&self, folder: &str, name: &str) -> Option<mime::Mime> {
        let files = self.files.lock().await;
        files
            .get(&(folder.to_string(), name.to_string()))
            .map(|f| f.mime_type.clone())
    }

    pub async fn len(&self) -> usize {
        self.files.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn key(name: &str, options: &FileNameOptions) -> Result<(String, String)> {
    let folder = options.require_folder()?;
    Ok((folder.to_string(), name.to_string()))
}

impl CloudStorage for MemoryStorage {
    fn upload_file<'a>(
        &'a self,
        name: &'a str,
        data: Bytes,
        options: &'a FileNameOptions,
    ) -> BoxFuture<'a, Result<UploadResult>> {
        Box::pin(async move {
            let key = key(name, options)?;
            let mime_type = options.require_mime_type()?;
            let mut files = self.files.lock().await;
            if files.contains_key(&key) {
                return Err(StorageError::AlreadyExists(format!("{}/{}", key.0, key.1)));
            }
            debug!(folder = %key.0, name = %key.1, bytes = data.len(), "stored file in memory");
            files.insert(key, StoredFile { mime_type, data });
            Ok(UploadResult {
                checksum: String::new(),
            })
        })
    }

    fn download_file<'a>(
        &'a self,
        name: &'a str,
        options: &'a FileNameOptions,
    ) -> BoxFuture<'a, Result<DownloadResult>> {
        Box::pin(async move {
            let key = key(name, options)?;
            let files = self.files.lock().await;
            Ok(match files.get(&key) {
                Some(file) => DownloadResult::Success {
                    data: file.data.clone(),
                    checksum: String::new(),
                },
                None => DownloadResult::FileNotFound,
            })
        })
    }

    fn delete_file<'a>(
        &'a self,
        name: &'a str,
        options: &'a FileNameOptions,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let key = key(name, options)?;
            let mut files = self.files.lock().await;
            match files.remove(&key) {
                Some(_) => Ok(()),
                None => Err(StorageError::NotFound(format!("{}/{}", key.0, key.1))),
            }
        })
    }

    fn lookup_file<'a>(
        &'a self,
        name: &'a str,
        options: &'a FileNameOptions,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let key = key(name, options)?;
            Ok(self.files.lock().await.contains_key(&key))
        })
    }
}
