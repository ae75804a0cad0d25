//! Storage-backend abstraction for user accounts
//!
//! Defines the `Account` and `CloudStorage` traits that decouple the host from
//! any particular storage protocol. `MemoryStorage` keeps files in process
//! memory; the Solid pod backend (in `solid-pod`) implements the same traits
//! with DPoP-bound requests against a remote pod.

pub mod memory;

pub use memory::MemoryStorage;

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;

/// Boxed future used by the trait methods for dyn-compatibility.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Where a file lives and what it contains.
///
/// Backends that group files into folders require `folder`; `mime_type`
/// is only consulted on upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileNameOptions {
    pub folder: Option<String>,
    pub mime_type: Option<String>,
}

impl FileNameOptions {
    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            folder: Some(folder.into()),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// The folder name, or `MissingFolder` when absent or empty.
    pub fn require_folder(&self) -> Result<&str> {
        match self.folder.as_deref() {
            Some(folder) if !folder.is_empty() => Ok(folder),
            _ => Err(StorageError::MissingFolder),
        }
    }

    /// Parse the MIME type, or `InvalidMimeType` when absent or malformed.
    pub fn require_mime_type(&self) -> Result<mime::Mime> {
        let raw = self
            .mime_type
            .as_deref()
            .ok_or_else(|| StorageError::InvalidMimeType("no mime type given".into()))?;
        raw.parse::<mime::Mime>()
            .map_err(|e| StorageError::InvalidMimeType(format!("{raw}: {e}")))
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    /// Backend-reported integrity checksum; empty when the backend has none.
    pub checksum: String,
}

/// Result of a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadResult {
    Success { data: Bytes, checksum: String },
    FileNotFound,
}

/// Errors surfaced through the storage traits.
///
/// Backends map their own failure taxonomy onto these kinds so that hosts
/// can branch without knowing which backend produced the error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("file name options must name a folder")]
    MissingFolder,

    #[error("invalid mime type: {0}")]
    InvalidMimeType(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Credentials were rejected; the user must re-authenticate.
    #[error("credentials rejected: {0}")]
    Unauthorized(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// A user account whose credentials the host persists and reconciles.
pub trait Account: Send + Sync {
    /// Stable scheme name (e.g. "solid"), used to pick the backend on load.
    fn scheme(&self) -> &'static str;

    /// Serialize the persistable part of the credentials.
    fn to_json(&self) -> BoxFuture<'_, Result<String>>;

    /// Whether this account carries an authorization code that has not been
    /// exchanged yet. `db` is the copy currently stored by the host, if any.
    fn needs_token_generation<'a>(&'a self, db: Option<&'a Self>) -> BoxFuture<'a, bool>
    where
        Self: Sized;

    /// Exchange the pending authorization code for tokens.
    fn generate_tokens(&self) -> BoxFuture<'_, Result<()>>;

    /// Fold a newer snapshot of the same account into this one.
    fn merge<'a>(&'a self, newer: &'a Self) -> BoxFuture<'a, ()>
    where
        Self: Sized;
}

/// File operations over a storage backend.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn CloudStorage>`).
pub trait CloudStorage: Send + Sync {
    /// Upload without overwriting: an existing file yields `AlreadyExists`.
    fn upload_file<'a>(
        &'a self,
        name: &'a str,
        data: Bytes,
        options: &'a FileNameOptions,
    ) -> BoxFuture<'a, Result<UploadResult>>;

    fn download_file<'a>(
        &'a self,
        name: &'a str,
        options: &'a FileNameOptions,
    ) -> BoxFuture<'a, Result<DownloadResult>>;

    fn delete_file<'a>(
        &'a self,
        name: &'a str,
        options: &'a FileNameOptions,
    ) -> BoxFuture<'a, Result<()>>;

    fn lookup_file<'a>(
        &'a self,
        name: &'a str,
        options: &'a FileNameOptions,
    ) -> BoxFuture<'a, Result<bool>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_folder_rejects_missing_and_empty() {
        assert_eq!(
            FileNameOptions::default().require_folder(),
            Err(StorageError::MissingFolder)
        );
        assert_eq!(
            FileNameOptions::new("").require_folder(),
            Err(StorageError::MissingFolder)
        );
        assert_eq!(FileNameOptions::new("Photos").require_folder(), Ok("Photos"));
    }

    #[test]
    fn require_mime_type_parses_valid_types() {
        let options = FileNameOptions::new("D").with_mime_type("text/plain");
        assert_eq!(options.require_mime_type().unwrap(), mime::TEXT_PLAIN);
    }

    #[test]
    fn require_mime_type_rejects_garbage() {
        let options = FileNameOptions::new("D").with_mime_type("not a mime type");
        assert!(matches!(
            options.require_mime_type(),
            Err(StorageError::InvalidMimeType(_))
        ));
        assert!(matches!(
            FileNameOptions::new("D").require_mime_type(),
            Err(StorageError::InvalidMimeType(_))
        ));
    }
}
