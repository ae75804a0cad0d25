//! Error types for pod operations

use cloud_storage::StorageError;
use solid_auth::{RefreshError, SignError};

/// Local precondition violations. Never retried, and never reach the network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Precondition {
    #[error("name must not be empty")]
    EmptyName,

    #[error("header {0} is reserved for request authentication")]
    ReservedHeader(String),

    #[error("no proof key on the credential")]
    MissingKey,

    #[error("no private key configured for the proof key")]
    MissingConfiguration,

    #[error("no access token on the credential")]
    MissingAccessToken,

    #[error("no storage root on the credential")]
    MissingStorageRoot,

    #[error("invalid resource path: {0}")]
    InvalidPath(String),

    #[error("cannot sign proof: {0}")]
    Proof(String),

    #[error("value for header {0} is not valid")]
    InvalidHeader(String),
}

/// Errors from pod operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("precondition failed: {0}")]
    Precondition(#[from] Precondition),

    #[error("transport error: {0}")]
    Transport(String),

    /// The pod rejected the access token again after a refresh, or the
    /// request could not be resent after refreshing.
    #[error("authentication expired: {0}")]
    AuthenticationExpired(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The token endpoint rejected the grant; the user must log in again.
    #[error("token refresh rejected: {0}")]
    RefreshRejected(String),

    /// Tokens were refreshed but the host failed to store them.
    #[error("refreshed credentials were not persisted")]
    PersistenceFailed,

    #[error("pod returned {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Result alias for pod operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<SignError> for Precondition {
    fn from(err: SignError) -> Self {
        match err {
            SignError::MissingKey => Precondition::MissingKey,
            SignError::MissingConfiguration => Precondition::MissingConfiguration,
            other => Precondition::Proof(other.to_string()),
        }
    }
}

impl From<RefreshError> for Error {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::Sign(SignError::MissingKey) => Precondition::MissingKey.into(),
            RefreshError::Sign(SignError::MissingConfiguration) => {
                Precondition::MissingConfiguration.into()
            }
            RefreshError::Transport(msg) => Error::Transport(msg),
            RefreshError::UnexpectedStatus { status, body } => Error::Transport(format!(
                "token endpoint returned {status}: {body}"
            )),
            RefreshError::PersistenceFailed => Error::PersistenceFailed,
            other @ (RefreshError::MissingRefreshToken
            | RefreshError::MissingParameters(_)
            | RefreshError::Sign(_)
            | RefreshError::InvalidGrant { .. }
            | RefreshError::MalformedResponse(_)) => Error::RefreshRejected(other.to_string()),
        }
    }
}

impl From<Error> for StorageError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(what) => StorageError::NotFound(what),
            Error::AlreadyExists(what) => StorageError::AlreadyExists(what),
            Error::Transport(msg) => StorageError::Transport(msg),
            err @ (Error::AuthenticationExpired(_) | Error::RefreshRejected(_)) => {
                StorageError::Unauthorized(err.to_string())
            }
            other => StorageError::Backend(other.to_string()),
        }
    }
}
