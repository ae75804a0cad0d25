//! Error types for credential and key handling

/// Errors from loading keys and credential records.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid JWK: {0}")]
    InvalidJwk(String),

    #[error("private key does not match the configured public key: {0}")]
    KeyMismatch(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("missing account parameters: {0}")]
    MissingParameters(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
