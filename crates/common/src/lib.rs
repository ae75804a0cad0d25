//! Shared types for the Solid pod workspace
//!
//! Holds the redacting `Secret` wrapper used for access tokens, refresh
//! tokens and private key material, and the configuration error type shared
//! by the binaries.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
