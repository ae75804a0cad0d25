//! Solid-OIDC credential handling
//!
//! Holds the credential state of a Solid account, signs DPoP proofs for
//! outbound requests, and exchanges authorization codes and refresh tokens at
//! the issuer's token endpoint. Request execution against the pod lives in
//! `solid-pod`; this crate does no pod I/O.
//!
//! Credential flow:
//! 1. Host builds `CredentialState::from_configuration()` with the proof keys
//! 2. A login hands over `CodeParameters` (e.g. via `properties_from_headers()`)
//! 3. `TokenRefresher::generate_tokens()` exchanges the code for tokens
//! 4. `ProofTokenSigner::sign()` binds each request to its URL and method
//! 5. On expiry, `TokenRefresher::refresh()` rotates the tokens
//! 6. Each exchange is persisted through the `AccountDelegate`

pub mod clock;
pub mod constants;
pub mod credentials;
pub mod dpop;
pub mod error;
pub mod keys;
pub mod store;
pub mod token;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use clock::{Clock, FixedClock, SystemClock};
pub use constants::*;
pub use credentials::{
    CodeParameters, CredentialState, RefreshParameters, ServerParameters,
    TokenEndpointAuthMethod, properties_from_headers,
};
pub use dpop::{JtiSource, ProofClaims, ProofTokenSigner, SignError, UuidJti};
pub use error::{Error, Result};
pub use keys::{KeyMaterial, SigningKey, SolidCredsConfiguration};
pub use store::{AccountDelegate, FileStore, KeyValueStore, MemoryStore, StoreDelegate};
pub use token::{Grant, RefreshError, RefreshOutcome, TokenRefresher, TokenResponse};
