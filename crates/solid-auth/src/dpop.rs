//! DPoP proof tokens
//!
//! Every request to the pod and to the token endpoint carries a fresh proof:
//! a JWT whose header embeds the public JWK and whose claims bind it to one
//! HTTP method and one URL. Issuers compare `htu` byte-for-byte against the
//! URL they received, so the URL string passed in is used verbatim.

use std::sync::Arc;

use jsonwebtoken::Header;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::constants::DPOP_JWT_TYPE;
use crate::credentials::CredentialState;
use crate::keys;

/// Claims of one proof. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofClaims {
    /// Exact request URL
    pub htu: String,
    /// HTTP method name
    pub htm: String,
    /// Unique per proof
    pub jti: String,
    /// Issued-at, unix seconds
    pub iat: i64,
}

/// Errors from building a proof.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("no proof key (JWK) on the credential")]
    MissingKey,

    #[error("no private key configured for the proof key")]
    MissingConfiguration,

    #[error("unsupported proof key: {0}")]
    UnsupportedKey(String),

    #[error("signing proof failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Source of `jti` values.
pub trait JtiSource: Send + Sync {
    fn next_jti(&self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidJti;

impl JtiSource for UuidJti {
    fn next_jti(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Builds proofs from a credential's key material.
///
/// Cheap to clone; the clock and `jti` source are shared.
#[derive(Clone)]
pub struct ProofTokenSigner {
    clock: Arc<dyn Clock>,
    jti: Arc<dyn JtiSource>,
}

impl Default for ProofTokenSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProofTokenSigner {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            jti: Arc::new(UuidJti),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_jti_source(mut self, jti: Arc<dyn JtiSource>) -> Self {
        self.jti = jti;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Claims for a request to `url` with `method`.
    pub fn claims(&self, url: &str, method: &str) -> ProofClaims {
        ProofClaims {
            htu: url.to_string(),
            htm: method.to_string(),
            jti: self.jti.next_jti(),
            iat: self.clock.now().timestamp(),
        }
    }

    /// Sign a proof for one request.
    ///
    /// Fails with `MissingKey` when the credential has no JWK and with
    /// `MissingConfiguration` when it has a JWK but no private key.
    pub fn sign(
        &self,
        url: &str,
        method: &str,
        state: &CredentialState,
    ) -> Result<String, SignError> {
        let jwk = state.jwk().ok_or(SignError::MissingKey)?;
        let signing_key = state.signing_key().ok_or(SignError::MissingConfiguration)?;

        let algorithm = keys::algorithm_for(jwk).map_err(SignError::UnsupportedKey)?;
        if algorithm != signing_key.algorithm() {
            return Err(SignError::UnsupportedKey(format!(
                "JWK implies {algorithm:?} but the private key was loaded for {:?}",
                signing_key.algorithm()
            )));
        }

        let mut header = Header::new(algorithm);
        header.typ = Some(DPOP_JWT_TYPE.to_string());
        header.jwk = Some(jwk.clone());

        let claims = self.claims(url, method);
        Ok(jsonwebtoken::encode(
            &header,
            &claims,
            signing_key.encoding_key(),
        )?)
    }
}
