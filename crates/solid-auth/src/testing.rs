//! Key fixtures and proof verification for tests.

use std::sync::atomic::{AtomicU64, Ordering};

use common::Secret;
use jsonwebtoken::{DecodingKey, Header, Validation};

use crate::constants::DPOP_JWT_TYPE;
use crate::credentials::CredentialState;
use crate::dpop::{JtiSource, ProofClaims};
use crate::keys::SolidCredsConfiguration;

pub const PRIVATE_KEY_PEM: &str = include_str!("../testdata/private.pem");
pub const PUBLIC_KEY_PEM: &str = include_str!("../testdata/public.pem");
pub const JWK_JSON: &str = include_str!("../testdata/jwk.json");
/// Public key of an unrelated RSA pair
pub const OTHER_PUBLIC_KEY_PEM: &str = include_str!("../testdata/other_public.pem");
pub const EC_PRIVATE_KEY_PEM: &str = include_str!("../testdata/ec_private.pem");
pub const EC_PUBLIC_KEY_PEM: &str = include_str!("../testdata/ec_public.pem");
pub const EC_JWK_JSON: &str = include_str!("../testdata/ec_jwk.json");

/// RSA key configuration.
pub fn configuration() -> SolidCredsConfiguration {
    SolidCredsConfiguration {
        public_key: Some(PUBLIC_KEY_PEM.to_string()),
        private_key: Some(Secret::new(PRIVATE_KEY_PEM.to_string())),
        jwk: Some(JWK_JSON.to_string()),
    }
}

/// P-256 key configuration.
pub fn ec_configuration() -> SolidCredsConfiguration {
    SolidCredsConfiguration {
        public_key: Some(EC_PUBLIC_KEY_PEM.to_string()),
        private_key: Some(Secret::new(EC_PRIVATE_KEY_PEM.to_string())),
        jwk: Some(EC_JWK_JSON.to_string()),
    }
}

/// Credentials holding the RSA fixture keys and nothing else.
pub fn credential_state() -> CredentialState {
    CredentialState::from_configuration(&configuration())
        .unwrap_or_else(|e| panic!("RSA fixture keys must load: {e}"))
}

/// Credentials holding the P-256 fixture keys and nothing else.
pub fn ec_credential_state() -> CredentialState {
    CredentialState::from_configuration(&ec_configuration())
        .unwrap_or_else(|e| panic!("EC fixture keys must load: {e}"))
}

/// Verify a proof against the JWK embedded in its own header, as a pod
/// does, and return the header and claims.
pub fn verify_proof(token: &str) -> Option<(Header, ProofClaims)> {
    let header = jsonwebtoken::decode_header(token).ok()?;
    if header.typ.as_deref() != Some(DPOP_JWT_TYPE) {
        return None;
    }
    let key = DecodingKey::from_jwk(header.jwk.as_ref()?).ok()?;
    let mut validation = Validation::new(header.alg);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_aud = false;
    let data = jsonwebtoken::decode::<ProofClaims>(token, &key, &validation).ok()?;
    Some((header, data.claims))
}

/// `jti-1`, `jti-2`, ...
#[derive(Debug, Default)]
pub struct SequenceJti(AtomicU64);

impl JtiSource for SequenceJti {
    fn next_jti(&self) -> String {
        format!("jti-{}", self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
