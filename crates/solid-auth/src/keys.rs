//! Key material for DPoP proofs
//!
//! The host hands over a `SolidCredsConfiguration` holding the public key
//! PEM, the private key PEM and the public key as a JWK. The JWK is embedded
//! in every proof header; the private key signs the proof. When both halves
//! are present they are checked against each other once, at load time, by
//! signing a sample token and verifying it with the JWK (and with the public PEM
//! when one is configured).

use std::fmt;

use common::Secret;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Key configuration supplied by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolidCredsConfiguration {
    #[serde(default, alias = "public_key")]
    pub public_key: Option<String>,
    #[serde(default, alias = "private_key")]
    pub private_key: Option<Secret<String>>,
    /// Public key as a JWK JSON string
    #[serde(default)]
    pub jwk: Option<String>,
}

/// Private half of the proof key, ready for signing.
#[derive(Clone)]
pub struct SigningKey {
    key: EncodingKey,
    algorithm: Algorithm,
}

impl SigningKey {
    /// Load a PEM private key for the given algorithm family.
    ///
    /// RSA keys may be PKCS#1 or PKCS#8; EC keys must be PKCS#8.
    pub fn from_pem(pem: &str, algorithm: Algorithm) -> Result<Self> {
        let key = match algorithm {
            Algorithm::ES256 | Algorithm::ES384 => EncodingKey::from_ec_pem(pem.as_bytes()),
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => EncodingKey::from_rsa_pem(pem.as_bytes()),
            other => {
                return Err(Error::InvalidConfiguration(format!(
                    "unsupported proof algorithm {other:?}"
                )));
            }
        }
        .map_err(|e| Error::InvalidConfiguration(format!("parsing private key: {e}")))?;
        Ok(Self { key, algorithm })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("algorithm", &self.algorithm)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// The JWK and signing key loaded from a configuration.
///
/// Either half may be missing; signing reports which one.
#[derive(Debug, Clone, Default)]
pub struct KeyMaterial {
    pub jwk: Option<Jwk>,
    pub signing_key: Option<SigningKey>,
}

impl KeyMaterial {
    pub fn from_configuration(config: &SolidCredsConfiguration) -> Result<Self> {
        let jwk = config.jwk.as_deref().map(parse_jwk).transpose()?;

        let signing_key = match (&jwk, &config.private_key) {
            (Some(jwk), Some(pem)) => {
                let algorithm = algorithm_for(jwk).map_err(Error::InvalidJwk)?;
                Some(SigningKey::from_pem(pem.expose(), algorithm)?)
            }
            (None, Some(_)) => {
                return Err(Error::InvalidConfiguration(
                    "a private key was configured without its JWK".into(),
                ));
            }
            (_, None) => None,
        };

        if let (Some(jwk), Some(signing_key)) = (&jwk, &signing_key) {
            check_pair(jwk, signing_key, config.public_key.as_deref())?;
        }

        Ok(Self { jwk, signing_key })
    }
}

/// Parse a JWK JSON string holding a public key.
pub fn parse_jwk(json: &str) -> Result<Jwk> {
    let jwk: Jwk = serde_json::from_str(json).map_err(|e| Error::InvalidJwk(e.to_string()))?;
    algorithm_for(&jwk).map_err(Error::InvalidJwk)?;
    Ok(jwk)
}

/// Signing algorithm implied by a public JWK.
///
/// RSA keys honour an explicit `alg` and default to RS256; EC keys follow
/// their curve.
pub fn algorithm_for(jwk: &Jwk) -> std::result::Result<Algorithm, String> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => Ok(match jwk.common.key_algorithm {
            Some(KeyAlgorithm::RS384) => Algorithm::RS384,
            Some(KeyAlgorithm::RS512) => Algorithm::RS512,
            Some(KeyAlgorithm::PS256) => Algorithm::PS256,
            Some(KeyAlgorithm::PS384) => Algorithm::PS384,
            Some(KeyAlgorithm::PS512) => Algorithm::PS512,
            _ => Algorithm::RS256,
        }),
        AlgorithmParameters::EllipticCurve(params) => match params.curve {
            EllipticCurve::P256 => Ok(Algorithm::ES256),
            EllipticCurve::P384 => Ok(Algorithm::ES384),
            ref other => Err(format!("unsupported curve {other:?}")),
        },
        _ => Err("proof keys must be RSA or EC public keys".into()),
    }
}

fn public_pem_key(pem: &str, algorithm: Algorithm) -> Result<DecodingKey> {
    match algorithm {
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem.as_bytes()),
        _ => DecodingKey::from_rsa_pem(pem.as_bytes()),
    }
    .map_err(|e| Error::InvalidConfiguration(format!("parsing public key: {e}")))
}

fn check_validation(algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation
}

/// Sign a sample token with the private key and verify it with each public form.
fn check_pair(jwk: &Jwk, signing_key: &SigningKey, public_pem: Option<&str>) -> Result<()> {
    let algorithm = signing_key.algorithm();
    let sample = serde_json::json!({ "check": "solid-auth key pair" });
    let token = jsonwebtoken::encode(&Header::new(algorithm), &sample, signing_key.encoding_key())
        .map_err(|e| Error::InvalidConfiguration(format!("signing key check: {e}")))?;

    let jwk_key =
        DecodingKey::from_jwk(jwk).map_err(|e| Error::InvalidJwk(format!("decoding JWK: {e}")))?;
    let validation = check_validation(algorithm);
    jsonwebtoken::decode::<serde_json::Value>(&token, &jwk_key, &validation)
        .map_err(|e| Error::KeyMismatch(format!("JWK: {e}")))?;

    if let Some(pem) = public_pem {
        let pem_key = public_pem_key(pem, algorithm)?;
        jsonwebtoken::decode::<serde_json::Value>(&token, &pem_key, &validation)
            .map_err(|e| Error::KeyMismatch(format!("public key PEM: {e}")))?;
    }

    debug!(?algorithm, "proof key pair verified");
    Ok(())
}
