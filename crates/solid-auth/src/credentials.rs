//! Credential state for one Solid account
//!
//! A `CredentialState` holds the access and refresh tokens, the proof key
//! material and the parameters needed to reach the token endpoint. It has no
//! I/O of its own: `TokenRefresher` performs the network exchange and then
//! applies the result here.
//!
//! Refresh parameters come in two shapes. A fresh login carries
//! `CodeParameters` (an authorization code that has not been exchanged yet);
//! after the first exchange only the `ServerParameters` subset is kept.
//! Records written by older versions carry `codeParameters` next to their
//! tokens; those load as server parameters because the code is spent.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, TimeDelta, Utc};
use common::Secret;
use jsonwebtoken::jwk::Jwk;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::constants::ACCOUNT_DETAILS_HEADER;
use crate::error::{Error, Result};
use crate::keys::{KeyMaterial, SigningKey, SolidCredsConfiguration};

/// How the client authenticates itself to the token endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    /// HTTP Basic with client id and secret
    #[default]
    ClientSecretBasic,
    /// Client id and secret as form fields
    ClientSecretPost,
    /// Public client: client id only
    None,
}

/// Output of the authorization flow, before the code is exchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeParameters {
    pub token_endpoint: Url,
    pub code: String,
    pub code_verifier: String,
    pub redirect_uri: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<Secret<String>>,
    #[serde(default)]
    pub authentication_method: TokenEndpointAuthMethod,
    /// Root of the user's storage, when the issuer reported one
    #[serde(default, alias = "storageIRI")]
    pub storage_iri: Option<Url>,
}

impl CodeParameters {
    /// Decode from base64-encoded JSON, as sent by clients in a request header.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::CredentialParse(format!("decoding code parameters: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::CredentialParse(format!("parsing code parameters: {e}")))
    }

    pub fn to_base64(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| Error::CredentialParse(format!("serializing code parameters: {e}")))?;
        Ok(STANDARD.encode(json))
    }

    /// The subset kept once the code has been exchanged. The spent code is
    /// remembered so the same login details are not exchanged twice.
    pub fn server_parameters(&self) -> ServerParameters {
        ServerParameters {
            token_endpoint: self.token_endpoint.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            authentication_method: self.authentication_method,
            exchanged_code: Some(self.code.clone()),
        }
    }
}

/// Where and how to refresh, once tokens have been issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerParameters {
    pub token_endpoint: Url,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<Secret<String>>,
    #[serde(default)]
    pub authentication_method: TokenEndpointAuthMethod,
    /// Authorization code these parameters were issued for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchanged_code: Option<String>,
}

/// How the refresh parameters were obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshParameters {
    /// Authorization code not yet exchanged
    Code(CodeParameters),
    /// Issued by a previous exchange
    Server(ServerParameters),
}

impl RefreshParameters {
    pub fn token_endpoint(&self) -> &Url {
        match self {
            Self::Code(p) => &p.token_endpoint,
            Self::Server(p) => &p.token_endpoint,
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            Self::Code(p) => &p.client_id,
            Self::Server(p) => &p.client_id,
        }
    }

    pub fn client_secret(&self) -> Option<&str> {
        match self {
            Self::Code(p) => p.client_secret.as_ref().map(|s| s.expose().as_str()),
            Self::Server(p) => p.client_secret.as_ref().map(|s| s.expose().as_str()),
        }
    }

    pub fn authentication_method(&self) -> TokenEndpointAuthMethod {
        match self {
            Self::Code(p) => p.authentication_method,
            Self::Server(p) => p.authentication_method,
        }
    }
}

/// Code parameters carried in the account-details request header, if any.
///
/// A header that is present but cannot be decoded is logged and ignored.
pub fn properties_from_headers(headers: &HeaderMap) -> Option<CodeParameters> {
    let value = headers.get(ACCOUNT_DETAILS_HEADER)?;
    let encoded = match value.to_str() {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "account details header is not ASCII");
            return None;
        }
    };
    match CodeParameters::from_base64(encoded) {
        Ok(params) => Some(params),
        Err(e) => {
            warn!(error = %e, "ignoring undecodable account details header");
            None
        }
    }
}

/// Persisted JSON shape.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialRecord {
    #[serde(default)]
    access_token: Option<Secret<String>>,
    #[serde(default)]
    refresh_token: Option<Secret<String>>,
    #[serde(default)]
    server_parameters: Option<ServerParameters>,
    #[serde(default)]
    code_parameters: Option<CodeParameters>,
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default)]
    storage_root: Option<Url>,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Tokens, proof keys and refresh parameters of one account.
///
/// The key material is fixed at construction. Tokens change only through
/// `apply_refresh_result` and `merge`, each of which bumps `generation` when
/// the access token changes.
#[derive(Debug, Clone, Default)]
pub struct CredentialState {
    access_token: Option<Secret<String>>,
    refresh_token: Option<Secret<String>>,
    refresh_parameters: Option<RefreshParameters>,
    account_id: Option<String>,
    storage_root: Option<Url>,
    /// Access token expiry, unix seconds
    expires_at: Option<i64>,
    jwk: Option<Jwk>,
    signing_key: Option<SigningKey>,
    generation: u64,
}

impl CredentialState {
    /// Empty credentials holding the configured key material.
    pub fn from_configuration(config: &SolidCredsConfiguration) -> Result<Self> {
        Ok(Self::default().with_keys(KeyMaterial::from_configuration(config)?))
    }

    /// Credentials from a persisted record. Key material is not persisted;
    /// attach it with `with_keys`.
    pub fn from_json(json: &str) -> Result<Self> {
        let record: CredentialRecord = serde_json::from_str(json)
            .map_err(|e| Error::CredentialParse(format!("parsing credential record: {e}")))?;

        let has_tokens = record.access_token.is_some() || record.refresh_token.is_some();
        let refresh_parameters = match (record.server_parameters, record.code_parameters) {
            (Some(server), _) => Some(RefreshParameters::Server(server)),
            // Older records keep spent code parameters next to their tokens
            (None, Some(code)) if has_tokens => {
                debug!("loading legacy credential record");
                Some(RefreshParameters::Server(code.server_parameters()))
            }
            (None, Some(code)) => Some(RefreshParameters::Code(code)),
            (None, None) => None,
        };

        Ok(Self {
            access_token: record.access_token,
            refresh_token: record.refresh_token,
            refresh_parameters,
            account_id: record.account_id,
            storage_root: record.storage_root,
            expires_at: record.expires_at,
            ..Self::default()
        })
    }

    pub fn to_json(&self) -> Result<String> {
        let (server_parameters, code_parameters) = match &self.refresh_parameters {
            Some(RefreshParameters::Server(p)) => (Some(p.clone()), None),
            Some(RefreshParameters::Code(p)) => (None, Some(p.clone())),
            None => (None, None),
        };
        let record = CredentialRecord {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            server_parameters,
            code_parameters,
            account_id: self.account_id.clone(),
            storage_root: self.storage_root.clone(),
            expires_at: self.expires_at,
        };
        serde_json::to_string(&record)
            .map_err(|e| Error::CredentialParse(format!("serializing credential record: {e}")))
    }

    pub fn with_keys(mut self, keys: KeyMaterial) -> Self {
        self.jwk = keys.jwk;
        self.signing_key = keys.signing_key;
        self
    }

    pub fn with_tokens(
        mut self,
        access_token: Option<String>,
        refresh_token: Option<String>,
    ) -> Self {
        self.access_token = access_token.map(Secret::new);
        self.refresh_token = refresh_token.map(Secret::new);
        self
    }

    pub fn with_refresh_parameters(mut self, parameters: RefreshParameters) -> Self {
        self.refresh_parameters = Some(parameters);
        self
    }

    pub fn with_code_parameters(self, parameters: CodeParameters) -> Self {
        self.with_refresh_parameters(RefreshParameters::Code(parameters))
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_storage_root(mut self, storage_root: Url) -> Self {
        self.storage_root = Some(storage_root);
        self
    }

    pub fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_ref().map(|t| t.expose().as_str())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(|t| t.expose().as_str())
    }

    pub fn refresh_parameters(&self) -> Option<&RefreshParameters> {
        self.refresh_parameters.as_ref()
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    /// Explicit storage root, else the one reported with the code parameters.
    pub fn storage_root(&self) -> Option<&Url> {
        self.storage_root.as_ref().or(match &self.refresh_parameters {
            Some(RefreshParameters::Code(p)) => p.storage_iri.as_ref(),
            _ => None,
        })
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    pub fn jwk(&self) -> Option<&Jwk> {
        self.jwk.as_ref()
    }

    pub fn signing_key(&self) -> Option<&SigningKey> {
        self.signing_key.as_ref()
    }

    /// Counter bumped whenever the access token is replaced.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a failed response means the access token has expired.
    ///
    /// Status is the only signal pods give reliably, so any 401 counts.
    /// Other 4xx statuses are ordinary failures.
    pub fn is_expired_given(&self, status: StatusCode) -> bool {
        status == StatusCode::UNAUTHORIZED
    }

    /// Whether the known expiry falls within `skew` of `now`. Unknown expiry
    /// never triggers a proactive refresh.
    pub fn needs_refresh(&self, now: DateTime<Utc>, skew: TimeDelta) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                self.refresh_token.is_some() && (now + skew).timestamp() >= expires_at
            }
            None => false,
        }
    }

    /// True iff an authorization code is waiting to be exchanged.
    pub fn needs_initial_token_exchange(&self) -> bool {
        matches!(self.refresh_parameters, Some(RefreshParameters::Code(_)))
    }

    pub fn pending_code(&self) -> Option<&str> {
        match &self.refresh_parameters {
            Some(RefreshParameters::Code(p)) => Some(&p.code),
            _ => None,
        }
    }

    /// The most recent authorization code, pending or already exchanged.
    pub fn last_code(&self) -> Option<&str> {
        match &self.refresh_parameters {
            Some(RefreshParameters::Code(p)) => Some(&p.code),
            Some(RefreshParameters::Server(p)) => p.exchanged_code.as_deref(),
            None => None,
        }
    }

    /// Whether this credential carries a code that the stored copy (`db`)
    /// has not already seen, pending or spent.
    pub fn needs_token_generation(&self, db: Option<&CredentialState>) -> bool {
        let Some(code) = self.pending_code() else {
            return false;
        };
        let result = match db {
            Some(db) => db.last_code() != Some(code),
            None => true,
        };
        debug!(result, "needs token generation");
        result
    }

    /// Apply a token-endpoint response.
    ///
    /// The access token is always replaced. The refresh token is replaced
    /// only when the response carries one; omission means unchanged.
    /// Returns whether the refresh token changed.
    pub fn apply_refresh_result(
        &mut self,
        access_token: String,
        refresh_token: Option<String>,
    ) -> bool {
        self.access_token = Some(Secret::new(access_token));
        self.generation += 1;

        match refresh_token {
            Some(new) if self.refresh_token() != Some(new.as_str()) => {
                self.refresh_token = Some(Secret::new(new));
                true
            }
            _ => false,
        }
    }

    /// Record `expires_in` seconds from `now` as an absolute expiry.
    pub(crate) fn set_expiry(&mut self, now: DateTime<Utc>, expires_in: Option<u64>) {
        self.expires_at = expires_in.map(|secs| {
            now.timestamp()
                .saturating_add(i64::try_from(secs).unwrap_or(i64::MAX))
        });
    }

    /// Drop the spent authorization code, keeping the server parameters.
    pub(crate) fn complete_code_exchange(&mut self) {
        if let Some(RefreshParameters::Code(code)) = &self.refresh_parameters {
            if self.storage_root.is_none() {
                self.storage_root = code.storage_iri.clone();
            }
            self.refresh_parameters = Some(RefreshParameters::Server(code.server_parameters()));
        }
    }

    /// Fold a newer snapshot of the same account into this one.
    ///
    /// Each field set in `newer` wins; fields it lacks keep their current
    /// value. Key material is never taken from `newer`. A bare authorization
    /// code never displaces the server parameters of issued tokens, so a
    /// merged credential holds either a pending code or live tokens.
    pub fn merge(&mut self, newer: &CredentialState) {
        if let Some(access) = &newer.access_token {
            if self.access_token.as_ref() != Some(access) {
                self.generation += 1;
            }
            self.access_token = Some(access.clone());
        }
        if let Some(refresh) = &newer.refresh_token {
            self.refresh_token = Some(refresh.clone());
        }
        if let Some(params) = &newer.refresh_parameters {
            let newer_has_tokens =
                newer.access_token.is_some() || newer.refresh_token.is_some();
            let code_over_issued = matches!(params, RefreshParameters::Code(_))
                && matches!(self.refresh_parameters, Some(RefreshParameters::Server(_)))
                && !newer_has_tokens;
            if code_over_issued {
                debug!("keeping server parameters over a code-only snapshot");
            } else {
                self.refresh_parameters = Some(params.clone());
            }
        }
        if let Some(account_id) = &newer.account_id {
            self.account_id = Some(account_id.clone());
        }
        if let Some(root) = &newer.storage_root {
            self.storage_root = Some(root.clone());
        }
        if let Some(expires_at) = newer.expires_at {
            self.expires_at = Some(expires_at);
        }
    }
}
