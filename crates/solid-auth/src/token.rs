//! Token endpoint exchanges
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (first use of a fresh login)
//! 2. Refresh token exchange (every later refresh)
//!
//! Both POST a form to the issuer's token endpoint with a DPoP proof bound to
//! that endpoint. A successful response is applied to the shared
//! `CredentialState` under its write lock, then handed to the persistence
//! delegate. Concurrent calls are not deduplicated here; callers that need
//! single-flight refresh serialize above this layer.

use std::sync::Weak;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderName};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;
use url::form_urlencoded;

use crate::constants::{DPOP_HEADER, GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN, INVALID_GRANT};
use crate::credentials::{CredentialState, RefreshParameters, TokenEndpointAuthMethod};
use crate::dpop::{ProofTokenSigner, SignError};
use crate::store::AccountDelegate;

/// Response from the token endpoint for both grants.
///
/// `expires_in` is a delta in seconds from the response time.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// Which grant a refresh used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    AuthorizationCode,
    RefreshToken,
}

impl Grant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode => GRANT_AUTHORIZATION_CODE,
            Grant::RefreshToken => GRANT_REFRESH_TOKEN,
        }
    }
}

/// Result of a successful exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub grant: Grant,
    /// The issuer returned a refresh token different from the stored one
    pub refresh_token_rotated: bool,
}

/// Errors from a token endpoint exchange.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token on the credential")]
    MissingRefreshToken,

    #[error("missing refresh parameters: {0}")]
    MissingParameters(String),

    #[error("cannot sign token request: {0}")]
    Sign(#[from] SignError),

    /// The grant was rejected; the user must re-authenticate.
    #[error("grant rejected ({status}): {body}")]
    InvalidGrant { status: u16, body: String },

    #[error("token request failed: {0}")]
    Transport(String),

    #[error("token endpoint returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("invalid token response: {0}")]
    MalformedResponse(String),

    /// Tokens were refreshed in memory but the delegate failed to store them.
    #[error("refreshed credentials could not be persisted")]
    PersistenceFailed,
}

impl RefreshError {
    /// Whether retrying cannot help without new user input.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RefreshError::Transport(_)
                | RefreshError::UnexpectedStatus { .. }
                | RefreshError::PersistenceFailed
        )
    }
}

struct PreparedExchange {
    grant: Grant,
    endpoint: Url,
    form: Vec<(&'static str, String)>,
    basic_auth: Option<String>,
    proof: String,
}

/// Exchanges codes and refresh tokens, then persists the result.
#[derive(Clone)]
pub struct TokenRefresher {
    client: reqwest::Client,
    signer: ProofTokenSigner,
    delegate: Option<Weak<dyn AccountDelegate>>,
}

impl TokenRefresher {
    pub fn new(client: reqwest::Client, signer: ProofTokenSigner) -> Self {
        Self {
            client,
            signer,
            delegate: None,
        }
    }

    /// Persistence callback, held without keeping the host alive.
    pub fn with_delegate(mut self, delegate: Weak<dyn AccountDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn with_signer(mut self, signer: ProofTokenSigner) -> Self {
        self.signer = signer;
        self
    }

    /// Run one exchange: the authorization code grant while a code is
    /// pending, the refresh token grant otherwise.
    pub async fn refresh(
        &self,
        state: &RwLock<CredentialState>,
    ) -> Result<RefreshOutcome, RefreshError> {
        let exchange = {
            let guard = state.read().await;
            self.prepare(&guard)?
        };
        let grant = exchange.grant;

        info!(grant = grant.as_str(), endpoint = %exchange.endpoint, "requesting tokens");
        let token = self.send(exchange).await?;

        let access_token = token
            .access_token
            .ok_or_else(|| RefreshError::MalformedResponse("missing access_token".into()))?;
        if grant == Grant::AuthorizationCode && token.refresh_token.is_none() {
            return Err(RefreshError::MalformedResponse(
                "code exchange returned no refresh_token".into(),
            ));
        }
        if let Some(token_type) = &token.token_type {
            if !token_type.eq_ignore_ascii_case("dpop") {
                warn!(token_type = %token_type, "token endpoint issued a non-DPoP token type");
            }
        }

        let rotated = {
            let mut guard = state.write().await;
            let rotated = guard.apply_refresh_result(access_token, token.refresh_token);
            guard.set_expiry(self.signer.clock().now(), token.expires_in);
            if grant == Grant::AuthorizationCode {
                guard.complete_code_exchange();
            }
            rotated
        };
        info!(
            grant = grant.as_str(),
            refresh_token_rotated = rotated,
            "token exchange succeeded"
        );

        self.persist(state).await?;
        Ok(RefreshOutcome {
            grant,
            refresh_token_rotated: rotated,
        })
    }

    /// Exchange the pending authorization code. Fails when there is none.
    pub async fn generate_tokens(
        &self,
        state: &RwLock<CredentialState>,
    ) -> Result<RefreshOutcome, RefreshError> {
        if !state.read().await.needs_initial_token_exchange() {
            return Err(RefreshError::MissingParameters(
                "no authorization code to exchange".into(),
            ));
        }
        self.refresh(state).await
    }

    fn prepare(&self, state: &CredentialState) -> Result<PreparedExchange, RefreshError> {
        let params = state
            .refresh_parameters()
            .ok_or_else(|| RefreshError::MissingParameters("no token endpoint configured".into()))?;

        let (grant, mut form) = match params {
            RefreshParameters::Code(code) => (
                Grant::AuthorizationCode,
                vec![
                    ("grant_type", GRANT_AUTHORIZATION_CODE.to_string()),
                    ("code", code.code.clone()),
                    ("redirect_uri", code.redirect_uri.clone()),
                    ("code_verifier", code.code_verifier.clone()),
                ],
            ),
            RefreshParameters::Server(_) => {
                let refresh_token = state
                    .refresh_token()
                    .ok_or(RefreshError::MissingRefreshToken)?;
                (
                    Grant::RefreshToken,
                    vec![
                        ("grant_type", GRANT_REFRESH_TOKEN.to_string()),
                        ("refresh_token", refresh_token.to_string()),
                    ],
                )
            }
        };

        let client_id = params.client_id();
        let basic_auth = match (params.authentication_method(), params.client_secret()) {
            (TokenEndpointAuthMethod::ClientSecretBasic, Some(secret)) => {
                Some(basic_credentials(client_id, secret))
            }
            (TokenEndpointAuthMethod::ClientSecretPost, Some(secret)) => {
                form.push(("client_id", client_id.to_string()));
                form.push(("client_secret", secret.to_string()));
                None
            }
            (method, _) => {
                if method != TokenEndpointAuthMethod::None {
                    debug!(?method, "no client secret configured, authenticating as public client");
                }
                form.push(("client_id", client_id.to_string()));
                None
            }
        };

        let endpoint = params.token_endpoint().clone();
        let proof = self.signer.sign(endpoint.as_str(), "POST", state)?;

        Ok(PreparedExchange {
            grant,
            endpoint,
            form,
            basic_auth,
            proof,
        })
    }

    async fn send(&self, exchange: PreparedExchange) -> Result<TokenResponse, RefreshError> {
        let mut request = self
            .client
            .post(exchange.endpoint)
            .header(HeaderName::from_static(DPOP_HEADER), exchange.proof)
            .header(ACCEPT, "application/json")
            .form(&exchange.form);
        if let Some(basic) = exchange.basic_auth {
            request = request.header(AUTHORIZATION, basic);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RefreshError::Transport(format!("reading token response: {e}")))?;

        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }

        serde_json::from_slice::<TokenResponse>(&body)
            .map_err(|e| RefreshError::MalformedResponse(e.to_string()))
    }

    async fn persist(&self, state: &RwLock<CredentialState>) -> Result<(), RefreshError> {
        let Some(delegate) = self.delegate.as_ref().and_then(Weak::upgrade) else {
            warn!("no account delegate, refreshed credentials are held in memory only");
            return Ok(());
        };
        let guard = state.read().await;
        if delegate.save_to_database(&guard).await {
            debug!("refreshed credentials persisted");
            Ok(())
        } else {
            warn!("account delegate failed to persist refreshed credentials");
            Err(RefreshError::PersistenceFailed)
        }
    }
}

/// `Authorization: Basic` value with form-encoded client id and secret.
fn basic_credentials(client_id: &str, secret: &str) -> String {
    let id: String = form_urlencoded::byte_serialize(client_id.as_bytes()).collect();
    let secret: String = form_urlencoded::byte_serialize(secret.as_bytes()).collect();
    format!("Basic {}", STANDARD.encode(format!("{id}:{secret}")))
}

/// 401/403 or an `invalid_grant` error code means the grant is dead.
fn classify_failure(status: StatusCode, body: &[u8]) -> RefreshError {
    let text = String::from_utf8_lossy(body).into_owned();
    let code = serde_json::from_slice::<TokenErrorBody>(body)
        .ok()
        .and_then(|b| b.error);

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || code.as_deref() == Some(INVALID_GRANT)
    {
        RefreshError::InvalidGrant {
            status: status.as_u16(),
            body: text,
        }
    } else {
        RefreshError::UnexpectedStatus {
            status: status.as_u16(),
            body: text,
        }
    }
}
