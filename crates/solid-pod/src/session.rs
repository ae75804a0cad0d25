//! Refresh-and-retry policy
//!
//! `PodSession` owns one account's credentials and sends every pod request
//! through the same policy:
//!
//! 1. If the access token is known to expire within the skew, refresh first.
//! 2. Send once.
//! 3. On 401, run exactly one refresh, then resend once if the method is
//!    idempotent. A second 401 is terminal.
//!
//! Refreshes are single-flight per session. A caller that saw a 401 takes
//! the refresh lock and skips the token endpoint when the credential
//! generation has moved since its request was signed: someone else already
//! refreshed, and issuers that rotate refresh tokens would reject a second
//! redemption of the old one.

use chrono::TimeDelta;
use solid_auth::{CredentialState, RefreshOutcome, TokenRefresher};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::metrics;
use crate::request::{Failure, PodRequest, RequestExecutor, Success};
use crate::resources::UploadMethod;

/// Refresh this long before the recorded expiry.
pub const DEFAULT_REFRESH_SKEW: TimeDelta = TimeDelta::seconds(60);

/// One account's credentials plus the machinery to use them.
pub struct PodSession {
    state: RwLock<CredentialState>,
    refresh_lock: Mutex<()>,
    executor: RequestExecutor,
    refresher: TokenRefresher,
    upload_method: UploadMethod,
    refresh_skew: TimeDelta,
}

impl PodSession {
    pub fn new(
        state: CredentialState,
        executor: RequestExecutor,
        refresher: TokenRefresher,
    ) -> Self {
        Self {
            state: RwLock::new(state),
            refresh_lock: Mutex::new(()),
            executor,
            refresher,
            upload_method: UploadMethod::default(),
            refresh_skew: DEFAULT_REFRESH_SKEW,
        }
    }

    pub fn with_upload_method(mut self, method: UploadMethod) -> Self {
        self.upload_method = method;
        self
    }

    pub fn with_refresh_skew(mut self, skew: TimeDelta) -> Self {
        self.refresh_skew = skew;
        self
    }

    pub fn state(&self) -> &RwLock<CredentialState> {
        &self.state
    }

    /// A copy of the current credentials.
    pub async fn snapshot(&self) -> CredentialState {
        self.state.read().await.clone()
    }

    pub fn upload_method(&self) -> UploadMethod {
        self.upload_method
    }

    /// Send `request`, refreshing and resending once on an expired token.
    pub async fn send(&self, request: &PodRequest) -> Result<Success> {
        self.refresh_if_expiring().await?;

        let (generation, outcome) = self.executor.execute_tracked(request, &self.state).await;
        let failure = match outcome {
            Ok(success) => return Ok(success),
            Err(failure) => failure,
        };
        if !self.is_expired(&failure).await {
            return Err(failure.into_error());
        }

        info!(
            method = %request.method(),
            target = request.target(),
            "access token rejected, refreshing"
        );
        self.refresh_after(generation).await?;

        if !request.is_idempotent() {
            warn!(
                method = %request.method(),
                target = request.target(),
                "not resending non-idempotent request"
            );
            return Err(Error::AuthenticationExpired(format!(
                "{} {} was rejected before the refresh and was not resent",
                request.method(),
                request.target()
            )));
        }

        let (_, outcome) = self.executor.execute_tracked(request, &self.state).await;
        let failure = match outcome {
            Ok(success) => return Ok(success),
            Err(failure) => failure,
        };
        if !self.is_expired(&failure).await {
            return Err(failure.into_error());
        }
        warn!(
            method = %request.method(),
            target = request.target(),
            "access token rejected again after refresh"
        );
        Err(Error::AuthenticationExpired(format!(
            "{} {} rejected after refreshing tokens",
            request.method(),
            request.target()
        )))
    }

    /// Force one refresh cycle.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let _guard = self.refresh_lock.lock().await;
        self.run_refresh().await
    }

    /// Exchange a pending authorization code for tokens.
    pub async fn generate_tokens(&self) -> Result<RefreshOutcome> {
        let _guard = self.refresh_lock.lock().await;
        match self.refresher.generate_tokens(&self.state).await {
            Ok(outcome) => {
                metrics::record_refresh("success");
                Ok(outcome)
            }
            Err(e) => {
                metrics::record_refresh(if e.is_fatal() { "rejected" } else { "error" });
                Err(e.into())
            }
        }
    }

    async fn is_expired(&self, failure: &Failure) -> bool {
        match failure.status {
            Some(status) => self.state.read().await.is_expired_given(status),
            None => false,
        }
    }

    async fn refresh_if_expiring(&self) -> Result<()> {
        let (expiring, generation) = {
            let guard = self.state.read().await;
            let now = self.executor.signer().clock().now();
            (guard.needs_refresh(now, self.refresh_skew), guard.generation())
        };
        if expiring {
            debug!("access token about to expire, refreshing before sending");
            self.refresh_after(generation).await?;
        }
        Ok(())
    }

    /// Refresh unless the tokens changed since `seen_generation`.
    async fn refresh_after(&self, seen_generation: u64) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        let current = self.state.read().await.generation();
        if current != seen_generation {
            debug!(
                seen_generation,
                current, "tokens already refreshed by a concurrent request"
            );
            metrics::record_refresh("shared");
            return Ok(());
        }
        self.run_refresh().await.map(|_| ())
    }

    /// Caller holds `refresh_lock`.
    async fn run_refresh(&self) -> Result<RefreshOutcome> {
        match self.refresher.refresh(&self.state).await {
            Ok(outcome) => {
                metrics::record_refresh("success");
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, fatal = e.is_fatal(), "token refresh failed");
                metrics::record_refresh(if e.is_fatal() { "rejected" } else { "error" });
                Err(e.into())
            }
        }
    }
}
