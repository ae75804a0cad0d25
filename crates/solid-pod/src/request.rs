//! Authenticated request execution
//!
//! `RequestExecutor` turns a `PodRequest` into exactly one HTTP exchange with
//! the pod: resolve the URL against the storage root, sign a DPoP proof for
//! that exact URL, attach `Authorization`, `DPoP` and `Host`, send, and
//! classify the response. It never retries; the refresh-and-retry policy
//! lives in `PodSession`.

use std::time::Instant;

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, HOST, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use solid_auth::{CredentialState, DPOP_AUTH_SCHEME, DPOP_HEADER, ProofTokenSigner};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Precondition};
use crate::metrics;

/// Headers the executor sets itself. Callers supplying any of them get a
/// precondition failure.
pub const RESERVED_HEADERS: &[&str] = &["authorization", "dpop", "host"];

/// Check if a header name collides with the authentication headers
pub fn is_reserved(name: &str) -> bool {
    RESERVED_HEADERS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

/// One request against the pod, relative to the storage root.
#[derive(Debug, Clone)]
pub struct PodRequest {
    method: Method,
    path: Option<String>,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl PodRequest {
    /// Request targeting the storage root.
    pub fn new(method: Method) -> Self {
        Self {
            method,
            path: None,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// `/`-separated path below the storage root. Empty segments are dropped.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        self.path.as_deref().unwrap_or("/")
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Whether the request may be sent a second time after a token refresh.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self.method,
            Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
        )
    }
}

/// A 2xx response.
#[derive(Debug, Clone)]
pub struct Success {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Why a request failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Rejected locally; nothing was sent.
    Precondition(Precondition),
    Transport(String),
    /// 404 from the pod
    NotFound,
    /// Any other non-2xx status
    BadStatus(StatusCode),
    Malformed(String),
}

/// A failed request, with whatever the pod sent back.
#[derive(Debug, Clone)]
pub struct Failure {
    pub cause: FailureCause,
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// URL the request targeted, when it got that far
    pub url: Option<String>,
}

impl Failure {
    fn local(cause: FailureCause) -> Self {
        Self {
            cause,
            status: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            url: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.cause == FailureCause::NotFound
    }

    /// Label for the request metrics.
    pub(crate) fn outcome_label(&self) -> &'static str {
        match &self.cause {
            FailureCause::Precondition(_) => "precondition",
            FailureCause::Transport(_) => "transport",
            FailureCause::NotFound => "not_found",
            FailureCause::BadStatus(StatusCode::UNAUTHORIZED) => "unauthorized",
            FailureCause::BadStatus(_) => "bad_status",
            FailureCause::Malformed(_) => "malformed",
        }
    }

    pub fn into_error(self) -> Error {
        match self.cause {
            FailureCause::Precondition(p) => Error::Precondition(p),
            FailureCause::Transport(msg) => Error::Transport(msg),
            FailureCause::NotFound => Error::NotFound(self.url.unwrap_or_default()),
            FailureCause::BadStatus(status) => Error::BadStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&self.body).into_owned(),
            },
            FailureCause::Malformed(msg) => Error::MalformedResponse(msg),
        }
    }
}

impl From<Precondition> for Failure {
    fn from(p: Precondition) -> Self {
        Failure::local(FailureCause::Precondition(p))
    }
}

/// Outcome of one exchange with the pod.
pub type RequestOutcome = std::result::Result<Success, Failure>;

struct Prepared {
    url: Url,
    headers: HeaderMap,
}

/// Signs and sends single requests against the pod.
#[derive(Clone)]
pub struct RequestExecutor {
    client: reqwest::Client,
    signer: ProofTokenSigner,
}

impl RequestExecutor {
    pub fn new(client: reqwest::Client, signer: ProofTokenSigner) -> Self {
        Self { client, signer }
    }

    pub fn signer(&self) -> &ProofTokenSigner {
        &self.signer
    }

    /// Send `request` once with the current credentials.
    pub async fn execute(
        &self,
        request: &PodRequest,
        state: &RwLock<CredentialState>,
    ) -> RequestOutcome {
        self.execute_tracked(request, state).await.1
    }

    /// Like `execute`, also returning the credential generation the request
    /// was signed with.
    pub async fn execute_tracked(
        &self,
        request: &PodRequest,
        state: &RwLock<CredentialState>,
    ) -> (u64, RequestOutcome) {
        // Sign under the read lock, send without it
        let (generation, prepared) = {
            let guard = state.read().await;
            (guard.generation(), self.prepare(request, &guard))
        };

        let started = Instant::now();
        let outcome = match prepared {
            Ok(prepared) => self.send(request, prepared).await,
            Err(p) => {
                debug!(method = %request.method, target = request.target(), reason = %p, "request rejected locally");
                Err(p.into())
            }
        };

        let label = match &outcome {
            Ok(_) => "success",
            Err(failure) => failure.outcome_label(),
        };
        metrics::record_request(
            request.method.as_str(),
            label,
            started.elapsed().as_secs_f64(),
        );
        (generation, outcome)
    }

    fn prepare(
        &self,
        request: &PodRequest,
        state: &CredentialState,
    ) -> Result<Prepared, Precondition> {
        if let Some(name) = request.headers.keys().find(|n| is_reserved(n.as_str())) {
            return Err(Precondition::ReservedHeader(name.as_str().to_string()));
        }

        let root = state
            .storage_root()
            .ok_or(Precondition::MissingStorageRoot)?;
        let url = resolve_url(root, request.path.as_deref())?;

        let proof = self
            .signer
            .sign(url.as_str(), request.method.as_str(), state)?;
        let access_token = state
            .access_token()
            .ok_or(Precondition::MissingAccessToken)?;

        let mut headers = request.headers.clone();
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("{DPOP_AUTH_SCHEME} {access_token}"), "authorization")?,
        );
        headers.insert(
            HeaderName::from_static(DPOP_HEADER),
            header_value(&proof, "dpop")?,
        );
        headers.insert(HOST, header_value(&host_header(&url)?, "host")?);

        Ok(Prepared { url, headers })
    }

    async fn send(&self, request: &PodRequest, prepared: Prepared) -> RequestOutcome {
        let Prepared { url, headers } = prepared;
        debug!(method = %request.method, url = %url, "sending pod request");

        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(method = %request.method, url = %url, error = %e, "pod request failed");
                let mut failure = Failure::local(FailureCause::Transport(e.to_string()));
                failure.url = Some(url.into());
                return Err(failure);
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                return Err(Failure {
                    cause: FailureCause::Malformed(format!("reading response body: {e}")),
                    status: Some(status),
                    headers,
                    body: Bytes::new(),
                    url: Some(url.into()),
                });
            }
        };
        debug!(method = %request.method, url = %url, status = status.as_u16(), "pod responded");

        classify(status, headers, body, url)
    }
}

fn classify(status: StatusCode, headers: HeaderMap, body: Bytes, url: Url) -> RequestOutcome {
    if status.is_success() {
        return Ok(Success {
            status,
            headers,
            body,
        });
    }
    let cause = if status == StatusCode::NOT_FOUND {
        FailureCause::NotFound
    } else {
        FailureCause::BadStatus(status)
    };
    Err(Failure {
        cause,
        status: Some(status),
        headers,
        body,
        url: Some(url.into()),
    })
}

/// Append `path` to the storage root, one segment per `/`-separated part.
///
/// Segments are percent-encoded; the root's own trailing slash is not
/// duplicated and no trailing slash is added.
pub fn resolve_url(root: &Url, path: Option<&str>) -> Result<Url, Precondition> {
    let Some(path) = path else {
        return Ok(root.clone());
    };
    let mut url = root.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| Precondition::InvalidPath(format!("{root} cannot take a path")))?;
        segments.pop_if_empty();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if part == "." || part == ".." {
                return Err(Precondition::InvalidPath(path.to_string()));
            }
            segments.push(part);
        }
    }
    Ok(url)
}

/// `Host` header value for `url`: host plus any non-default port.
fn host_header(url: &Url) -> Result<String, Precondition> {
    let host = url
        .host_str()
        .ok_or_else(|| Precondition::InvalidPath(format!("{url} has no host")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn header_value(value: &str, name: &str) -> Result<HeaderValue, Precondition> {
    HeaderValue::from_str(value).map_err(|_| Precondition::InvalidHeader(name.to_string()))
}
