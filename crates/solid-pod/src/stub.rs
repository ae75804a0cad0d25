//! In-process Solid pod and token endpoint for tests.
//!
//! Verifies every DPoP proof against the JWK in its header, checks `htu`
//! against the URL the request actually arrived on, and only accepts
//! access tokens it issued. Refresh tokens rotate on every use.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::Form;
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, LINK};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use common::Secret;
use solid_auth::testing;
use solid_auth::{
    Clock, CredentialState, ProofClaims, ProofTokenSigner, RefreshParameters, ServerParameters,
    SystemClock, TokenEndpointAuthMethod, TokenRefresher,
};
use tokio::net::TcpListener;
use url::Url;

use crate::request::RequestExecutor;
use crate::resources::RESOURCE_LINK;
use crate::session::PodSession;

const CONTAINER_LINKS: &str = r#"<http://www.w3.org/ns/ldp#Container>; rel="type", <http://www.w3.org/ns/ldp#BasicContainer>; rel="type", <http://www.w3.org/ns/ldp#Resource>; rel="type""#;

/// One request the pod saw, with the status it answered.
#[derive(Debug, Clone)]
pub(crate) struct Hit {
    pub method: Method,
    pub path: String,
    pub status: u16,
    pub headers: HeaderMap,
}

impl Hit {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

struct Reply {
    status: u16,
    link: Option<String>,
    content_type: Option<String>,
    body: Bytes,
}

impl Reply {
    fn status(status: u16) -> Self {
        Self {
            status,
            link: None,
            content_type: None,
            body: Bytes::new(),
        }
    }

    fn with_link(mut self, link: &str) -> Self {
        self.link = Some(link.to_string());
        self
    }
}

#[derive(Default)]
struct PodState {
    containers: HashSet<String>,
    /// key -> (content type, data)
    resources: HashMap<String, (String, Bytes)>,
    overrides: HashMap<String, (u16, Option<String>)>,
    access_token: Option<String>,
    refresh_token: String,
    issued: u32,
    token_calls: usize,
    reject_next: u32,
    reject_refresh: bool,
    hits: Vec<Hit>,
    proofs: Vec<ProofClaims>,
    proof_errors: Vec<String>,
    authorizations: Vec<String>,
}

pub(crate) struct StubPod {
    /// Storage root, with trailing slash
    pub base: String,
    pub token_endpoint: String,
    origin: String,
    host: String,
    state: Mutex<PodState>,
}

pub(crate) async fn spawn() -> Arc<StubPod> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stub = Arc::new(StubPod {
        base: format!("http://{addr}/"),
        token_endpoint: format!("http://{addr}/token"),
        origin: format!("http://{addr}"),
        host: addr.to_string(),
        state: Mutex::new(PodState {
            access_token: Some("T0".into()),
            refresh_token: "R0".into(),
            ..PodState::default()
        }),
    });
    let app = axum::Router::new()
        .route("/token", axum::routing::post(token_handler))
        .fallback(pod_handler)
        .with_state(stub.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    stub
}

/// Credentials the stub accepts: fixture keys, tokens `T0`/`R0`.
pub(crate) fn credential_state(stub: &StubPod) -> CredentialState {
    testing::credential_state()
        .with_tokens(Some("T0".into()), Some("R0".into()))
        .with_refresh_parameters(RefreshParameters::Server(ServerParameters {
            token_endpoint: Url::parse(&stub.token_endpoint).unwrap(),
            client_id: "pod-client".into(),
            client_secret: Some(Secret::new("pod-secret".into())),
            authentication_method: TokenEndpointAuthMethod::ClientSecretBasic,
            exchanged_code: None,
        }))
        .with_account_id("alice")
        .with_storage_root(Url::parse(&stub.base).unwrap())
}

pub(crate) fn session(stub: &StubPod) -> PodSession {
    session_with_clock(stub, Arc::new(SystemClock), None)
}

pub(crate) fn session_with_clock(
    stub: &StubPod,
    clock: Arc<dyn Clock>,
    expires_at: Option<i64>,
) -> PodSession {
    let signer = ProofTokenSigner::new().with_clock(clock);
    let client = reqwest::Client::new();
    let mut state = credential_state(stub);
    if let Some(expires_at) = expires_at {
        state = state.with_expires_at(expires_at);
    }
    PodSession::new(
        state,
        RequestExecutor::new(client.clone(), signer.clone()),
        TokenRefresher::new(client, signer),
    )
}

/// Percent-encoded key for a `/`-separated name, as it appears in URLs.
fn encode_key(name: &str) -> String {
    let mut url = Url::parse("http://stub.invalid/").unwrap();
    url.path_segments_mut()
        .unwrap()
        .pop_if_empty()
        .extend(name.split('/').filter(|p| !p.is_empty()));
    url.path().trim_matches('/').to_string()
}

fn parent_of(key: &str) -> &str {
    key.rsplit_once('/').map_or("", |(parent, _)| parent)
}

impl StubPod {
    pub fn put_container(&self, name: &str) {
        let key = encode_key(name);
        self.state.lock().unwrap().containers.insert(key);
    }

    pub fn put_resource(&self, name: &str, content_type: &str, data: &[u8]) {
        let key = encode_key(name);
        self.state
            .lock()
            .unwrap()
            .resources
            .insert(key, (content_type.to_string(), Bytes::copy_from_slice(data)));
    }

    pub fn has_container(&self, name: &str) -> bool {
        self.state.lock().unwrap().containers.contains(&encode_key(name))
    }

    pub fn resource(&self, name: &str) -> Option<(String, Bytes)> {
        self.state.lock().unwrap().resources.get(&encode_key(name)).cloned()
    }

    /// Answer requests for `name` with `status` and optional `Link`.
    pub fn override_status(&self, name: &str, status: u16, link: Option<&str>) {
        self.state
            .lock()
            .unwrap()
            .overrides
            .insert(encode_key(name), (status, link.map(str::to_string)));
    }

    /// Answer the next `n` pod requests with 401.
    pub fn reject_next(&self, n: u32) {
        self.state.lock().unwrap().reject_next = n;
    }

    /// Stop accepting the current access token.
    pub fn expire_current_token(&self) {
        self.state.lock().unwrap().access_token = None;
    }

    /// Answer every refresh with `invalid_grant`.
    pub fn reject_refresh(&self) {
        self.state.lock().unwrap().reject_refresh = true;
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.state.lock().unwrap().hits.clone()
    }

    pub fn last_request(&self) -> Option<Hit> {
        self.state.lock().unwrap().hits.last().cloned()
    }

    pub fn last_proof(&self) -> Option<ProofClaims> {
        self.state.lock().unwrap().proofs.last().cloned()
    }

    pub fn proof_errors(&self) -> Vec<String> {
        self.state.lock().unwrap().proof_errors.clone()
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.state.lock().unwrap().authorizations.last().cloned()
    }

    pub fn token_calls(&self) -> usize {
        self.state.lock().unwrap().token_calls
    }

    fn handle(&self, method: &Method, path: &str, headers: &HeaderMap, body: Bytes) -> Reply {
        let mut state = self.state.lock().unwrap();
        let reply = self.respond(&mut state, method, path, headers, body);
        state.hits.push(Hit {
            method: method.clone(),
            path: path.to_string(),
            status: reply.status,
            headers: headers.clone(),
        });
        reply
    }

    fn respond(
        &self,
        state: &mut PodState,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Reply {
        let expected_htu = format!("{}{path}", self.origin);
        let proof = headers
            .get("dpop")
            .and_then(|v| v.to_str().ok())
            .and_then(testing::verify_proof);
        match proof {
            Some((_, claims)) if claims.htu == expected_htu && claims.htm == method.as_str() => {
                state.proofs.push(claims);
            }
            Some((_, claims)) => {
                state.proof_errors.push(format!(
                    "proof for {} {} on {method} {expected_htu}",
                    claims.htm, claims.htu
                ));
                return Reply::status(400);
            }
            None => {
                state.proof_errors.push(format!("no valid proof on {method} {path}"));
                return Reply::status(400);
            }
        }

        let host = headers.get("host").and_then(|v| v.to_str().ok());
        if host != Some(self.host.as_str()) {
            state.proof_errors.push(format!("host {host:?} on {method} {path}"));
            return Reply::status(400);
        }

        let authorization = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        state.authorizations.push(authorization.clone());
        if state.reject_next > 0 {
            state.reject_next -= 1;
            return Reply::status(401);
        }
        let accepted = state
            .access_token
            .as_ref()
            .is_some_and(|token| authorization == format!("DPoP {token}"));
        if !accepted {
            return Reply::status(401);
        }

        let key = path.trim_matches('/').to_string();
        if let Some((status, link)) = state.overrides.get(&key) {
            let mut reply = Reply::status(*status);
            reply.link = link.clone();
            return reply;
        }

        match *method {
            Method::HEAD | Method::GET => state.read(&key, *method == Method::GET),
            Method::POST => state.create(&key, headers, body),
            Method::PUT => state.write(&key, headers, body),
            Method::DELETE => state.delete(&key),
            _ => Reply::status(405),
        }
    }
}

impl PodState {
    fn is_container(&self, key: &str) -> bool {
        key.is_empty() || self.containers.contains(key)
    }

    fn read(&self, key: &str, with_body: bool) -> Reply {
        if self.is_container(key) {
            let mut reply = Reply::status(200).with_link(CONTAINER_LINKS);
            reply.content_type = Some("text/turtle".into());
            return reply;
        }
        match self.resources.get(key) {
            Some((content_type, data)) => {
                let mut reply = Reply::status(200).with_link(RESOURCE_LINK);
                reply.content_type = Some(content_type.clone());
                if with_body {
                    reply.body = data.clone();
                }
                reply
            }
            None => Reply::status(404),
        }
    }

    fn create(&mut self, key: &str, headers: &HeaderMap, body: Bytes) -> Reply {
        if !self.is_container(key) {
            return Reply::status(404);
        }
        let slug = headers
            .get("slug")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unnamed");
        let child = if key.is_empty() {
            encode_key(slug)
        } else {
            format!("{key}/{}", encode_key(slug))
        };
        let link = headers
            .get("link")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if link.contains("#BasicContainer") {
            self.containers.insert(child);
        } else {
            let content_type = content_type(headers);
            self.resources.insert(child, (content_type, body));
        }
        Reply::status(201)
    }

    fn write(&mut self, key: &str, headers: &HeaderMap, body: Bytes) -> Reply {
        if key.is_empty() || self.containers.contains(key) {
            return Reply::status(405);
        }
        let mut parent = parent_of(key);
        while !parent.is_empty() {
            self.containers.insert(parent.to_string());
            parent = parent_of(parent);
        }
        let existed = self
            .resources
            .insert(key.to_string(), (content_type(headers), body))
            .is_some();
        Reply::status(if existed { 204 } else { 201 })
    }

    fn delete(&mut self, key: &str) -> Reply {
        if key.is_empty() {
            return Reply::status(405);
        }
        if self.resources.remove(key).is_some() {
            return Reply::status(205);
        }
        if !self.containers.contains(key) {
            return Reply::status(404);
        }
        let prefix = format!("{key}/");
        let has_children = self.containers.iter().any(|c| c.starts_with(&prefix))
            || self.resources.keys().any(|r| r.starts_with(&prefix));
        if has_children {
            return Reply::status(409);
        }
        self.containers.remove(key);
        Reply::status(205)
    }
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string()
}

async fn pod_handler(
    State(stub): State<Arc<StubPod>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let reply = stub.handle(&method, uri.path(), &headers, body);
    let mut response = (StatusCode::from_u16(reply.status).unwrap(), reply.body).into_response();
    if let Some(link) = reply.link {
        response
            .headers_mut()
            .insert(LINK, HeaderValue::from_str(&link).unwrap());
    }
    if let Some(content_type) = reply.content_type {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_str(&content_type).unwrap());
    }
    response
}

async fn token_handler(
    State(stub): State<Arc<StubPod>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let mut state = stub.state.lock().unwrap();
    state.token_calls += 1;

    let proof = headers
        .get("dpop")
        .and_then(|v| v.to_str().ok())
        .and_then(testing::verify_proof);
    let proof_ok = matches!(
        &proof,
        Some((_, claims)) if claims.htu == stub.token_endpoint && claims.htm == "POST"
    );
    if !proof_ok {
        state.proof_errors.push("bad proof at token endpoint".into());
        return (StatusCode::BAD_REQUEST, r#"{"error":"invalid_dpop_proof"}"#).into_response();
    }

    let presented = form.get("refresh_token").map(String::as_str);
    if state.reject_refresh
        || form.get("grant_type").map(String::as_str) != Some("refresh_token")
        || presented != Some(state.refresh_token.as_str())
    {
        return (StatusCode::BAD_REQUEST, r#"{"error":"invalid_grant"}"#).into_response();
    }

    state.issued += 1;
    let access_token = format!("T{}", state.issued);
    let refresh_token = format!("R{}", state.issued);
    state.access_token = Some(access_token.clone());
    state.refresh_token = refresh_token.clone();

    let body = serde_json::json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "expires_in": 3600,
        "token_type": "DPoP",
    });
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}
