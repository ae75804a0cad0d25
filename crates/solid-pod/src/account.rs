//! Solid pod as a host account and storage backend
//!
//! `SolidAccount` wraps a `PodSession` and implements the host-facing
//! `Account` and `CloudStorage` traits, so the host can hold it as
//! `Arc<dyn CloudStorage>` next to other backends.

use std::sync::Weak;

use bytes::Bytes;
use cloud_storage::{
    Account, BoxFuture, CloudStorage, DownloadResult, FileNameOptions, StorageError, UploadResult,
};
use solid_auth::{
    ACCOUNT_SCHEME, AccountDelegate, CredentialState, ProofTokenSigner, TokenRefresher,
};
use tracing::debug;

use crate::error::Error;
use crate::request::RequestExecutor;
use crate::resources::UploadMethod;
use crate::session::PodSession;

type StorageResult<T> = cloud_storage::Result<T>;

/// A Solid account: credentials plus pod access.
pub struct SolidAccount {
    session: PodSession,
}

impl SolidAccount {
    /// Account using `client` for both the pod and the token endpoint.
    pub fn new(client: reqwest::Client, state: CredentialState) -> Self {
        Self::builder(client).build(state)
    }

    pub fn builder(client: reqwest::Client) -> SolidAccountBuilder {
        SolidAccountBuilder {
            client,
            signer: ProofTokenSigner::new(),
            delegate: None,
            upload_method: UploadMethod::default(),
        }
    }

    pub fn session(&self) -> &PodSession {
        &self.session
    }
}

/// Builds a `SolidAccount` with optional persistence and signing overrides.
pub struct SolidAccountBuilder {
    client: reqwest::Client,
    signer: ProofTokenSigner,
    delegate: Option<Weak<dyn AccountDelegate>>,
    upload_method: UploadMethod,
}

impl SolidAccountBuilder {
    pub fn signer(mut self, signer: ProofTokenSigner) -> Self {
        self.signer = signer;
        self
    }

    /// Persistence callback run after every token exchange. Held weakly.
    pub fn delegate(mut self, delegate: Weak<dyn AccountDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn upload_method(mut self, method: UploadMethod) -> Self {
        self.upload_method = method;
        self
    }

    pub fn build(self, state: CredentialState) -> SolidAccount {
        let executor = RequestExecutor::new(self.client.clone(), self.signer.clone());
        let mut refresher = TokenRefresher::new(self.client, self.signer);
        if let Some(delegate) = self.delegate {
            refresher = refresher.with_delegate(delegate);
        }
        let session =
            PodSession::new(state, executor, refresher).with_upload_method(self.upload_method);
        SolidAccount { session }
    }
}

impl Account for SolidAccount {
    fn scheme(&self) -> &'static str {
        ACCOUNT_SCHEME
    }

    fn to_json(&self) -> BoxFuture<'_, StorageResult<String>> {
        Box::pin(async move {
            self.session
                .state()
                .read()
                .await
                .to_json()
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
    }

    fn needs_token_generation<'a>(&'a self, db: Option<&'a Self>) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let db_state = match db {
                Some(db) => Some(db.session.snapshot().await),
                None => None,
            };
            self.session
                .state()
                .read()
                .await
                .needs_token_generation(db_state.as_ref())
        })
    }

    fn generate_tokens(&self) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            self.session.generate_tokens().await?;
            Ok(())
        })
    }

    fn merge<'a>(&'a self, newer: &'a Self) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if std::ptr::eq(self, newer) {
                return;
            }
            let newer = newer.session.snapshot().await;
            self.session.state().write().await.merge(&newer);
            debug!("merged newer credential snapshot");
        })
    }
}

impl CloudStorage for SolidAccount {
    fn upload_file<'a>(
        &'a self,
        name: &'a str,
        data: Bytes,
        options: &'a FileNameOptions,
    ) -> BoxFuture<'a, StorageResult<UploadResult>> {
        Box::pin(async move {
            let folder = options.require_folder()?;
            let mime_type = options.require_mime_type()?;

            self.session.ensure_directory_exists(folder).await?;
            self.session
                .upload_resource(name, Some(folder), data, &mime_type)
                .await?;
            // The pod reports no checksum
            Ok(UploadResult {
                checksum: String::new(),
            })
        })
    }

    fn download_file<'a>(
        &'a self,
        name: &'a str,
        options: &'a FileNameOptions,
    ) -> BoxFuture<'a, StorageResult<DownloadResult>> {
        Box::pin(async move {
            let folder = options.require_folder()?;
            match self.session.download_resource(name, Some(folder)).await {
                Ok(data) => Ok(DownloadResult::Success {
                    data,
                    checksum: String::new(),
                }),
                Err(Error::NotFound(_)) => Ok(DownloadResult::FileNotFound),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete_file<'a>(
        &'a self,
        name: &'a str,
        options: &'a FileNameOptions,
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let folder = options.require_folder()?;
            self.session.delete_resource(name, Some(folder)).await?;
            Ok(())
        })
    }

    fn lookup_file<'a>(
        &'a self,
        name: &'a str,
        options: &'a FileNameOptions,
    ) -> BoxFuture<'a, StorageResult<bool>> {
        Box::pin(async move {
            let folder = options.require_folder()?;
            let lookup = self.session.lookup_resource(name, Some(folder)).await?;
            Ok(lookup.is_found())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub;
    use cloud_storage::MemoryStorage;
    use solid_auth::{CodeParameters, MemoryStore, StoreDelegate, TokenEndpointAuthMethod};
    use std::sync::Arc;
    use url::Url;

    fn account(stub: &stub::StubPod) -> SolidAccount {
        SolidAccount::new(reqwest::Client::new(), stub::credential_state(stub))
    }

    fn text(folder: &str) -> FileNameOptions {
        FileNameOptions::new(folder).with_mime_type("text/plain")
    }

    #[tokio::test]
    async fn upload_creates_folder_then_file() {
        let stub = stub::spawn().await;
        let account = account(&stub);

        let result = account
            .upload_file("a.txt", Bytes::from_static(b"Hello, World!"), &text("D"))
            .await
            .unwrap();
        assert_eq!(result.checksum, "");
        assert!(stub.has_container("D"));
        assert_eq!(
            stub.resource("D/a.txt").unwrap(),
            ("text/plain".to_string(), Bytes::from_static(b"Hello, World!"))
        );

        let downloaded = account.download_file("a.txt", &text("D")).await.unwrap();
        assert_eq!(
            downloaded,
            DownloadResult::Success {
                data: Bytes::from_static(b"Hello, World!"),
                checksum: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn second_upload_is_already_exists() {
        let stub = stub::spawn().await;
        let account = account(&stub);
        let options = text("D");

        account
            .upload_file("a.txt", Bytes::from_static(b"1"), &options)
            .await
            .unwrap();
        let err = account
            .upload_file("a.txt", Bytes::from_static(b"2"), &options)
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::AlreadyExists("D/a.txt".into()));
        assert_eq!(stub.resource("D/a.txt").unwrap().1, Bytes::from_static(b"1"));
    }

    #[tokio::test]
    async fn upload_requires_folder_and_mime_type() {
        let stub = stub::spawn().await;
        let account = account(&stub);

        let err = account
            .upload_file("a.txt", Bytes::new(), &FileNameOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::MissingFolder);

        let err = account
            .upload_file("a.txt", Bytes::new(), &FileNameOptions::new("D"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidMimeType(_)));
        assert!(stub.hits().is_empty());
    }

    #[tokio::test]
    async fn missing_file_downloads_as_file_not_found() {
        let stub = stub::spawn().await;
        let account = account(&stub);

        let result = account.download_file("none.txt", &text("D")).await.unwrap();
        assert_eq!(result, DownloadResult::FileNotFound);
    }

    #[tokio::test]
    async fn lookup_and_delete_file() {
        let stub = stub::spawn().await;
        let account = account(&stub);
        stub.put_container("D");
        stub.put_resource("D/a.txt", "text/plain", b"x");

        assert!(account.lookup_file("a.txt", &text("D")).await.unwrap());
        account.delete_file("a.txt", &text("D")).await.unwrap();
        assert!(!account.lookup_file("a.txt", &text("D")).await.unwrap());

        let err = account.delete_file("a.txt", &text("D")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn rejected_refresh_is_unauthorized() {
        let stub = stub::spawn().await;
        let account = account(&stub);
        stub.reject_refresh();
        stub.reject_next(1);

        let err = account.lookup_file("a.txt", &text("D")).await.unwrap_err();
        assert!(matches!(err, StorageError::Unauthorized(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn backends_share_one_interface() {
        let stub = stub::spawn().await;
        let backends: Vec<Arc<dyn CloudStorage>> =
            vec![Arc::new(account(&stub)), Arc::new(MemoryStorage::new())];

        for backend in backends {
            let options = text("Shared");
            backend
                .upload_file("n.txt", Bytes::from_static(b"same"), &options)
                .await
                .unwrap();
            assert!(backend.lookup_file("n.txt", &options).await.unwrap());
            assert!(matches!(
                backend.upload_file("n.txt", Bytes::new(), &options).await,
                Err(StorageError::AlreadyExists(_))
            ));
        }
    }

    #[tokio::test]
    async fn refresh_persists_through_delegate() {
        let stub = stub::spawn().await;
        let store = Arc::new(StoreDelegate::new(Arc::new(MemoryStore::new()), "default"));
        let delegate: Arc<dyn AccountDelegate> = store.clone();
        let account = SolidAccount::builder(reqwest::Client::new())
            .delegate(Arc::downgrade(&delegate))
            .build(stub::credential_state(&stub));
        stub.reject_next(1);

        assert!(!account.lookup_file("a.txt", &text("D")).await.unwrap());

        let saved = store.load("alice").await.unwrap().unwrap();
        assert_eq!(saved.access_token(), Some("T1"));
        assert_eq!(saved.refresh_token(), Some("R1"));
        let json = account.to_json().await.unwrap();
        assert!(json.contains("\"accessToken\":\"T1\""));
    }

    #[tokio::test]
    async fn merge_takes_newer_tokens() {
        let stub = stub::spawn().await;
        let older = account(&stub);
        let newer = SolidAccount::new(
            reqwest::Client::new(),
            CredentialState::default().with_tokens(Some("T2".into()), None),
        );

        older.merge(&newer).await;
        let state = older.session().snapshot().await;
        assert_eq!(state.access_token(), Some("T2"));
        assert_eq!(state.refresh_token(), Some("R0"));
        // keys stay with the older account
        assert!(state.jwk().is_some());

        older.merge(&older).await;
        assert_eq!(older.session().snapshot().await.access_token(), Some("T2"));
    }

    #[tokio::test]
    async fn token_generation_follows_pending_code() {
        let stub = stub::spawn().await;
        let code = |c: &str| CodeParameters {
            token_endpoint: Url::parse(&stub.token_endpoint).unwrap(),
            code: c.into(),
            code_verifier: "v".into(),
            redirect_uri: "https://app.example/cb".into(),
            client_id: "app".into(),
            client_secret: None,
            authentication_method: TokenEndpointAuthMethod::None,
            storage_iri: None,
        };
        let fresh = SolidAccount::new(
            reqwest::Client::new(),
            solid_auth::testing::credential_state().with_code_parameters(code("c1")),
        );
        let stored_same = SolidAccount::new(
            reqwest::Client::new(),
            CredentialState::default().with_code_parameters(code("c1")),
        );
        let stored_other = SolidAccount::new(
            reqwest::Client::new(),
            CredentialState::default().with_code_parameters(code("c0")),
        );

        assert!(fresh.needs_token_generation(None).await);
        assert!(!fresh.needs_token_generation(Some(&stored_same)).await);
        assert!(fresh.needs_token_generation(Some(&stored_other)).await);
        assert!(!account(&stub).needs_token_generation(None).await);
        assert_eq!(fresh.scheme(), "solid");
    }
}
