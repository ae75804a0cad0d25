//! Command execution against the configured pod

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use cloud_storage::{Account, CloudStorage, DownloadResult, FileNameOptions};
use solid_auth::{
    AccountDelegate, CodeParameters, CredentialState, FileStore, KeyMaterial, StoreDelegate,
};
use solid_pod::SolidAccount;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::cli::Command;
use crate::config::Config;

/// An account wired to its credential store.
pub struct Pod {
    account: SolidAccount,
    account_id: String,
    // Keeps the account's weak delegate reference alive
    _delegate: Arc<dyn AccountDelegate>,
}

impl Pod {
    pub fn account(&self) -> &SolidAccount {
        &self.account
    }
}

/// Decode the account details handed to `login`.
pub fn login_parameters(command: &Command) -> Result<Option<CodeParameters>> {
    match command {
        Command::Login { details } => CodeParameters::from_base64(details)
            .map(Some)
            .context("decoding account details"),
        _ => Ok(None),
    }
}

/// Load the stored credential, attach the proof keys and build the account.
///
/// `login` replaces whatever is stored with a fresh authorization code,
/// which is exchanged before this returns.
pub async fn open(config: &Config, login: Option<CodeParameters>) -> Result<Pod> {
    let account_id = config.credentials.account_id.clone();
    let keys = KeyMaterial::from_configuration(&config.keys.credentials_configuration()?)
        .context("loading proof keys")?;

    let store = Arc::new(
        FileStore::load(config.credentials.store_path.clone())
            .await
            .context("opening credential store")?,
    );
    let delegate = Arc::new(StoreDelegate::new(store, account_id.clone()));
    let stored = delegate
        .load(&account_id)
        .await
        .context("reading stored credentials")?;

    let state = match (stored, login) {
        (_, Some(code)) => CredentialState::default().with_code_parameters(code),
        (Some(state), None) => state,
        (None, None) => {
            bail!("no credentials stored for account {account_id}; run `pod-cli login` first")
        }
    };
    let state = state
        .with_keys(keys)
        .with_account_id(account_id.clone())
        .with_storage_root(config.pod.storage_root.clone());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.pod.timeout_secs))
        .build()
        .context("building HTTP client")?;

    let delegate: Arc<dyn AccountDelegate> = delegate;
    let account = SolidAccount::builder(client)
        .delegate(Arc::downgrade(&delegate))
        .upload_method(config.pod.upload_method)
        .build(state);

    if account.session().snapshot().await.needs_initial_token_exchange() {
        info!(account_id = %account_id, "exchanging authorization code");
        account.generate_tokens().await?;
    }

    Ok(Pod {
        account,
        account_id,
        _delegate: delegate,
    })
}

pub async fn run(pod: &Pod, command: Command) -> Result<()> {
    let session = pod.account.session();

    match command {
        Command::Login { .. } => println!("logged in as {}", pod.account_id),
        Command::Refresh => {
            let outcome = session.refresh().await?;
            if outcome.refresh_token_rotated {
                println!("refreshed, refresh token rotated");
            } else {
                println!("refreshed");
            }
        }
        Command::Mkdir { name } => {
            if session.ensure_directory_exists(&name).await? {
                println!("created {name}");
            } else {
                println!("{name} already exists");
            }
        }
        Command::LookupDir { name } => {
            println!("{}", describe(session.lookup_directory(&name).await?.is_found()));
        }
        Command::Lookup { name, dir } => {
            let found = session.lookup_resource(&name, dir.as_deref()).await?;
            println!("{}", describe(found.is_found()));
        }
        Command::Upload {
            file,
            dir,
            name,
            mime,
        } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(String::from)
                    .context("upload path has no file name")?,
            };
            let mime = mime.unwrap_or_else(|| {
                mime_guess::from_path(&file)
                    .first_or_octet_stream()
                    .to_string()
            });
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;

            let options = FileNameOptions::new(dir.clone()).with_mime_type(mime);
            pod.account
                .upload_file(&name, Bytes::from(data), &options)
                .await?;
            println!("uploaded {dir}/{name}");
        }
        Command::Download { name, dir, out } => {
            let options = FileNameOptions::new(dir.clone());
            let data = match pod.account.download_file(&name, &options).await? {
                DownloadResult::Success { data, .. } => data,
                DownloadResult::FileNotFound => bail!("{dir}/{name} not found"),
            };
            match out {
                Some(path) => tokio::fs::write(&path, &data)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
            }
        }
        Command::Delete { name, dir } => {
            session.delete_resource(&name, dir.as_deref()).await?;
            println!("deleted {name}");
        }
    }
    Ok(())
}

fn describe(found: bool) -> &'static str {
    if found { "found" } else { "not found" }
}
