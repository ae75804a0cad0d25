//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The private key is read from SOLID_PRIVATE_KEY or private_key_file and
//! is never stored in the TOML directly.

use common::Secret;
use serde::Deserialize;
use solid_auth::SolidCredsConfiguration;
use solid_pod::UploadMethod;
use std::path::{Path, PathBuf};
use url::Url;

/// Env var holding the private key PEM
pub const PRIVATE_KEY_ENV: &str = "SOLID_PRIVATE_KEY";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub pod: PodConfig,
    pub keys: KeysConfig,
    pub credentials: CredentialsConfig,
}

/// Pod connection settings
#[derive(Debug, Deserialize)]
pub struct PodConfig {
    pub storage_root: Url,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(rename = "upload_method", default = "default_upload_method")]
    upload_method_name: String,
    #[serde(skip)]
    pub upload_method: UploadMethod,
}

/// Proof key files
#[derive(Debug, Deserialize)]
pub struct KeysConfig {
    #[serde(default)]
    pub public_key_file: Option<PathBuf>,
    #[serde(default)]
    pub private_key_file: Option<PathBuf>,
    pub jwk_file: PathBuf,
    #[serde(skip)]
    pub private_key: Option<Secret<String>>,
}

/// Where credentials are persisted
#[derive(Debug, Deserialize)]
pub struct CredentialsConfig {
    pub store_path: PathBuf,
    pub account_id: String,
}

fn default_timeout() -> u64 {
    30
}

fn default_upload_method() -> String {
    "put".into()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Private key resolution order:
    /// 1. SOLID_PRIVATE_KEY env var
    /// 2. private_key_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !matches!(config.pod.storage_root.scheme(), "http" | "https") {
            return Err(common::Error::Config(format!(
                "storage_root must be an http(s) URL, got: {}",
                config.pod.storage_root
            )));
        }

        if config.pod.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        config.pod.upload_method = config
            .pod
            .upload_method_name
            .parse()
            .map_err(common::Error::Config)?;

        if config.credentials.account_id.trim().is_empty() {
            return Err(common::Error::Config("account_id must not be empty".into()));
        }

        // Resolve private key: env var takes precedence over file
        if let Ok(key) = std::env::var(PRIVATE_KEY_ENV) {
            config.keys.private_key = Some(Secret::new(key));
        } else if let Some(ref key_file) = config.keys.private_key_file {
            let key = std::fs::read_to_string(key_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read private_key_file {}: {e}",
                    key_file.display()
                ))
            })?;
            if !key.trim().is_empty() {
                config.keys.private_key = Some(Secret::new(key));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or SOLID_POD_CONFIG env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("SOLID_POD_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("solid-pod.toml")
    }
}

impl KeysConfig {
    /// Read the key files into the credential configuration.
    pub fn credentials_configuration(&self) -> common::Result<SolidCredsConfiguration> {
        let private_key = self.private_key.clone().ok_or_else(|| {
            common::Error::MissingSecret(format!(
                "private key: set {PRIVATE_KEY_ENV} or keys.private_key_file"
            ))
        })?;
        let jwk = read_key_file(&self.jwk_file, "jwk_file")?;
        let public_key = match &self.public_key_file {
            Some(path) => Some(read_key_file(path, "public_key_file")?),
            None => None,
        };
        Ok(SolidCredsConfiguration {
            public_key,
            private_key: Some(private_key),
            jwk: Some(jwk),
        })
    }
}

fn read_key_file(path: &Path, field: &str) -> common::Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        common::Error::Config(format!("failed to read {field} {}: {e}", path.display()))
    })
}
