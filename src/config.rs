//! # Configuration for cloudcp
//!
//! Settings live in a small TOML file (`config.toml` under the user's
//! config directory) with an `[api]` table describing how to reach the
//! platform and a `[transfer]` table tuning the copy engine. Environment
//! variables override the file; command-line flags override both (that
//! last step happens in the commands).

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::uri::UriContext;

/// Name of the directory holding `config.toml`.
pub const APP_NAME: &str = "cloudcp";

/// Ignore file consulted in every source directory unless configured otherwise.
pub const DEFAULT_IGNORE_FILE: &str = ".cloudcpignore";

/// Connection settings for the platform API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the platform API.
    pub url: Option<String>,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Cluster used for short `storage:` and `blob:` URIs.
    pub cluster: String,
    /// User name; taken from the token when missing.
    pub user: Option<String>,
    /// Storage endpoint; derived from `url` and `cluster` when missing.
    pub storage_url: Option<String>,
    /// Bucket endpoint; derived from `url` and `cluster` when missing.
    pub blob_url: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            url: None,
            token: None,
            cluster: "default".to_string(),
            user: None,
            storage_url: None,
            blob_url: None,
        }
    }
}

/// Transfer engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Number of worker threads.
    pub concurrency: usize,
    /// Ignore file names read from every source directory.
    pub ignore_files: Vec<String>,
    /// Per-request timeout; unlimited when unset.
    pub timeout_secs: Option<u64>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            concurrency: 8,
            ignore_files: vec![DEFAULT_IGNORE_FILE.to_string()],
            timeout_secs: None,
        }
    }
}

/// Representation of the full `config.toml` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub transfer: TransferConfig,
    /// Where the settings were read from, if a file existed.
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load the configuration and apply environment overrides.
    ///
    /// # Arguments
    /// * `path_override` - Explicit config file; must exist when given.
    ///
    /// # Errors
    /// Returns an error if:
    /// - An explicitly requested file is missing or unreadable.
    /// - TOML parsing fails.
    /// - The resulting settings are invalid.
    pub fn load(path_override: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os("CLOUDCP_CONFIG").map(PathBuf::from);
        let explicit = path_override.map(Path::to_path_buf).or(env_path);

        let mut config = match explicit {
            Some(path) => Self::read(&path)?,
            None => match default_path() {
                Some(path) if path.exists() => Self::read(&path)?,
                _ => Config::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a config file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;

        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse TOML from {}", path.as_ref().display()))?;
        config.path = Some(path.as_ref().to_path_buf());
        Ok(config)
    }

    /// Parse settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Overlay `CLOUDCP_*` variables looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("CLOUDCP_API_URL") {
            self.api.url = Some(url);
        }
        if let Some(token) = lookup("CLOUDCP_TOKEN") {
            self.api.token = Some(token);
        }
        if let Some(cluster) = lookup("CLOUDCP_CLUSTER") {
            self.api.cluster = cluster;
        }
        if let Some(user) = lookup("CLOUDCP_USER") {
            self.api.user = Some(user);
        }
    }

    /// Check the settings for values the engine cannot work with.
    ///
    /// # Errors
    /// Returns an error for malformed API URLs or a zero concurrency.
    pub fn validate(&self) -> Result<()> {
        if self.transfer.concurrency == 0 {
            anyhow::bail!("transfer.concurrency must be at least 1");
        }
        for url in [&self.api.url, &self.api.storage_url, &self.api.blob_url]
            .into_iter()
            .flatten()
        {
            validate_api_url(url)?;
        }
        Ok(())
    }

    /// True when both API URL and token are known.
    pub fn is_remote_configured(&self) -> bool {
        self.api.url.is_some() && self.api.token.is_some()
    }

    /// The user name, explicit or taken from the token.
    pub fn user(&self) -> Option<String> {
        self.api
            .user
            .clone()
            .or_else(|| self.api.token.as_deref().and_then(user_from_token))
    }

    /// Platform storage endpoint.
    ///
    /// # Errors
    /// Returns an error if neither `storage_url` nor `url` is configured.
    pub fn storage_url(&self) -> Result<Url> {
        self.endpoint(self.api.storage_url.as_deref(), "storage")
    }

    /// Object bucket endpoint.
    ///
    /// # Errors
    /// Returns an error if neither `blob_url` nor `url` is configured.
    pub fn blob_url(&self) -> Result<Url> {
        self.endpoint(self.api.blob_url.as_deref(), "blob")
    }

    /// Context for expanding short URIs typed by the user.
    pub fn uri_context(&self) -> Result<UriContext> {
        let user = self.user();
        UriContext::from_env(&self.api.cluster, user.as_deref()).context("Failed to resolve working directory")
    }

    fn endpoint(&self, explicit: Option<&str>, service: &str) -> Result<Url> {
        if let Some(url) = explicit {
            return validate_api_url(url);
        }
        let base = self
            .api
            .url
            .as_deref()
            .with_context(|| format!("No {service} endpoint: set api.url in the config"))?;
        let mut url = validate_api_url(base)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("API URL cannot be a base: {base}"))?
            .pop_if_empty()
            .push(service)
            .push(&self.api.cluster);
        Ok(url)
    }
}

/// Default location of `config.toml`.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
}

/// Extract the user name from a JWT bearer token.
///
/// The payload's `identity` claim is preferred, `sub` is the fallback.
/// Returns `None` for tokens that are not JWTs.
pub fn user_from_token(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    ["identity", "sub"]
        .iter()
        .find_map(|claim| claims.get(claim).and_then(|value| value.as_str()))
        .map(str::to_string)
}

/// Validate that an API URL is well-formed and uses `http` or `https`.
///
/// # Errors
/// Returns an error if the URL is malformed or uses another scheme.
fn validate_api_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).with_context(|| format!("Failed to parse URL: {url}"))?;

    if !["http", "https"].contains(&parsed.scheme()) {
        anyhow::bail!("Unsupported scheme: {}", parsed.scheme());
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn token_with(claims: &str) -> String {
        format!("e30.{}.sig", URL_SAFE_NO_PAD.encode(claims))
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.api.cluster, "default");
        assert_eq!(config.transfer.concurrency, 8);
        assert_eq!(config.transfer.ignore_files, vec![DEFAULT_IGNORE_FILE]);
        assert!(!config.is_remote_configured());
    }

    #[test]
    fn endpoints_derive_from_api_url() {
        let config = Config::from_toml_str(
            r#"
            [api]
            url = "https://api.example.com/api/v1"
            token = "t"
            cluster = "eu"
            blob_url = "https://blobs.example.com/b"
            "#,
        )
        .unwrap();

        assert!(config.is_remote_configured());
        assert_eq!(
            config.storage_url().unwrap().as_str(),
            "https://api.example.com/api/v1/storage/eu"
        );
        assert_eq!(config.blob_url().unwrap().as_str(), "https://blobs.example.com/b");
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::from_toml_str("[api]\ncluster = \"a\"\n").unwrap();
        let env: HashMap<&str, &str> =
            HashMap::from([("CLOUDCP_CLUSTER", "b"), ("CLOUDCP_TOKEN", "secret")]);
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api.cluster, "b");
        assert_eq!(config.api.token.as_deref(), Some("secret"));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let config = Config::from_toml_str("[api]\nurl = \"ftp://x\"\n").unwrap();
        assert!(config.validate().is_err());

        let config = Config::from_toml_str("[transfer]\nconcurrency = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn user_comes_from_token_claims() {
        assert_eq!(
            user_from_token(&token_with(r#"{"identity":"alice","sub":"x"}"#)).as_deref(),
            Some("alice")
        );
        assert_eq!(user_from_token(&token_with(r#"{"sub":"bob"}"#)).as_deref(), Some("bob"));
        assert_eq!(user_from_token("opaque-token"), None);

        let mut config = Config::default();
        config.api.token = Some(token_with(r#"{"sub":"bob"}"#));
        assert_eq!(config.user().as_deref(), Some("bob"));
        config.api.user = Some("carol".into());
        assert_eq!(config.user().as_deref(), Some("carol"));
    }

    #[test]
    fn opaque_token_leaves_storage_short_forms_unresolved() {
        let config = Config::from_toml_str(
            "[api]\nurl = \"https://api.example.com\"\ntoken = \"opaque-token\"\n",
        )
        .unwrap();
        let ctx = config.uri_context().unwrap();
        assert_eq!(ctx.user, None);
        assert!(crate::uri::parse("storage:data", &ctx).is_err());
        assert_eq!(
            crate::uri::parse("storage:/alice/data", &ctx).unwrap().as_str(),
            "storage://default/alice/data"
        );
    }
}
