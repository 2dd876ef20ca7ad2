//! Configuration management

use std::{collections::HashMap, env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::oauth::{AuthorizationRequest, RefreshPolicy, SnapshotFile};
use crate::{Error, Result};

/// Environment variable prefix; `__` separates nested keys
pub const ENV_PREFIX: &str = "OAUTH_TOKENS_";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Refresh policy
    pub refresh: RefreshConfig,
    /// HTTP client used for OAuth endpoints
    pub http: HttpConfig,
    /// Token snapshot file
    pub store: StoreConfig,
    /// Registered OAuth clients, keyed by client ID
    pub clients: HashMap<String, ClientConfig>,
}

/// Refresh policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Refresh this long before a token expires
    #[serde(with = "humantime_serde")]
    pub delta: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            delta: RefreshPolicy::DEFAULT_REFRESH_DELTA,
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whole-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Connection timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// `User-Agent` header
    pub user_agent: String,
    /// Redirects to follow; 0 hands redirects back to the caller
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            max_redirects: 0,
        }
    }
}

/// Token snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// Snapshot file; defaults to ~/.oauth-tokens/tokens.json
    pub path: Option<PathBuf>,
}

/// One registered OAuth client
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Client secret (supports `${VAR}` expansion)
    pub client_secret: String,
    /// Authorization endpoint
    pub authorization_endpoint: String,
    /// Token endpoint
    pub token_endpoint: String,
    /// Redirect URI registered with the provider
    pub redirect_uri: Option<String>,
    /// Default scope
    pub scope: Option<String>,
    /// Send client credentials as HTTP Basic instead of form fields
    pub basic_auth: bool,
}

impl ClientConfig {
    /// Authorization request for `client_id` with this client's defaults
    pub fn authorization_request(&self, client_id: &str) -> AuthorizationRequest {
        AuthorizationRequest {
            authorization_url: self.authorization_endpoint.clone(),
            client_id: client_id.to_string(),
            redirect_uri: self.redirect_uri.clone(),
            scope: self.scope.clone(),
            ..AuthorizationRequest::default()
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (OAUTH_TOKENS_ prefix)
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::from_figment(figment)
    }

    /// Extract and post-process configuration from a prepared figment
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        // Expand ${VAR} in client settings
        config.expand_env_vars();

        Ok(config)
    }

    /// Settings for a registered client
    pub fn client(&self, client_id: &str) -> Result<&ClientConfig> {
        self.clients
            .get(client_id)
            .ok_or_else(|| Error::Config(format!("Unknown client: {client_id}")))
    }

    /// Refresh policy from the `refresh` section
    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy::new(self.refresh.delta)
    }

    /// Snapshot file from the `store` section, or the default location
    pub fn snapshot_file(&self) -> Result<SnapshotFile> {
        match &self.store.path {
            Some(path) => Ok(SnapshotFile::new(path)),
            None => SnapshotFile::default_location(),
        }
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) {
        // Pattern: ${VAR} or ${VAR:-default}
        #[allow(clippy::unwrap_used)]
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();

        for client in self.clients.values_mut() {
            client.client_secret = Self::expand_string(&re, &client.client_secret);
            client.authorization_endpoint = Self::expand_string(&re, &client.authorization_endpoint);
            client.token_endpoint = Self::expand_string(&re, &client.token_endpoint);
        }

        if let Some(path) = &self.store.path {
            let expanded = expand_home(&Self::expand_string(&re, &path.to_string_lossy()));
            self.store.path = Some(PathBuf::from(expanded));
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

fn expand_home(path_str: &str) -> String {
    if path_str.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path_str.replacen('~', &home.display().to_string(), 1);
        }
    }
    path_str.to_string()
}
