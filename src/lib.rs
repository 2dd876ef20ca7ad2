//! OAuth 2.0 Token Cache
//!
//! Keeps OAuth 2.0 access tokens per client and hands out a fresh one on
//! every read.
//!
//! # Features
//!
//! - **Refresh-on-read**: tokens close to expiry are refreshed before they are returned
//! - **Coalesced refresh**: concurrent readers of one client share a single token request
//! - **Fail-open**: a failed refresh keeps serving the previous token
//! - **Authorization code flow**: authorization URLs and code exchange (RFC 6749 §4.1)
//! - **Pluggable transport**: reqwest by default, any [`transport::Transport`] in tests
//! - **Response formats**: JSON, XML and form-encoded token responses
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use oauth_token_cache::{OAuthFlowClient, OAuthToken, TokenManager, config::HttpConfig, transport::ReqwestTransport};
//!
//! # async fn run() -> oauth_token_cache::Result<()> {
//! let transport = ReqwestTransport::new(&HttpConfig::default())?;
//! let manager = TokenManager::new(OAuthFlowClient::new(Arc::new(transport)));
//!
//! manager.add(
//!     "my-client",
//!     "my-secret",
//!     "https://auth.example/token",
//!     OAuthToken::bearer("at").with_expires_in(3600).with_refresh_token("rt"),
//! );
//!
//! if let Some(token) = manager.get("my-client").await {
//!     println!("{}", token.authorization_header());
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod oauth;
pub mod transport;

pub use error::{Error, ErrorKind, Result};
pub use oauth::{
    AuthorizationCodeRequest, AuthorizationRequest, OAuthFlowClient, OAuthToken, OAuthTokenError,
    RefreshPolicy, RefreshTokenRequest, TokenManager, TokenRecord, TokenStore,
};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so command output stays pipeable
    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| Error::Config(e.to_string()))?;
        }
        _ => {
            subscriber
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| Error::Config(e.to_string()))?;
        }
    }

    Ok(())
}
