//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// OAuth 2.0 token cache - obtain, refresh and inspect cached tokens
#[derive(Parser, Debug)]
#[command(name = "oauth-tokens")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "OAUTH_TOKENS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Token snapshot file (overrides `store.path`)
    #[arg(long, env = "OAUTH_TOKENS_STORE", global = true)]
    pub store: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "warn",
        env = "OAUTH_TOKENS_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "OAUTH_TOKENS_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the authorization URL for a configured client
    AuthorizeUrl {
        /// Client ID from the `clients` section
        client_id: String,

        /// Opaque state echoed back on the redirect
        #[arg(long)]
        state: Option<String>,

        /// Scope (overrides the configured one)
        #[arg(long)]
        scope: Option<String>,
    },

    /// Exchange an authorization code and cache the token
    Exchange {
        /// Client ID from the `clients` section
        client_id: String,

        /// Code received on the redirect
        code: String,

        /// Print the token without caching it
        #[arg(long)]
        no_store: bool,
    },

    /// Force a refresh of a cached token
    Refresh {
        /// Client ID of the cached token
        client_id: String,

        /// Narrower scope to request
        #[arg(long)]
        scope: Option<String>,
    },

    /// Print a cached token, refreshing it first if it is due
    Token {
        /// Client ID of the cached token
        client_id: String,

        /// Print the `Authorization` header value instead of JSON
        #[arg(long)]
        header: bool,
    },

    /// List cached tokens
    List {
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Remove a cached token
    Remove {
        /// Client ID of the cached token
        client_id: String,
    },
}
