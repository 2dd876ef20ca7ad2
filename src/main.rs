//! oauth-tokens - OAuth 2.0 token cache command line
//!
//! Obtains tokens through the authorization code flow, keeps them in a
//! snapshot file and refreshes them when they are about to expire.

use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use tracing::{debug, error};

use oauth_token_cache::{
    AuthorizationCodeRequest, Error, OAuthFlowClient, OAuthToken, RefreshTokenRequest, Result,
    TokenManager,
    cli::{Cli, Command},
    config::Config,
    oauth::SnapshotFile,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "Command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    if let Command::AuthorizeUrl {
        client_id,
        state,
        scope,
    } = &cli.command
    {
        return authorize_url(&config, client_id, state.as_deref(), scope.as_deref());
    }

    let snapshot = match &cli.store {
        Some(path) => SnapshotFile::new(path),
        None => config.snapshot_file()?,
    };
    debug!(path = %snapshot.path().display(), "Using token snapshot");

    let manager = TokenManager::from_config(&config)?;
    manager.load(snapshot.load()?.into_iter().map(|record| {
        let basic_auth = record.basic_auth || config.clients.get(&record.client_id).is_some_and(|c| c.basic_auth);
        record.with_basic_auth(basic_auth)
    }));

    match cli.command {
        Command::AuthorizeUrl { .. } => Ok(()),
        Command::Exchange {
            client_id,
            code,
            no_store,
        } => {
            let client = config.client(&client_id)?;
            let mut request = AuthorizationCodeRequest::new(&client.token_endpoint, code, &client_id);
            if let Some(redirect_uri) = &client.redirect_uri {
                request = request.redirect_uri(redirect_uri);
            }
            request = if client.basic_auth {
                request.basic_auth(&client_id, &client.client_secret)
            } else {
                request.client_secret(&client.client_secret)
            };

            let token: OAuthToken = manager.token_from_authorization_code(&request, !no_store).await?;
            if !no_store {
                manager.save(|records| snapshot.save(&records))?;
            }
            print_json(&token)
        }
        Command::Refresh { client_id, scope } => {
            let record = manager
                .store()
                .get(&client_id)
                .ok_or_else(|| Error::Validation(format!("No cached token for {client_id}")))?;

            let mut request = RefreshTokenRequest::for_record(&record);
            if let Some(scope) = scope {
                request = request.scope(scope);
            }

            let token = manager.refresh_access_token(&request).await?;
            manager.save(|records| snapshot.save(&records))?;
            print_json(&*token)
        }
        Command::Token { client_id, header } => {
            let token = manager
                .get(&client_id)
                .await
                .ok_or_else(|| Error::Validation(format!("No cached token for {client_id}")))?;

            // The read may have refreshed the token
            manager.save(|records| snapshot.save(&records))?;

            if header {
                println!("{}", token.authorization_header());
                Ok(())
            } else {
                print_json(&*token)
            }
        }
        Command::List { format } => list(&manager, &format),
        Command::Remove { client_id } => {
            if manager.remove(&client_id) {
                manager.save(|records| snapshot.save(&records))?;
                println!("Removed {client_id}");
            } else {
                println!("No cached token for {client_id}");
            }
            Ok(())
        }
    }
}

fn authorize_url(config: &Config, client_id: &str, state: Option<&str>, scope: Option<&str>) -> Result<()> {
    let mut request = config.client(client_id)?.authorization_request(client_id);
    if let Some(state) = state {
        request = request.state(state);
    }
    if let Some(scope) = scope {
        request = request.scope(scope);
    }

    println!("{}", OAuthFlowClient::authorization_url(&request)?);
    Ok(())
}

fn list(manager: &TokenManager, format: &str) -> Result<()> {
    let mut records = manager.snapshot();
    records.sort_by(|a, b| a.client_id.cmp(&b.client_id));

    if format == "json" {
        let summary: Vec<_> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "client_id": r.client_id,
                    "token_endpoint": r.token_endpoint,
                    "token_type": r.token.effective_token_type(),
                    "issued_at": r.issued_at,
                    "expires_in": r.token.expires_in,
                    "has_refresh_token": r.token.usable_refresh_token().is_some(),
                })
            })
            .collect();
        return print_json(&summary);
    }

    if records.is_empty() {
        println!("No cached tokens.");
        return Ok(());
    }

    let now = Utc::now();
    println!("{:<24} {:<8} {:<14} REFRESHABLE", "CLIENT", "TYPE", "EXPIRES");
    for record in &records {
        let expires = match record.seconds_until_expiry(now) {
            None => "never".to_string(),
            Some(s) if s <= 0 => "expired".to_string(),
            Some(s) => format!("in {s}s"),
        };
        let refreshable = if record.token.usable_refresh_token().is_some() {
            "yes"
        } else {
            "no"
        };
        println!(
            "{:<24} {:<8} {:<14} {refreshable}",
            record.client_id,
            record.token.effective_token_type(),
            expires
        );
    }
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
