//! Token manager: cache + refresh-on-read
//!
//! [`TokenManager::get`] hands out the cached token for a client and
//! refreshes it first when the [`RefreshPolicy`] says it is about to expire.
//! Concurrent readers of the same client share a single refresh call.
//! Refresh failures are logged and the previous token is served (fail-open).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use super::flow::{AuthorizationCodeRequest, BasicAuth, OAuthFlowClient, RefreshTokenRequest};
use super::policy::RefreshPolicy;
use super::store::{RecordCell, TokenStore};
use super::token::{OAuthToken, TokenRecord};
use crate::config::Config;
use crate::transport::ReqwestTransport;
use crate::{Error, Result};

/// Callback for refresh failures swallowed by [`TokenManager::get`]
pub type RefreshErrorHook = Arc<dyn Fn(&str, &Error) + Send + Sync>;

/// Cache of OAuth tokens keyed by client ID.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: TokenStore,
    policy: RefreshPolicy,
    flow: OAuthFlowClient,
    on_refresh_error: RwLock<Option<RefreshErrorHook>>,
}

impl TokenManager {
    /// Create an empty manager using `flow` for refreshes
    pub fn new(flow: OAuthFlowClient) -> Self {
        Self::with_policy(flow, RefreshPolicy::default())
    }

    /// Create an empty manager with a custom refresh policy
    pub fn with_policy(flow: OAuthFlowClient, policy: RefreshPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: TokenStore::new(),
                policy,
                flow,
                on_refresh_error: RwLock::new(None),
            }),
        }
    }

    /// Create a manager backed by a reqwest transport built from `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = ReqwestTransport::new(&config.http)?;
        let flow = OAuthFlowClient::new(Arc::new(transport));
        Ok(Self::with_policy(flow, config.refresh_policy()))
    }

    /// Observe refresh failures that `get` swallows.
    ///
    /// The hook is shared by every clone of this manager and replaces any
    /// previously set hook.
    #[must_use]
    pub fn on_refresh_error(self, hook: impl Fn(&str, &Error) + Send + Sync + 'static) -> Self {
        *self.inner.on_refresh_error.write() = Some(Arc::new(hook));
        self
    }

    /// Refresh policy in use
    pub fn policy(&self) -> RefreshPolicy {
        self.inner.policy
    }

    /// Flow client in use
    pub fn flow(&self) -> &OAuthFlowClient {
        &self.inner.flow
    }

    /// Underlying store
    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    /// Cache a token for a client. An empty `client_id` is ignored.
    pub fn add(&self, client_id: &str, client_secret: &str, token_endpoint: &str, token: OAuthToken) {
        self.inner.store.add(client_id, client_secret, token_endpoint, token);
        if !client_id.is_empty() {
            debug!(client_id, "Token cached");
        }
    }

    /// Cache a complete record. A record without a client ID is ignored.
    pub fn insert(&self, record: TokenRecord) {
        let client_id = record.client_id.clone();
        self.inner.store.insert(record);
        if !client_id.is_empty() {
            debug!(client_id, "Token cached");
        }
    }

    /// Drop a client's token; false if none was cached
    pub fn remove(&self, client_id: &str) -> bool {
        let removed = self.inner.store.remove(client_id);
        if removed {
            info!(client_id, "Token removed");
        }
        removed
    }

    /// Bulk load records, overwriting same-client entries
    pub fn load(&self, records: impl IntoIterator<Item = TokenRecord>) {
        self.inner.store.load(records);
        debug!(count = self.inner.store.len(), "Token records loaded");
    }

    /// Hand a consistent snapshot of every record to `sink`
    pub fn save<F, R>(&self, sink: F) -> R
    where
        F: FnOnce(Vec<TokenRecord>) -> R,
    {
        sink(self.inner.store.snapshot())
    }

    /// Visit a snapshot of every record
    pub fn for_each(&self, action: impl FnMut(&TokenRecord)) {
        self.inner.store.for_each(action);
    }

    /// Snapshot of every record
    pub fn snapshot(&self) -> Vec<TokenRecord> {
        self.inner.store.snapshot()
    }

    /// Current token for `client_id`, refreshed first if it is due.
    ///
    /// Returns `None` only for unknown clients. A failed refresh returns the
    /// previous token.
    pub async fn get(&self, client_id: &str) -> Option<Arc<OAuthToken>> {
        let cell = self.inner.store.cell(client_id)?;

        let seen_attempts = cell.attempts();
        let gate = Arc::clone(&cell.refresh_gate).lock_owned().await;

        // Someone else finished an attempt while we queued; use its outcome
        if cell.attempts() != seen_attempts {
            return Some(cell.token());
        }

        let record = cell.current();
        if !self.inner.policy.needs_refresh(&record, Utc::now()) {
            return Some(record.token);
        }

        debug!(client_id, "Token due for refresh");

        // The refresh owns the gate, so dropping this future does not cancel
        // a refresh other callers are waiting on
        let task = tokio::spawn(refresh_record(
            Arc::clone(&self.inner),
            Arc::clone(&cell),
            record,
            gate,
        ));

        match task.await {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(client_id, error = %e, "Refresh task did not complete");
                Some(cell.token())
            }
        }
    }

    /// Like [`get`](Self::get) but gives up waiting after `timeout`.
    ///
    /// On timeout the current (possibly stale) token is returned; any
    /// refresh already in flight keeps running for other callers.
    pub async fn get_within(&self, client_id: &str, timeout: Duration) -> Option<Arc<OAuthToken>> {
        if let Ok(token) = tokio::time::timeout(timeout, self.get(client_id)).await {
            token
        } else {
            debug!(client_id, timeout_ms = timeout.as_millis(), "Token lookup timed out");
            self.inner.store.cell(client_id).map(|cell| cell.token())
        }
    }

    /// Like [`get`](Self::get), narrowed to a provider-specific type.
    ///
    /// `None` when the client is unknown or the token does not fit `T`.
    pub async fn get_as<T: DeserializeOwned>(&self, client_id: &str) -> Option<T> {
        let token = self.get(client_id).await?;
        match token.narrow() {
            Ok(narrowed) => Some(narrowed),
            Err(e) => {
                debug!(client_id, error = %e, "Token does not fit requested type");
                None
            }
        }
    }

    /// Exchange an authorization code and optionally cache the result.
    ///
    /// The token is returned narrowed to `T` (use [`OAuthToken`] for the
    /// plain form). With `register`, the token is cached under the request's
    /// client ID.
    pub async fn token_from_authorization_code<T: DeserializeOwned>(
        &self,
        request: &AuthorizationCodeRequest,
        register: bool,
    ) -> Result<T> {
        let token = self.inner.flow.exchange_authorization_code(request).await?;
        let narrowed = token.narrow::<T>()?;

        if register {
            self.insert(registration(
                &request.client_id,
                request.client_secret.as_deref(),
                request.basic_auth.as_ref(),
                &request.token_endpoint,
                token,
            ));
        }

        Ok(narrowed)
    }

    /// Explicit refresh; errors are returned rather than swallowed.
    ///
    /// With a client ID on the request, the new token replaces the cached one
    /// (or creates a record when none exists).
    pub async fn refresh_access_token(&self, request: &RefreshTokenRequest) -> Result<Arc<OAuthToken>> {
        let token = self.inner.flow.refresh_access_token(request).await?;

        let Some(client_id) = request.client_id.as_deref().filter(|id| !id.is_empty()) else {
            return Ok(Arc::new(token));
        };

        if let Some(cell) = self.inner.store.cell(client_id) {
            Ok(self.inner.store.install(&cell, token, Utc::now()))
        } else {
            let fallback = Arc::new(token.clone());
            self.insert(registration(
                client_id,
                request.client_secret.as_deref(),
                request.basic_auth.as_ref(),
                &request.token_endpoint,
                token,
            ));
            Ok(self.inner.store.cell(client_id).map_or(fallback, |cell| cell.token()))
        }
    }
}

/// Record for a freshly obtained token. HTTP Basic credentials, when used,
/// become the record's secret and auth method.
fn registration(
    client_id: &str,
    client_secret: Option<&str>,
    basic_auth: Option<&BasicAuth>,
    token_endpoint: &str,
    token: OAuthToken,
) -> TokenRecord {
    let basic_auth = basic_auth.filter(|auth| !auth.user_name.is_empty());
    let secret = match basic_auth {
        Some(auth) => auth.password.as_str(),
        None => client_secret.unwrap_or_default(),
    };
    TokenRecord::new(client_id, secret, token_endpoint, token, Utc::now()).with_basic_auth(basic_auth.is_some())
}

async fn refresh_record(
    inner: Arc<Inner>,
    cell: Arc<RecordCell>,
    record: TokenRecord,
    _gate: OwnedMutexGuard<()>,
) -> Arc<OAuthToken> {
    let request = RefreshTokenRequest::for_record(&record);
    let result = inner.flow.refresh_access_token(&request).await;

    let token = match result {
        Ok(token) => match inner.store.install_refreshed(&cell, &record.token, token, Utc::now()) {
            Some(installed) => {
                info!(client_id = %record.client_id, "Cached token refreshed");
                installed
            }
            None => {
                // Record was replaced by add/load while the refresh ran
                debug!(client_id = %record.client_id, "Discarding refresh of a superseded token");
                cell.token()
            }
        },
        Err(e) => {
            warn!(
                client_id = %record.client_id,
                error = %e,
                "Token refresh failed, serving previous token"
            );
            let hook = inner.on_refresh_error.read().clone();
            if let Some(hook) = hook {
                hook(&record.client_id, &e);
            }
            cell.token()
        }
    };

    cell.finish_attempt();
    token
}
