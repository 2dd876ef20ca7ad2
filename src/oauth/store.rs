//! In-memory token store
//!
//! Two lock levels: the store lock guards the map structure, each record
//! carries its own state lock plus an async refresh gate. Locks are never
//! held for two records at once, and the store lock is always taken before a
//! record lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::token::{OAuthToken, TokenRecord};

/// One slot in the store
pub(crate) struct RecordCell {
    /// Current record, swapped wholesale on refresh
    record: RwLock<TokenRecord>,
    /// Held for the duration of a refresh round trip
    pub(crate) refresh_gate: Arc<tokio::sync::Mutex<()>>,
    /// Completed refresh attempts, successful or not
    attempts: AtomicU64,
}

impl RecordCell {
    fn new(record: TokenRecord) -> Self {
        Self {
            record: RwLock::new(record),
            refresh_gate: Arc::new(tokio::sync::Mutex::new(())),
            attempts: AtomicU64::new(0),
        }
    }

    /// Copy of the current record
    pub(crate) fn current(&self) -> TokenRecord {
        self.record.read().clone()
    }

    /// Current token snapshot
    pub(crate) fn token(&self) -> Arc<OAuthToken> {
        Arc::clone(&self.record.read().token)
    }

    pub(crate) fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Acquire)
    }

    pub(crate) fn finish_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::AcqRel);
    }

    fn replace(&self, record: TokenRecord) {
        *self.record.write() = record;
    }
}

/// Concurrent map of client ID to cached token
#[derive(Default)]
pub struct TokenStore {
    records: RwLock<HashMap<String, Arc<RecordCell>>>,
}

impl TokenStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk insert, overwriting records with the same client ID.
    ///
    /// Records without a client ID are skipped.
    pub fn load(&self, records: impl IntoIterator<Item = TokenRecord>) {
        let mut map = self.records.write();
        for record in records {
            if record.client_id.is_empty() {
                debug!("Skipping token record without client_id");
                continue;
            }
            Self::upsert(&mut map, record);
        }
    }

    /// Cache a newly issued token for a client.
    ///
    /// An empty `client_id` is ignored.
    pub fn add(&self, client_id: &str, client_secret: &str, token_endpoint: &str, token: OAuthToken) {
        self.insert(TokenRecord::new(client_id, client_secret, token_endpoint, token, Utc::now()));
    }

    /// Cache a complete record, overwriting any record for the same client.
    ///
    /// A record without a client ID is ignored.
    pub fn insert(&self, record: TokenRecord) {
        if record.client_id.is_empty() {
            debug!("Ignoring token without client_id");
            return;
        }
        Self::upsert(&mut self.records.write(), record);
    }

    /// Copy of the record for `client_id`
    pub fn get(&self, client_id: &str) -> Option<TokenRecord> {
        self.cell(client_id).map(|cell| cell.current())
    }

    /// Whether a record exists for `client_id`
    pub fn contains(&self, client_id: &str) -> bool {
        self.records.read().contains_key(client_id)
    }

    /// Drop the record for `client_id`; false if there was none
    pub fn remove(&self, client_id: &str) -> bool {
        self.records.write().remove(client_id).is_some()
    }

    /// Number of cached clients
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Consistent copy of every record.
    ///
    /// Taken under the exclusive store lock so no refresh lands halfway
    /// through.
    pub fn snapshot(&self) -> Vec<TokenRecord> {
        let map = self.records.write();
        map.values().map(|cell| cell.current()).collect()
    }

    /// Visit a snapshot of every record
    pub fn for_each(&self, mut action: impl FnMut(&TokenRecord)) {
        for record in self.snapshot() {
            action(&record);
        }
    }

    pub(crate) fn cell(&self, client_id: &str) -> Option<Arc<RecordCell>> {
        self.records.read().get(client_id).cloned()
    }

    /// Swap a refreshed token into `cell`
    pub(crate) fn install(&self, cell: &RecordCell, token: OAuthToken, now: DateTime<Utc>) -> Arc<OAuthToken> {
        let _structure = self.records.read();
        cell.record.write().install(token, now)
    }

    /// Swap a refreshed token into `cell` unless the record was replaced
    /// since `based_on` was read.
    ///
    /// Returns `None` when the refresh result is stale.
    pub(crate) fn install_refreshed(
        &self,
        cell: &RecordCell,
        based_on: &Arc<OAuthToken>,
        token: OAuthToken,
        now: DateTime<Utc>,
    ) -> Option<Arc<OAuthToken>> {
        let _structure = self.records.read();
        let mut record = cell.record.write();
        if !Arc::ptr_eq(&record.token, based_on) {
            return None;
        }
        Some(record.install(token, now))
    }

    fn upsert(map: &mut HashMap<String, Arc<RecordCell>>, record: TokenRecord) {
        // Replace in place so callers queued on the refresh gate stay attached
        if let Some(cell) = map.get(&record.client_id) {
            cell.replace(record);
        } else {
            map.insert(record.client_id.clone(), Arc::new(RecordCell::new(record)));
        }
    }
}
