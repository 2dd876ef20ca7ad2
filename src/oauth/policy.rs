//! When is a cached token due for refresh

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::token::TokenRecord;

/// Proactive refresh policy.
///
/// A token is refreshed `refresh_delta` before it actually expires so callers
/// never see the latency of the refresh round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    refresh_delta: Duration,
}

impl RefreshPolicy {
    /// Default safety margin before expiry
    pub const DEFAULT_REFRESH_DELTA: Duration = Duration::from_secs(120);

    /// Create a policy with the given safety margin
    #[must_use]
    pub fn new(refresh_delta: Duration) -> Self {
        Self { refresh_delta }
    }

    /// Safety margin before expiry
    #[must_use]
    pub fn refresh_delta(&self) -> Duration {
        self.refresh_delta
    }

    /// Whether `record` should be refreshed at `now`.
    ///
    /// Tokens without `expires_in` never need a refresh.
    #[must_use]
    pub fn needs_refresh(&self, record: &TokenRecord, now: DateTime<Utc>) -> bool {
        let Some(expires_in) = record.token.expires_in else {
            return false;
        };

        let lifetime = i64::try_from(expires_in).unwrap_or(i64::MAX);
        let delta = i64::try_from(self.refresh_delta.as_secs()).unwrap_or(i64::MAX);
        let elapsed = (now - record.issued_at).num_seconds();

        elapsed >= lifetime.saturating_sub(delta)
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_REFRESH_DELTA)
    }
}
