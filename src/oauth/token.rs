//! OAuth token values
//!
//! [`OAuthToken`] is the payload a token endpoint hands back, [`TokenRecord`]
//! is what the cache keeps per client: the token plus what it takes to
//! refresh it.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// OAuth access token as returned by a token endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthToken {
    /// Access token
    pub access_token: String,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Lifetime in seconds; `None` never expires
    #[serde(
        default,
        deserialize_with = "lenient_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_in: Option<u64>,

    /// Granted scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Refresh token (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// State echoed back by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Provider-specific fields (`account_id`, `id_token`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl OAuthToken {
    /// Create a bearer token with no expiry
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_in: None,
            scope: None,
            refresh_token: None,
            state: None,
            extra: Map::new(),
        }
    }

    /// Set the lifetime in seconds
    #[must_use]
    pub fn with_expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    /// Set the refresh token
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Set the granted scope
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Token type, falling back to "Bearer" when the server sent an empty one
    pub fn effective_token_type(&self) -> &str {
        if self.token_type.trim().is_empty() {
            "Bearer"
        } else {
            &self.token_type
        }
    }

    /// Value for an `Authorization` header
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.effective_token_type(), self.access_token)
    }

    /// Refresh token, ignoring empty strings some servers send
    pub fn usable_refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Reinterpret this token as a provider-specific type.
    ///
    /// The conversion goes through the token's JSON form, so `T` sees the
    /// standard fields and everything in [`OAuthToken::extra`].
    pub fn narrow<T: DeserializeOwned>(&self) -> Result<T> {
        let value = serde_json::to_value(self)?;
        serde_json::from_value(value).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Error body returned by a token endpoint (RFC 6749 §5.2)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokenError {
    /// Error code (`invalid_grant`, `invalid_client`, ...)
    pub error: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,

    /// Page with more information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

impl OAuthTokenError {
    /// Create an error with just a code
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_description: None,
            error_uri: None,
        }
    }
}

impl fmt::Display for OAuthTokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.error)?;
        if let Some(description) = &self.error_description {
            write!(f, ": {description}")?;
        }
        if let Some(uri) = &self.error_uri {
            write!(f, " ({uri})")?;
        }
        Ok(())
    }
}

/// Cached token for one OAuth client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Client ID (store key)
    pub client_id: String,

    /// Client secret; empty for public clients
    #[serde(default)]
    pub client_secret: String,

    /// Token endpoint used for refreshes
    #[serde(default)]
    pub token_endpoint: String,

    /// Current token
    pub token: Arc<OAuthToken>,

    /// When `token` was installed
    pub issued_at: DateTime<Utc>,

    /// Authenticate refreshes with HTTP Basic instead of form credentials
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub basic_auth: bool,
}

impl TokenRecord {
    /// Create a record issued at `issued_at`
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_endpoint: impl Into<String>,
        token: OAuthToken,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_endpoint: token_endpoint.into(),
            token: Arc::new(token),
            issued_at,
            basic_auth: false,
        }
    }

    /// Use HTTP Basic client authentication for refreshes
    #[must_use]
    pub fn with_basic_auth(mut self, basic_auth: bool) -> Self {
        self.basic_auth = basic_auth;
        self
    }

    /// Seconds the current token has left, if it expires at all
    pub fn seconds_until_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        let lifetime = i64::try_from(self.token.expires_in?).unwrap_or(i64::MAX);
        Some(lifetime.saturating_sub((now - self.issued_at).num_seconds()))
    }

    /// Swap in a freshly issued token.
    ///
    /// The previous refresh token is carried over when the server did not
    /// rotate it, and `issued_at` never moves backward.
    pub(crate) fn install(&mut self, mut token: OAuthToken, now: DateTime<Utc>) -> Arc<OAuthToken> {
        if token.usable_refresh_token().is_none() {
            token.refresh_token.clone_from(&self.token.refresh_token);
        }
        self.token = Arc::new(token);
        self.issued_at = self.issued_at.max(now);
        Arc::clone(&self.token)
    }
}

/// Accept `expires_in` as a number or a numeric string.
///
/// XML and form-encoded token responses carry every value as text.
fn lenient_seconds<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct SecondsVisitor;

    impl<'de> Visitor<'de> for SecondsVisitor {
        type Value = Option<u64>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative number of seconds")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
            u64::try_from(v)
                .map(Some)
                .map_err(|_| E::custom(format!("negative expires_in: {v}")))
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Self::Value, E> {
            if v.is_finite() && v >= 0.0 {
                Ok(Some(v as u64))
            } else {
                Err(E::custom(format!("invalid expires_in: {v}")))
            }
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
            let v = v.trim();
            if v.is_empty() {
                return Ok(None);
            }
            v.parse::<u64>()
                .map(Some)
                .map_err(|_| E::custom(format!("invalid expires_in: {v}")))
        }

        fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2: Deserializer<'de>>(
            self,
            deserializer: D2,
        ) -> std::result::Result<Self::Value, D2::Error> {
            deserializer.deserialize_any(self)
        }
    }

    deserializer.deserialize_any(SecondsVisitor)
}
