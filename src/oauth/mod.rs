//! OAuth 2.0 token lifecycle
//!
//! Caches access tokens per client and refreshes them shortly before they
//! expire.
//!
//! Features:
//! - Authorization URL construction and code exchange (RFC 6749 §4.1)
//! - Refresh token exchange (RFC 6749 §6)
//! - Refresh-on-read with one network call per stale token, however many
//!   callers are waiting
//! - Fail-open: a failed refresh keeps serving the previous token
//! - JSON, XML and form-encoded token responses

mod content;
mod flow;
mod manager;
mod policy;
mod storage;
mod store;
mod token;

pub use content::{BodyFormat, ContentNegotiator, ResponseParser, parse_as};
pub use flow::{
    AuthorizationCodeRequest, AuthorizationRequest, BasicAuth, OAuthFlowClient, RefreshTokenRequest,
    ResponseType,
};
pub use manager::{RefreshErrorHook, TokenManager};
pub use policy::RefreshPolicy;
pub use storage::SnapshotFile;
pub use store::TokenStore;
pub use token::{OAuthToken, OAuthTokenError, TokenRecord};
