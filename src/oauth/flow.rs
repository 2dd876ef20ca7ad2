//! RFC 6749 client flows
//!
//! Builds authorization URLs and talks to the token endpoint. Nothing here
//! touches the token cache; registering results is the job of
//! [`super::TokenManager`].

use std::fmt;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::{debug, info, warn};
use url::Url;

use super::content::{ContentNegotiator, ResponseParser, parse_as};
use super::token::{OAuthToken, OAuthTokenError, TokenRecord};
use crate::transport::{Transport, TransportRequest, TransportResponse};
use crate::{Error, Result};

/// Media types we can decode, in order of preference
const ACCEPT: &str = "application/json, application/x-www-form-urlencoded;q=0.9, application/xml;q=0.8";

/// `response_type` of an authorization request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Authorization code grant (§4.1)
    #[default]
    Code,
    /// Implicit grant (§4.2)
    Token,
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code => f.write_str("code"),
            Self::Token => f.write_str("token"),
        }
    }
}

/// HTTP Basic credentials for the token endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    /// User name (usually the client ID)
    pub user_name: String,
    /// Password (usually the client secret)
    pub password: String,
}

impl BasicAuth {
    /// Create credentials
    pub fn new(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            password: password.into(),
        }
    }

    /// `Authorization` header value
    pub fn header_value(&self) -> String {
        let raw = format!("{}:{}", self.user_name, self.password);
        format!("Basic {}", STANDARD.encode(raw))
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Authorization request parameters (§4.1.1, §4.2.1)
#[derive(Debug, Clone, Default)]
pub struct AuthorizationRequest {
    /// Authorization endpoint
    pub authorization_url: String,
    /// `code` or `token`
    pub response_type: ResponseType,
    /// Client ID
    pub client_id: String,
    /// Redirect URI
    pub redirect_uri: Option<String>,
    /// Requested scope
    pub scope: Option<String>,
    /// Opaque state for CSRF protection
    pub state: Option<String>,
}

impl AuthorizationRequest {
    /// Authorization-code request for `client_id`
    pub fn new(authorization_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            authorization_url: authorization_url.into(),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Set the response type
    #[must_use]
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Set the redirect URI
    #[must_use]
    pub fn redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    /// Set the scope
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Set the state
    #[must_use]
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    fn validate(&self) -> Result<()> {
        require("authorization_url", &self.authorization_url)?;
        require("client_id", &self.client_id)
    }
}

/// Authorization code exchange (§4.1.3)
#[derive(Debug, Clone, Default)]
pub struct AuthorizationCodeRequest {
    /// Token endpoint
    pub token_endpoint: String,
    /// Code received on the redirect
    pub code: String,
    /// Client ID
    pub client_id: String,
    /// Client secret for confidential clients
    pub client_secret: Option<String>,
    /// Redirect URI used in the authorization request
    pub redirect_uri: Option<String>,
    /// HTTP Basic credentials
    pub basic_auth: Option<BasicAuth>,
}

impl AuthorizationCodeRequest {
    /// Exchange `code` for `client_id` at `token_endpoint`
    pub fn new(
        token_endpoint: impl Into<String>,
        code: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            token_endpoint: token_endpoint.into(),
            code: code.into(),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Set the client secret
    #[must_use]
    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Set the redirect URI
    #[must_use]
    pub fn redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    /// Authenticate with HTTP Basic
    #[must_use]
    pub fn basic_auth(mut self, user_name: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some(BasicAuth::new(user_name, password));
        self
    }

    fn validate(&self) -> Result<()> {
        require("token_endpoint", &self.token_endpoint)?;
        require("code", &self.code)?;
        require("client_id", &self.client_id)
    }

    fn form(&self) -> Vec<(String, String)> {
        let mut form = vec![
            pair("grant_type", "authorization_code"),
            pair("code", &self.code),
            pair("client_id", &self.client_id),
        ];
        push_optional(&mut form, "redirect_uri", self.redirect_uri.as_deref());
        push_optional(&mut form, "client_secret", self.client_secret.as_deref());
        form
    }
}

/// Refresh token exchange (§6)
#[derive(Debug, Clone, Default)]
pub struct RefreshTokenRequest {
    /// Token endpoint
    pub token_endpoint: String,
    /// Refresh token
    pub refresh_token: String,
    /// Client ID; also the key the result is cached under
    pub client_id: Option<String>,
    /// Client secret
    pub client_secret: Option<String>,
    /// Narrower scope to request
    pub scope: Option<String>,
    /// HTTP Basic credentials
    pub basic_auth: Option<BasicAuth>,
}

impl RefreshTokenRequest {
    /// Refresh `refresh_token` at `token_endpoint`
    pub fn new(token_endpoint: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            token_endpoint: token_endpoint.into(),
            refresh_token: refresh_token.into(),
            ..Self::default()
        }
    }

    /// Refresh request for a cached record.
    ///
    /// Missing endpoint or refresh token surface as validation errors when
    /// the request is sent.
    pub fn for_record(record: &TokenRecord) -> Self {
        let (client_secret, basic_auth) = if record.basic_auth {
            (None, Some(BasicAuth::new(&record.client_id, &record.client_secret)))
        } else {
            (Some(record.client_secret.clone()), None)
        };

        Self {
            token_endpoint: record.token_endpoint.clone(),
            refresh_token: record.token.usable_refresh_token().unwrap_or_default().to_string(),
            client_id: Some(record.client_id.clone()),
            client_secret,
            scope: None,
            basic_auth,
        }
    }

    /// Set the client ID
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the client secret
    #[must_use]
    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Set the scope
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Authenticate with HTTP Basic
    #[must_use]
    pub fn basic_auth(mut self, user_name: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some(BasicAuth::new(user_name, password));
        self
    }

    fn validate(&self) -> Result<()> {
        require("token_endpoint", &self.token_endpoint)?;
        require("refresh_token", &self.refresh_token)
    }

    fn form(&self) -> Vec<(String, String)> {
        let mut form = vec![
            pair("grant_type", "refresh_token"),
            pair("refresh_token", &self.refresh_token),
        ];
        push_optional(&mut form, "client_id", self.client_id.as_deref());
        push_optional(&mut form, "client_secret", self.client_secret.as_deref());
        push_optional(&mut form, "scope", self.scope.as_deref());
        form
    }
}

/// Stateless OAuth 2.0 client
#[derive(Clone)]
pub struct OAuthFlowClient {
    transport: Arc<dyn Transport>,
    parser: Arc<dyn ResponseParser>,
}

impl OAuthFlowClient {
    /// Create a flow client over `transport`
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            parser: Arc::new(ContentNegotiator),
        }
    }

    /// Replace the response body parser
    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn ResponseParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Build the authorization URL the user agent should be sent to.
    ///
    /// Empty optional parameters are left out entirely.
    pub fn authorization_url(request: &AuthorizationRequest) -> Result<String> {
        request.validate()?;

        let mut url = Url::parse(&request.authorization_url)
            .map_err(|e| Error::Validation(format!("Invalid authorization_url: {e}")))?;
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", &request.response_type.to_string());
            params.append_pair("client_id", &request.client_id);
            for (name, value) in [
                ("redirect_uri", &request.redirect_uri),
                ("scope", &request.scope),
                ("state", &request.state),
            ] {
                if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                    params.append_pair(name, value);
                }
            }
        }

        Ok(url.to_string())
    }

    /// Call the authorization endpoint directly instead of handing the URL
    /// to a browser
    #[tracing::instrument(skip_all, fields(client_id = %request.client_id))]
    pub async fn code_authorization(&self, request: &AuthorizationRequest) -> Result<TransportResponse> {
        let url = Self::authorization_url(request)?;
        let response = self
            .transport
            .send(TransportRequest::get(url).header("Accept", ACCEPT))
            .await?;
        debug!(status = response.status, "Authorization endpoint responded");
        Ok(response)
    }

    /// Exchange an authorization code for a token
    #[tracing::instrument(skip_all, fields(client_id = %request.client_id))]
    pub async fn exchange_authorization_code(&self, request: &AuthorizationCodeRequest) -> Result<OAuthToken> {
        request.validate()?;

        let token = self
            .token_request(&request.token_endpoint, request.form(), request.basic_auth.as_ref())
            .await?;
        info!("Authorization code exchanged");
        Ok(token)
    }

    /// Exchange a refresh token for a new token
    #[tracing::instrument(skip_all, fields(client_id = request.client_id.as_deref().unwrap_or_default()))]
    pub async fn refresh_access_token(&self, request: &RefreshTokenRequest) -> Result<OAuthToken> {
        request.validate()?;

        let token = self
            .token_request(&request.token_endpoint, request.form(), request.basic_auth.as_ref())
            .await?;
        info!("Access token refreshed");
        Ok(token)
    }

    async fn token_request(
        &self,
        token_endpoint: &str,
        form: Vec<(String, String)>,
        basic_auth: Option<&BasicAuth>,
    ) -> Result<OAuthToken> {
        let mut request = TransportRequest::post_form(token_endpoint, form).header("Accept", ACCEPT);
        if let Some(auth) = basic_auth.filter(|a| !a.user_name.is_empty()) {
            request = request.header("Authorization", auth.header_value());
        }

        let response = self.transport.send(request).await?;
        self.token_from_response(&response)
    }

    fn token_from_response(&self, response: &TransportResponse) -> Result<OAuthToken> {
        let content_type = response.content_type();

        if !response.is_success() {
            return Err(
                match parse_as::<OAuthTokenError>(self.parser.as_ref(), &response.body, content_type) {
                    Ok(err) => {
                        warn!(status = response.status, error = %err, "Token endpoint rejected request");
                        Error::OAuth(err)
                    }
                    Err(_) => Error::UnexpectedStatus {
                        status: response.status,
                        body: response.body.clone(),
                    },
                },
            );
        }

        let value = self.parser.parse_value(&response.body, content_type)?;

        // Some providers report errors with a 200
        if value.get("error").is_some_and(|e| !e.is_null()) {
            let err: OAuthTokenError =
                serde_json::from_value(value).map_err(|e| Error::Deserialization(e.to_string()))?;
            warn!(error = %err, "Token endpoint returned an error body");
            return Err(Error::OAuth(err));
        }

        serde_json::from_value(value).map_err(|e| Error::Deserialization(format!("Invalid token response: {e}")))
    }
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::missing(name))
    } else {
        Ok(())
    }
}

fn pair(name: &str, value: &str) -> (String, String) {
    (name.to_string(), value.to_string())
}

fn push_optional(form: &mut Vec<(String, String)>, name: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        form.push(pair(name, value));
    }
}
