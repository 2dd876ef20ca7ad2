//! HTTP transport used by the OAuth flows
//!
//! The flows only need "send a request, get status/headers/body back", so
//! they talk to a [`Transport`] trait object and never to a concrete client.

mod http;

pub use self::http::ReqwestTransport;

use std::fmt;

use async_trait::async_trait;

use crate::Result;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// Outgoing request
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Method
    pub method: HttpMethod,
    /// Absolute URL including any query string
    pub url: String,
    /// Request headers
    pub headers: Vec<(String, String)>,
    /// `application/x-www-form-urlencoded` body; empty sends no body
    pub form: Vec<(String, String)>,
}

impl TransportRequest {
    /// GET request without body
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            form: Vec::new(),
        }
    }

    /// POST request with a form body
    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            form,
        }
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First form value for `name`
    pub fn form_value(&self, name: &str) -> Option<&str> {
        lookup(&self.form, name)
    }

    /// First header value for `name` (case-insensitive)
    pub fn header_value(&self, name: &str) -> Option<&str> {
        lookup_ignore_case(&self.headers, name)
    }
}

/// Response as seen by the flows
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Body decoded as text
    pub body: String,
}

impl TransportResponse {
    /// Response with a body and content type
    pub fn new(status: u16, content_type: &str, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: body.into(),
        }
    }

    /// JSON response
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, "application/json", body.to_string())
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `Content-Type` header, if any
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// First header value for `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        lookup_ignore_case(&self.headers, name)
    }
}

fn lookup<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}

fn lookup_ignore_case<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Something that can execute HTTP requests for the OAuth flows
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return the full response.
    ///
    /// Non-2xx statuses are responses, not errors; only connection-level
    /// failures map to [`crate::Error::Transport`].
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}
