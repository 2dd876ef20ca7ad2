//! Shared test doubles

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use oauth_token_cache::transport::{Transport, TransportRequest, TransportResponse};
use oauth_token_cache::{Error, OAuthFlowClient, Result, TokenManager};

type Responder = Box<dyn Fn(&TransportRequest, usize) -> Result<TransportResponse> + Send + Sync>;

/// Scripted transport that records every request
pub struct MockTransport {
    responder: Responder,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    /// Answer every request with `responder(request, call_index)`
    pub fn new(
        responder: impl Fn(&TransportRequest, usize) -> Result<TransportResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `response`
    pub fn always(response: TransportResponse) -> Self {
        Self::new(move |_, _| Ok(response.clone()))
    }

    /// Token endpoint issuing `access-<n>` tokens, n counting from 1
    pub fn issuing(expires_in: u64) -> Self {
        Self::new(move |_, n| {
            Ok(TransportResponse::json(
                200,
                &json!({
                    "access_token": format!("access-{}", n + 1),
                    "token_type": "bearer",
                    "expires_in": expires_in,
                }),
            ))
        })
    }

    /// Every request fails at the transport level
    pub fn failing() -> Self {
        Self::new(|_, _| Err(Error::Transport("connection refused".to_string())))
    }

    /// Wait `delay` before answering
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of requests sent
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    /// Most recent request
    pub fn last_request(&self) -> TransportRequest {
        self.requests.lock().last().cloned().expect("no request was sent")
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.responder)(&request, n)
    }
}

/// Flow client over `transport`
pub fn flow(transport: &Arc<MockTransport>) -> OAuthFlowClient {
    OAuthFlowClient::new(Arc::clone(transport) as Arc<dyn Transport>)
}

/// Manager with the default policy over `transport`
pub fn manager(transport: &Arc<MockTransport>) -> TokenManager {
    TokenManager::new(flow(transport))
}
