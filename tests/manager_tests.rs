//! Token manager tests: refresh-on-read, coalescing, fail-open

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use futures::future::join_all;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::{MockTransport, flow, manager};
use oauth_token_cache::transport::{HttpMethod, TransportResponse};
use oauth_token_cache::{ErrorKind, OAuthToken, RefreshPolicy, RefreshTokenRequest, TokenManager, TokenRecord};

const TOKEN_URL: &str = "https://api.dropbox.example/oauth2/token";

fn expiring(access_token: &str) -> OAuthToken {
    OAuthToken::bearer(access_token)
        .with_expires_in(1)
        .with_refresh_token("rt-1")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_gets_share_one_refresh() {
    let transport = Arc::new(MockTransport::issuing(3600).with_delay(Duration::from_millis(100)));
    let manager = manager(&transport);
    manager.add("dropbox", "secret", TOKEN_URL, expiring("stale"));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get("dropbox").await })
        })
        .collect();

    for result in join_all(handles).await {
        let token = result.unwrap().unwrap();
        assert_eq!(token.access_token, "access-1");
    }

    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_refresh_request_carries_stored_credentials() {
    let transport = Arc::new(MockTransport::issuing(14400));
    let manager = manager(&transport);
    manager.add("dropbox", "secret", TOKEN_URL, expiring("stale"));

    let token = manager.get("dropbox").await.unwrap();
    assert_eq!(token.access_token, "access-1");

    let request = transport.last_request();
    assert_eq!(request.method, HttpMethod::Post);
    assert_eq!(request.url, TOKEN_URL);
    assert_eq!(request.form_value("grant_type"), Some("refresh_token"));
    assert_eq!(request.form_value("refresh_token"), Some("rt-1"));
    assert_eq!(request.form_value("client_id"), Some("dropbox"));
    assert_eq!(request.form_value("client_secret"), Some("secret"));
    assert!(request.header_value("accept").unwrap().starts_with("application/json"));
}

#[tokio::test]
async fn test_refresh_keeps_refresh_token_when_not_rotated() {
    let transport = Arc::new(MockTransport::issuing(3600));
    let manager = manager(&transport);
    manager.add("dropbox", "secret", TOKEN_URL, expiring("stale"));

    let token = manager.get("dropbox").await.unwrap();
    assert_eq!(token.refresh_token.as_deref(), Some("rt-1"));

    // Fresh now: served from cache
    let again = manager.get("dropbox").await.unwrap();
    assert!(Arc::ptr_eq(&token, &again));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_rotated_refresh_token_is_used_next_time() {
    let transport = Arc::new(MockTransport::new(|_, n| {
        Ok(TransportResponse::json(
            200,
            &json!({
                "access_token": format!("access-{}", n + 1),
                "expires_in": 1,
                "refresh_token": format!("rt-{}", n + 2),
            }),
        ))
    }));
    let manager = manager(&transport);
    manager.add("c1", "", TOKEN_URL, expiring("stale"));

    manager.get("c1").await.unwrap();
    manager.get("c1").await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].form_value("refresh_token"), Some("rt-1"));
    assert_eq!(requests[1].form_value("refresh_token"), Some("rt-2"));
}

#[tokio::test]
async fn test_previous_token_survives_refresh() {
    let transport = Arc::new(MockTransport::issuing(3600));
    let manager = TokenManager::with_policy(flow(&transport), RefreshPolicy::new(Duration::ZERO));
    manager.add("c1", "", TOKEN_URL, OAuthToken::bearer("old").with_expires_in(0).with_refresh_token("rt"));

    let before = manager.store().get("c1").unwrap().token;
    let after = manager.get("c1").await.unwrap();

    assert_eq!(before.access_token, "old");
    assert_eq!(after.access_token, "access-1");
}

#[tokio::test]
async fn test_issued_at_moves_forward_on_refresh() {
    let transport = Arc::new(MockTransport::issuing(3600));
    let manager = manager(&transport);
    let long_ago = Utc::now() - TimeDelta::hours(2);
    manager.load([TokenRecord::new(
        "c1",
        "",
        TOKEN_URL,
        OAuthToken::bearer("old").with_expires_in(3600).with_refresh_token("rt"),
        long_ago,
    )]);

    manager.get("c1").await.unwrap();

    let record = manager.store().get("c1").unwrap();
    assert!(record.issued_at > long_ago);
    assert_eq!(record.token.access_token, "access-1");
}

#[tokio::test]
async fn test_failed_refresh_serves_previous_token() {
    let transport = Arc::new(MockTransport::failing());
    let failures = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&failures);
    let manager = manager(&transport).on_refresh_error(move |client_id, err| {
        assert_eq!(client_id, "c1");
        assert_eq!(err.kind(), ErrorKind::Transport);
        seen.fetch_add(1, Ordering::SeqCst);
    });
    manager.add("c1", "", TOKEN_URL, expiring("stale"));

    let token = manager.get("c1").await.unwrap();
    assert_eq!(token.access_token, "stale");
    assert_eq!(transport.calls(), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_error_response_serves_previous_token() {
    let transport = Arc::new(MockTransport::always(TransportResponse::json(
        400,
        &json!({"error": "invalid_grant", "error_description": "refresh token revoked"}),
    )));
    let manager = manager(&transport);
    manager.add("c1", "", TOKEN_URL, expiring("stale"));

    assert_eq!(manager.get("c1").await.unwrap().access_token, "stale");
    assert_eq!(manager.store().get("c1").unwrap().token.access_token, "stale");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiters_reuse_failed_attempt() {
    let transport = Arc::new(MockTransport::failing().with_delay(Duration::from_millis(100)));
    let manager = manager(&transport);
    manager.add("c1", "", TOKEN_URL, expiring("stale"));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get("c1").await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().access_token, "stale");
    }

    // Waiters queued behind the failed attempt do not retry it
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_token_without_expiry_is_never_refreshed() {
    let transport = Arc::new(MockTransport::issuing(3600));
    let manager = manager(&transport);
    manager.load([TokenRecord::new(
        "c1",
        "",
        TOKEN_URL,
        OAuthToken::bearer("forever").with_refresh_token("rt"),
        Utc::now() - TimeDelta::days(365),
    )]);

    for _ in 0..3 {
        assert_eq!(manager.get("c1").await.unwrap().access_token, "forever");
    }
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_get_within_returns_stale_token_on_timeout() {
    let transport = Arc::new(MockTransport::issuing(3600).with_delay(Duration::from_millis(300)));
    let manager = manager(&transport);
    manager.add("c1", "", TOKEN_URL, expiring("stale"));

    let token = manager.get_within("c1", Duration::from_millis(20)).await.unwrap();
    assert_eq!(token.access_token, "stale");

    // The abandoned refresh still completes and is shared
    let token = manager.get("c1").await.unwrap();
    assert_eq!(token.access_token, "access-1");
    assert_eq!(transport.calls(), 1);

    assert!(manager.get_within("nobody", Duration::from_millis(20)).await.is_none());
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let transport = Arc::new(MockTransport::issuing(3600));
    let manager = manager(&transport);
    manager.add("c1", "", TOKEN_URL, OAuthToken::bearer("a1"));

    assert!(manager.remove("c1"));
    assert!(!manager.remove("c1"));
    assert!(manager.get("c1").await.is_none());
}

#[tokio::test]
async fn test_empty_client_id_is_ignored() {
    let transport = Arc::new(MockTransport::issuing(3600));
    let manager = manager(&transport);
    manager.add("", "", TOKEN_URL, OAuthToken::bearer("a1"));

    assert!(manager.store().is_empty());
    assert!(manager.get("").await.is_none());
}

#[tokio::test]
async fn test_load_then_snapshot() {
    let transport = Arc::new(MockTransport::issuing(3600));
    let manager = manager(&transport);
    let issued_at = Utc::now();
    let records = vec![
        TokenRecord::new("a", "sa", TOKEN_URL, OAuthToken::bearer("ta").with_expires_in(3600), issued_at),
        TokenRecord::new("b", "", TOKEN_URL, OAuthToken::bearer("tb"), issued_at),
    ];

    manager.load(records.clone());
    // Same client again overwrites
    manager.load([TokenRecord::new("b", "", TOKEN_URL, OAuthToken::bearer("tb2"), issued_at)]);

    let mut snapshot = manager.save(|records| records);
    snapshot.sort_by(|x, y| x.client_id.cmp(&y.client_id));

    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0], records[0]);
    assert_eq!(snapshot[1].token.access_token, "tb2");
}

#[tokio::test]
async fn test_explicit_refresh_replaces_cached_token() {
    let transport = Arc::new(MockTransport::issuing(3600));
    let manager = manager(&transport);
    manager.add(
        "c1",
        "s1",
        TOKEN_URL,
        OAuthToken::bearer("a0").with_expires_in(3600).with_refresh_token("rt"),
    );

    let record = manager.store().get("c1").unwrap();
    let token = manager
        .refresh_access_token(&RefreshTokenRequest::for_record(&record))
        .await
        .unwrap();
    assert_eq!(token.access_token, "access-1");
    assert_eq!(token.refresh_token.as_deref(), Some("rt"));

    let cached = manager.get("c1").await.unwrap();
    assert_eq!(cached.access_token, "access-1");
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_explicit_refresh_registers_unknown_client() {
    let transport = Arc::new(MockTransport::issuing(3600));
    let manager = manager(&transport);

    let request = RefreshTokenRequest::new(TOKEN_URL, "rt").client_id("c9").client_secret("s9");
    manager.refresh_access_token(&request).await.unwrap();

    let record = manager.store().get("c9").unwrap();
    assert_eq!(record.client_secret, "s9");
    assert_eq!(record.token_endpoint, TOKEN_URL);
    assert_eq!(record.token.access_token, "access-1");
}

#[tokio::test]
async fn test_explicit_refresh_propagates_errors() {
    let transport = Arc::new(MockTransport::failing());
    let manager = manager(&transport);
    manager.add("c1", "", TOKEN_URL, expiring("a0"));

    let record = manager.store().get("c1").unwrap();
    let err = manager
        .refresh_access_token(&RefreshTokenRequest::for_record(&record))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(manager.store().get("c1").unwrap().token.access_token, "a0");
}

#[tokio::test]
async fn test_add_during_refresh_wins_over_refresh_result() {
    let transport = Arc::new(MockTransport::issuing(3600).with_delay(Duration::from_millis(200)));
    let manager = manager(&transport);
    manager.add("c1", "", TOKEN_URL, expiring("stale"));

    let reader = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.get("c1").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    manager.add(
        "c1",
        "",
        TOKEN_URL,
        OAuthToken::bearer("fresh-grant").with_expires_in(3600).with_refresh_token("rt-new"),
    );

    let token = reader.await.unwrap().unwrap();
    assert_eq!(token.access_token, "fresh-grant");

    let record = manager.store().get("c1").unwrap();
    assert_eq!(record.token.access_token, "fresh-grant");
    assert_eq!(record.token.refresh_token.as_deref(), Some("rt-new"));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_load_during_refresh_wins_over_refresh_result() {
    let transport = Arc::new(MockTransport::issuing(3600).with_delay(Duration::from_millis(200)));
    let manager = manager(&transport);
    manager.add("c1", "", TOKEN_URL, expiring("stale"));

    let reader = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.get("c1").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    manager.load([TokenRecord::new(
        "c1",
        "",
        TOKEN_URL,
        OAuthToken::bearer("loaded").with_expires_in(3600).with_refresh_token("rt-loaded"),
        Utc::now(),
    )]);

    assert_eq!(reader.await.unwrap().unwrap().access_token, "loaded");
    let record = manager.store().get("c1").unwrap();
    assert_eq!(record.token.access_token, "loaded");
    assert_eq!(record.token.refresh_token.as_deref(), Some("rt-loaded"));
}

#[tokio::test]
async fn test_remove_during_refresh_stays_removed() {
    let transport = Arc::new(MockTransport::issuing(3600).with_delay(Duration::from_millis(200)));
    let manager = manager(&transport);
    manager.add("c1", "", TOKEN_URL, expiring("stale"));

    let reader = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.get("c1").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(manager.remove("c1"));
    reader.await.unwrap().unwrap();

    assert!(manager.store().get("c1").is_none());
    assert!(manager.get("c1").await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_aborted_reader_does_not_cancel_shared_refresh() {
    let transport = Arc::new(MockTransport::issuing(3600).with_delay(Duration::from_millis(200)));
    let manager = manager(&transport);
    manager.add("c1", "", TOKEN_URL, expiring("stale"));

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.get("c1").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.get("c1").await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());

    let token = second.await.unwrap().unwrap();
    assert_eq!(token.access_token, "access-1");
    assert_eq!(manager.store().get("c1").unwrap().token.access_token, "access-1");
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_basic_auth_record_refreshes_with_authorization_header() {
    let transport = Arc::new(MockTransport::issuing(3600));
    let manager = manager(&transport);
    manager.insert(
        TokenRecord::new("dropbox", "secret", TOKEN_URL, expiring("stale"), Utc::now()).with_basic_auth(true),
    );

    assert_eq!(manager.get("dropbox").await.unwrap().access_token, "access-1");

    let request = transport.last_request();
    assert_eq!(request.header_value("authorization"), Some("Basic ZHJvcGJveDpzZWNyZXQ="));
    assert_eq!(request.form_value("client_secret"), None);
    assert_eq!(request.form_value("refresh_token"), Some("rt-1"));
    assert!(manager.store().get("dropbox").unwrap().basic_auth);
}
