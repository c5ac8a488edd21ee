// Integration tests for the OAuth callback listener

use async_trait::async_trait;
use bpb_wizard::auth::server::CallbackServer;
use bpb_wizard::auth::{AuthBroker, AuthError, OAuthSettings, Token, TokenExchanger};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct FakeExchanger {
    calls: AtomicUsize,
}

#[async_trait]
impl TokenExchanger for FakeExchanger {
    async fn exchange(&self, code: &str, _code_verifier: &str) -> Result<Token, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Token {
            access_token: format!("token-for-{}", code),
            token_type: Some("bearer".to_string()),
            refresh_token: None,
            expires_in: Some(3600),
            scope: BTreeSet::new(),
        })
    }
}

async fn start() -> (CallbackServer, Arc<AuthBroker>, Arc<FakeExchanger>) {
    let exchanger = Arc::new(FakeExchanger::default());
    let broker = Arc::new(AuthBroker::new(
        OAuthSettings::cloudflare(0),
        exchanger.clone(),
    ));
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = CallbackServer::bind(addr, broker.clone()).await.unwrap();
    (server, broker, exchanger)
}

async fn call(server: &CallbackServer, state: &str, code: &str) -> (u16, String) {
    let url = format!("http://{}/oauth/callback", server.local_addr());
    let response = reqwest::Client::new()
        .get(url)
        .query(&[("state", state), ("code", code)])
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.text().await.unwrap())
}

#[tokio::test]
async fn test_callback_with_forged_state_is_rejected() {
    let (server, broker, exchanger) = start().await;
    let (_url, mut rx) = broker.begin_login();

    let (status, body) = call(&server, "forged", "abc").await;

    assert_eq!(status, 400);
    assert!(body.contains("Invalid OAuth state"));
    assert_eq!(exchanger.calls.load(Ordering::SeqCst), 0);
    assert!(rx.try_recv().is_err());

    server.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_callback_without_code_is_rejected() {
    let (server, broker, exchanger) = start().await;
    let (_url, mut rx) = broker.begin_login();
    let state = broker.pending_state().unwrap();

    let (status, body) = call(&server, &state, "").await;

    assert_eq!(status, 400);
    assert!(body.contains("No code returned"));
    assert_eq!(exchanger.calls.load(Ordering::SeqCst), 0);
    assert!(rx.try_recv().is_err());

    server.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_valid_callback_delivers_token_once_and_closes_window() {
    let (server, broker, exchanger) = start().await;
    let (_url, rx) = broker.begin_login();
    let state = broker.pending_state().unwrap();

    let (status, body) = call(&server, &state, "the-code").await;
    assert_eq!(status, 200);
    assert!(body.contains("window.close()"));

    let token = rx.await.unwrap();
    assert_eq!(token.access_token, "token-for-the-code");

    // Replaying the same redirect finds no pending login.
    let (status, _) = call(&server, &state, "the-code").await;
    assert_eq!(status, 400);
    assert_eq!(exchanger.calls.load(Ordering::SeqCst), 1);

    server.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_listener_serves_successive_logins() {
    let (server, broker, _) = start().await;

    for code in ["first", "second"] {
        let (_url, rx) = broker.begin_login();
        let state = broker.pending_state().unwrap();
        let (status, _) = call(&server, &state, code).await;
        assert_eq!(status, 200);
        assert_eq!(rx.await.unwrap().access_token, format!("token-for-{}", code));
    }

    server.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let (server, _, _) = start().await;
    let response = reqwest::get(format!("http://{}/other", server.local_addr()))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    server.shutdown(Duration::from_secs(1)).await;
}
