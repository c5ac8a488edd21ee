//! Cloudflare OAuth login: PKCE session, callback handling and token hand-off.
//!
//! A login creates an [`AuthSession`] inside the [`AuthBroker`] and hands the
//! caller the receiving half of a one-shot channel. The callback listener
//! (see [`server`]) forwards `GET /oauth/callback` to
//! [`AuthBroker::handle_callback`], which delivers at most one [`Token`] per
//! session.

pub mod pkce;
pub mod server;

use crate::operator::UrlOpener;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

pub const DEFAULT_CLIENT_ID: &str = "54d11594-84e4-41aa-b438-e81b8fa78ee7";
pub const DEFAULT_AUTH_URL: &str = "https://dash.cloudflare.com/oauth2/auth";
pub const DEFAULT_TOKEN_URL: &str = "https://dash.cloudflare.com/oauth2/token";
pub const DEFAULT_CALLBACK_PORT: u16 = 8976;
pub const CALLBACK_PATH: &str = "/oauth/callback";

pub const SCOPES: &[&str] = &[
    "account:read",
    "user:read",
    "workers:write",
    "workers_kv:write",
    "workers_routes:write",
    "workers_scripts:write",
    "workers_tail:read",
    "d1:write",
    "pages:write",
    "zone:read",
    "ssl_certs:write",
    "ai:write",
    "queues:write",
    "pipelines:write",
    "secrets_store:write",
];

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid OAuth state")]
    StateMismatch,

    #[error("No code returned")]
    MissingCode,

    #[error("No login is waiting for a callback")]
    NoPendingLogin,

    #[error("Error exchanging OAuth token: {0}")]
    Exchange(String),

    #[error("Timed out after {}s waiting for the browser login", .0.as_secs())]
    TimedOut(Duration),

    #[error("Login was superseded before a token arrived")]
    Cancelled,

    #[error("Failed to open browser: {0}")]
    Browser(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl OAuthSettings {
    pub fn cloudflare(callback_port: u16) -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            redirect_uri: format!("http://localhost:{}{}", callback_port, CALLBACK_PATH),
            scopes: SCOPES.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// Access token returned by the token endpoint. Never written to disk.
#[derive(Clone, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_scope")]
    pub scope: BTreeSet<String>,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"****")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

fn deserialize_scope<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect())
}

#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, code: &str, code_verifier: &str) -> Result<Token, AuthError>;
}

/// Authorization-code exchange against the OAuth token endpoint.
pub struct HttpTokenExchanger {
    settings: OAuthSettings,
    http: reqwest::Client,
}

impl HttpTokenExchanger {
    pub fn new(settings: OAuthSettings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange(&self, code: &str, code_verifier: &str) -> Result<Token, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
            ("client_id", self.settings.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];

        let response = self
            .http
            .post(&self.settings.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;
        if !status.is_success() {
            return Err(AuthError::Exchange(format!("{}: {}", status, body)));
        }

        serde_json::from_str(&body)
            .map_err(|e| AuthError::Exchange(format!("unexpected token response: {}", e)))
    }
}

/// One login attempt. Dropped once its token has been delivered.
pub struct AuthSession {
    state: String,
    code_verifier: String,
    result: oneshot::Sender<Token>,
}

impl AuthSession {
    pub fn state(&self) -> &str {
        &self.state
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct CallbackParams {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub code: String,
}

pub struct AuthBroker {
    settings: OAuthSettings,
    exchanger: Arc<dyn TokenExchanger>,
    pending: Mutex<Option<AuthSession>>,
}

impl AuthBroker {
    pub fn new(settings: OAuthSettings, exchanger: Arc<dyn TokenExchanger>) -> Self {
        Self {
            settings,
            exchanger,
            pending: Mutex::new(None),
        }
    }

    /// Start a fresh session, replacing any previous one, and return the
    /// authorization URL together with the token receiver.
    pub fn begin_login(&self) -> (String, oneshot::Receiver<Token>) {
        let state = pkce::generate_state();
        let code_verifier = pkce::generate_code_verifier();
        let code_challenge = pkce::generate_code_challenge(&code_verifier);
        let scope = self.settings.scopes.join(" ");

        let url = reqwest::Url::parse_with_params(
            &self.settings.auth_url,
            &[
                ("response_type", "code"),
                ("client_id", self.settings.client_id.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("state", state.as_str()),
                ("access_type", "offline"),
                ("code_challenge", code_challenge.as_str()),
                ("code_challenge_method", "S256"),
            ],
        )
        .map(String::from)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "auth url is not absolute; using it verbatim");
            self.settings.auth_url.clone()
        });

        let (tx, rx) = oneshot::channel();
        let session = AuthSession {
            state,
            code_verifier,
            result: tx,
        };
        *self.lock_pending() = Some(session);

        (url, rx)
    }

    pub fn pending_state(&self) -> Option<String> {
        self.lock_pending().as_ref().map(|s| s.state.clone())
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<AuthSession>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validate a callback and, on success, deliver the exchanged token to the
    /// waiting login. Failures leave the session in place and deliver nothing.
    pub async fn handle_callback(&self, params: CallbackParams) -> Result<(), AuthError> {
        let code_verifier = {
            let pending = self.lock_pending();
            let session = pending.as_ref().ok_or(AuthError::NoPendingLogin)?;
            if session.state != params.state {
                return Err(AuthError::StateMismatch);
            }
            if params.code.is_empty() {
                return Err(AuthError::MissingCode);
            }
            session.code_verifier.clone()
        };

        let token = self.exchanger.exchange(&params.code, &code_verifier).await?;

        let session = {
            let mut pending = self.lock_pending();
            match pending.as_ref() {
                Some(session) if session.state == params.state => pending.take(),
                _ => None,
            }
        }
        .ok_or(AuthError::NoPendingLogin)?;

        session
            .result
            .send(token)
            .map_err(|_| AuthError::Cancelled)?;
        Ok(())
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<Token, AuthError>;
}

/// Opens the authorization URL in the browser and waits, bounded, for the
/// callback listener to deliver the token.
pub struct BrowserLogin {
    broker: Arc<AuthBroker>,
    opener: Arc<dyn UrlOpener>,
    timeout: Duration,
}

impl BrowserLogin {
    pub fn new(broker: Arc<AuthBroker>, opener: Arc<dyn UrlOpener>, timeout: Duration) -> Self {
        Self {
            broker,
            opener,
            timeout,
        }
    }
}

#[async_trait]
impl Authenticator for BrowserLogin {
    async fn authenticate(&self) -> Result<Token, AuthError> {
        let (url, rx) = self.broker.begin_login();
        tracing::debug!("opening authorization url");
        if let Err(error) = self.opener.open(&url) {
            tracing::warn!(%error, "could not launch browser");
            println!("Open this URL in your browser to log in:\n{}", url);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(token)) => Ok(token),
            Ok(Err(_)) => Err(AuthError::Cancelled),
            Err(_) => Err(AuthError::TimedOut(self.timeout)),
        }
    }
}
