use crate::auth::{self, OAuthSettings};
use crate::bundle::DEFAULT_BUNDLE_URL;
use crate::cloudflare::DEFAULT_API_BASE_URL;
use crate::deploy::settings::{DEFAULT_FALLBACK, DEFAULT_PROXY_IPS};
use crate::deploy::PanelDefaults;
use crate::poller::{DEFAULT_INTERVAL, DEFAULT_MAX_ATTEMPTS, DEFAULT_RESOLVER};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LOGIN_TIMEOUT_SECS: u64 = 300;

/// Wizard configuration loaded from ~/.config/bpb-wizard/config.toml
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WizardConfig {
    /// OAuth client and callback listener
    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Cloudflare REST API
    #[serde(default)]
    pub api: ApiConfig,

    /// Prebuilt panel script
    #[serde(default)]
    pub bundle: BundleConfig,

    /// Readiness polling after deployment
    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// Defaults offered at the panel settings prompts
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: Option<String>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    /// Local port of the callback listener; the redirect URL uses it too
    pub callback_port: Option<u16>,
    /// How long to wait for the browser login before offering a retry
    pub login_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BundleConfig {
    pub url: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// DNS server used for probes, as ip:port
    pub resolver: Option<String>,
    pub interval_secs: Option<u64>,
    /// 0 polls forever
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    pub proxy_ip: Option<String>,
    pub fallback: Option<String>,
}

impl WizardConfig {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("bpb-wizard").join("config.toml"))
    }

    /// Load config from file, returning default if file doesn't exist
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config: {}", e);
                Self::default()
            }),
            Err(e) => {
                eprintln!("Warning: Failed to read config: {}", e);
                Self::default()
            }
        }
    }

    pub fn callback_port(&self) -> u16 {
        self.oauth
            .callback_port
            .unwrap_or(auth::DEFAULT_CALLBACK_PORT)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(
            self.oauth
                .login_timeout_secs
                .unwrap_or(DEFAULT_LOGIN_TIMEOUT_SECS),
        )
    }

    /// OAuth settings with the redirect URL pointing at `callback_port`.
    pub fn oauth_settings(&self, callback_port: u16) -> OAuthSettings {
        let mut settings = OAuthSettings::cloudflare(callback_port);
        if let Some(client_id) = &self.oauth.client_id {
            settings.client_id = client_id.clone();
        }
        if let Some(auth_url) = &self.oauth.auth_url {
            settings.auth_url = auth_url.clone();
        }
        if let Some(token_url) = &self.oauth.token_url {
            settings.token_url = token_url.clone();
        }
        settings
    }

    pub fn api_base_url(&self) -> String {
        self.api
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    /// Bundle URL (flag/env -> config -> default)
    pub fn bundle_url(&self, cli_override: Option<&str>) -> String {
        cli_override
            .map(str::to_string)
            .or_else(|| self.bundle.url.clone())
            .unwrap_or_else(|| DEFAULT_BUNDLE_URL.to_string())
    }

    pub fn resolver(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.readiness
            .resolver
            .as_deref()
            .unwrap_or(DEFAULT_RESOLVER)
            .parse()
    }

    pub fn poll_interval(&self) -> Duration {
        self.readiness
            .interval_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_INTERVAL)
    }

    pub fn poll_max_attempts(&self) -> Option<u32> {
        match self.readiness.max_attempts {
            Some(0) => None,
            Some(n) => Some(n),
            None => Some(DEFAULT_MAX_ATTEMPTS),
        }
    }

    pub fn panel_defaults(&self) -> PanelDefaults {
        PanelDefaults {
            proxy_ips: self
                .defaults
                .proxy_ip
                .clone()
                .unwrap_or_else(|| DEFAULT_PROXY_IPS.to_string()),
            fallback: self
                .defaults
                .fallback
                .clone()
                .unwrap_or_else(|| DEFAULT_FALLBACK.to_string()),
        }
    }
}

/// Generate a sample config file content
pub fn sample_config() -> &'static str {
    r#"# BPB Wizard Configuration
# Location: ~/.config/bpb-wizard/config.toml

[oauth]
# Local port for the OAuth redirect (must match the registered redirect URL)
# callback_port = 8976
# Seconds to wait for the browser login before offering a retry
# login_timeout_secs = 300

[api]
# base_url = "https://api.cloudflare.com/client/v4"

[bundle]
# Prebuilt panel script
# url = "https://github.com/bia-pain-bache/BPB-Worker-Panel/releases/latest/download/worker.js"

[readiness]
# Public DNS server used to resolve the panel while polling
# resolver = "8.8.8.8:53"
# interval_secs = 5
# 0 keeps polling until the panel answers
# max_attempts = 180

[defaults]
# proxy_ip = "bpb.yousef.isegaro.com"
# fallback = "speed.cloudflare.com"
"#
}
