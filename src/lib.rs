pub mod auth;
pub mod bundle;
pub mod cloudflare;
pub mod config;
pub mod credentials;
pub mod deploy;
pub mod error;
pub mod operator;
pub mod platform;
pub mod poller;
pub mod retry;
