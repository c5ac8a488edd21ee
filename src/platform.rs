//! Narrow capability surface over the Cloudflare account the wizard drives.
//!
//! Every operation takes the resolved account id and returns a typed result.
//! The orchestrator only depends on this trait; [`crate::cloudflare`] provides
//! the REST implementation.

use crate::auth::Token;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

pub const WORKERS_DEV_HOST: &str = "workers.dev";
pub const PAGES_DEV_HOST: &str = "pages.dev";

pub type PlatformResult<T> = Result<T, PlatformError>;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{context} failed ({status}): {message}")]
    Api {
        context: String,
        status: u16,
        message: String,
    },

    #[error("{context} failed: {message}")]
    Rejected { context: String, message: String },

    #[error("{context} returned an unexpected response: {message}")]
    Decode { context: String, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NamespaceRef {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WorkerScript {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PagesProject {
    pub name: String,
    /// Platform host such as `name.pages.dev`.
    #[serde(default)]
    pub subdomain: String,
    #[serde(default)]
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PagesDomain {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

/// Values bound into the running panel as environment bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelBindings {
    pub namespace_id: String,
    pub uuid: String,
    pub trojan_password: String,
    pub proxy_ips: String,
    pub fallback: String,
    pub sub_path: String,
}

impl PanelBindings {
    /// Plain-text variables in binding-name order.
    pub fn variables(&self) -> [(&'static str, &str); 5] {
        [
            ("UUID", self.uuid.as_str()),
            ("TR_PASS", self.trojan_password.as_str()),
            ("PROXY_IP", self.proxy_ips.as_str()),
            ("FALLBACK", self.fallback.as_str()),
            ("SUB_PATH", self.sub_path.as_str()),
        ]
    }
}

pub const NAMESPACE_BINDING: &str = "kv";

#[async_trait]
pub trait Platform: Send + Sync {
    async fn list_accounts(&self) -> PlatformResult<Vec<Account>>;

    async fn create_namespace(&self, account_id: &str, title: &str)
        -> PlatformResult<NamespaceRef>;
    async fn get_namespace(&self, account_id: &str, id: &str) -> PlatformResult<NamespaceRef>;
    async fn list_namespaces(&self, account_id: &str) -> PlatformResult<Vec<NamespaceRef>>;
    async fn delete_namespace(&self, account_id: &str, id: &str) -> PlatformResult<()>;

    async fn worker_exists(&self, account_id: &str, name: &str) -> PlatformResult<bool>;
    async fn upload_worker(
        &self,
        account_id: &str,
        name: &str,
        bindings: &PanelBindings,
        script: Vec<u8>,
    ) -> PlatformResult<()>;
    async fn update_worker_content(
        &self,
        account_id: &str,
        name: &str,
        script: Vec<u8>,
    ) -> PlatformResult<()>;
    async fn list_workers(&self, account_id: &str) -> PlatformResult<Vec<WorkerScript>>;
    async fn delete_worker(&self, account_id: &str, name: &str) -> PlatformResult<()>;
    async fn enable_worker_subdomain(&self, account_id: &str, name: &str) -> PlatformResult<()>;
    /// Account-level subdomain, the `<sub>` in `<sub>.workers.dev`.
    async fn workers_subdomain(&self, account_id: &str) -> PlatformResult<String>;

    async fn create_pages_project(
        &self,
        account_id: &str,
        name: &str,
        bindings: &PanelBindings,
    ) -> PlatformResult<PagesProject>;
    async fn pages_project_exists(&self, account_id: &str, name: &str) -> PlatformResult<bool>;
    async fn get_pages_project(&self, account_id: &str, name: &str)
        -> PlatformResult<PagesProject>;
    async fn list_pages_projects(&self, account_id: &str) -> PlatformResult<Vec<PagesProject>>;
    async fn delete_pages_project(&self, account_id: &str, name: &str) -> PlatformResult<()>;
    async fn create_pages_deployment(
        &self,
        account_id: &str,
        project: &str,
        script: Vec<u8>,
    ) -> PlatformResult<()>;
    async fn add_pages_domain(
        &self,
        account_id: &str,
        project: &str,
        domain: &str,
    ) -> PlatformResult<()>;
    async fn list_pages_domains(
        &self,
        account_id: &str,
        project: &str,
    ) -> PlatformResult<Vec<PagesDomain>>;
    async fn delete_pages_domain(
        &self,
        account_id: &str,
        project: &str,
        domain: &str,
    ) -> PlatformResult<()>;

    async fn list_zones(&self, account_id: &str) -> PlatformResult<Vec<Zone>>;
    async fn attach_worker_domain(
        &self,
        account_id: &str,
        zone_id: &str,
        hostname: &str,
        service: &str,
    ) -> PlatformResult<()>;
}

/// Builds a platform client from a freshly obtained token.
pub trait Connector: Send + Sync {
    fn connect(&self, token: &Token) -> Arc<dyn Platform>;
}

/// Pick the zone that owns `hostname`: the longest zone name that equals it or
/// is a dot-suffix of it.
pub fn match_zone<'a>(hostname: &str, zones: &'a [Zone]) -> Option<&'a Zone> {
    let hostname = hostname.trim_end_matches('.').to_ascii_lowercase();
    zones
        .iter()
        .filter(|zone| {
            let zone_name = zone.name.trim_end_matches('.').to_ascii_lowercase();
            hostname == zone_name || hostname.ends_with(&format!(".{}", zone_name))
        })
        .max_by_key(|zone| zone.name.len())
}
