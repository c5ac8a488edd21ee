//! Cloudflare REST v4 implementation of [`Platform`].

use crate::auth::Token;
use crate::platform::{
    Account, Connector, NamespaceRef, PagesDomain, PagesProject, PanelBindings, Platform,
    PlatformError, PlatformResult, WorkerScript, Zone, NAMESPACE_BINDING,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{multipart, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

const CLOUDFLARE_MAX_ATTEMPTS: usize = 5;
const CLOUDFLARE_RETRY_BASE_MS: u64 = 400;
const WORKER_MAIN_MODULE: &str = "worker.js";
const PAGES_ENTRYPOINT: &str = "_worker.js";
const PAGES_BRANCH: &str = "main";
const COMPATIBILITY_FLAG: &str = "nodejs_compat";
const ZONES_PER_PAGE: &str = "50";

#[derive(Debug, Deserialize)]
struct CloudflareApiMessage {
    code: Option<i64>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CloudflareApiResponse<T> {
    success: bool,
    result: T,
    errors: Option<Vec<CloudflareApiMessage>>,
    messages: Option<Vec<CloudflareApiMessage>>,
    result_info: Option<CloudflareResultInfo>,
}

/// Pagination block of list endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct CloudflareResultInfo {
    #[serde(default)]
    total_pages: u32,
}

/// Compatibility date one day behind `now`, so a platform clock that lags
/// behind ours never rejects the upload.
pub fn compatibility_date(now: DateTime<Utc>) -> String {
    (now - ChronoDuration::days(1)).format("%Y-%m-%d").to_string()
}

/// Upload metadata for a fresh Worker script.
pub fn worker_metadata(bindings: &PanelBindings, compatibility_date: &str) -> Value {
    let mut entries = vec![json!({
        "name": NAMESPACE_BINDING,
        "namespace_id": bindings.namespace_id,
        "type": "kv_namespace",
    })];
    for (name, text) in bindings.variables() {
        entries.push(json!({ "name": name, "text": text, "type": "plain_text" }));
    }

    json!({
        "main_module": WORKER_MAIN_MODULE,
        "bindings": entries,
        "compatibility_date": compatibility_date,
        "compatibility_flags": [COMPATIBILITY_FLAG],
        "observability": { "enabled": false },
        "placement": {},
        "tags": [],
        "tail_consumers": [],
        "logpush": false,
        "usage_model": "standard",
    })
}

/// Project body for a Pages project with the panel variables in production.
pub fn pages_project_body(name: &str, bindings: &PanelBindings, compatibility_date: &str) -> Value {
    let mut env_vars = Map::new();
    for (key, value) in bindings.variables() {
        env_vars.insert(
            key.to_string(),
            json!({ "type": "plain_text", "value": value }),
        );
    }

    let mut kv_namespaces = Map::new();
    kv_namespaces.insert(
        NAMESPACE_BINDING.to_string(),
        json!({ "namespace_id": bindings.namespace_id }),
    );

    json!({
        "name": name,
        "production_branch": PAGES_BRANCH,
        "deployment_configs": {
            "production": {
                "compatibility_date": compatibility_date,
                "compatibility_flags": [COMPATIBILITY_FLAG],
                "env_vars": env_vars,
                "kv_namespaces": kv_namespaces,
            }
        }
    })
}

/// A non-idempotent request is only repeated when the platform refused it
/// outright (429); a 5xx or a lost response may already have created something.
fn is_retryable_cloudflare_status(status: StatusCode, idempotent: bool) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || (idempotent && status.is_server_error())
}

fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

fn retry_delay_ms(attempt: usize) -> u64 {
    let exp = 2u64.saturating_pow((attempt.saturating_sub(1)) as u32);
    CLOUDFLARE_RETRY_BASE_MS.saturating_mul(exp).min(5_000)
}

async fn send_cloudflare_request_with_retry<F, Fut>(
    mut make_request: F,
    action: &str,
    idempotent: bool,
) -> PlatformResult<reqwest::Response>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    for attempt in 1..=CLOUDFLARE_MAX_ATTEMPTS {
        match make_request().await {
            Ok(response) => {
                let status = response.status();
                if is_retryable_cloudflare_status(status, idempotent)
                    && attempt < CLOUDFLARE_MAX_ATTEMPTS
                {
                    let delay = retry_delay_ms(attempt);
                    tracing::warn!(
                        "{} returned {} (attempt {}/{}). Retrying in {}ms...",
                        action,
                        status,
                        attempt,
                        CLOUDFLARE_MAX_ATTEMPTS,
                        delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    continue;
                }
                return Ok(response);
            }
            Err(error) => {
                if idempotent
                    && is_retryable_transport_error(&error)
                    && attempt < CLOUDFLARE_MAX_ATTEMPTS
                {
                    let delay = retry_delay_ms(attempt);
                    tracing::warn!(
                        "{} transport error on attempt {}/{}: {}. Retrying in {}ms...",
                        action,
                        attempt,
                        CLOUDFLARE_MAX_ATTEMPTS,
                        error,
                        delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    continue;
                }
                return Err(error.into());
            }
        }
    }

    Err(PlatformError::Other(format!(
        "{} failed after {} attempts",
        action, CLOUDFLARE_MAX_ATTEMPTS
    )))
}

fn summarize_cloudflare_messages(
    errors: Option<&[CloudflareApiMessage]>,
    messages: Option<&[CloudflareApiMessage]>,
) -> String {
    let parts: Vec<String> = errors
        .into_iter()
        .flatten()
        .chain(messages.into_iter().flatten())
        .map(|m| match m.code {
            Some(code) => format!("{} ({})", m.message, code),
            None => m.message.clone(),
        })
        .collect();

    if parts.is_empty() {
        "Unknown Cloudflare API error".to_string()
    } else {
        parts.join("; ")
    }
}

fn decode_list_from_value<T: DeserializeOwned>(
    value: Value,
    keys: &[&str],
    context: &str,
) -> PlatformResult<Vec<T>> {
    let decode = |v: Value| {
        serde_json::from_value(v).map_err(|e| PlatformError::Decode {
            context: context.to_string(),
            message: e.to_string(),
        })
    };

    if value.is_array() {
        return decode(value);
    }

    if let Some(object) = value.as_object() {
        for key in keys {
            if let Some(candidate) = object.get(*key) {
                if candidate.is_array() {
                    return decode(candidate.clone());
                }
            }
        }
    }

    Err(PlatformError::Decode {
        context: context.to_string(),
        message: format!("list shape is unexpected: {}", value),
    })
}

async fn parse_cloudflare_response<T: DeserializeOwned>(
    response: reqwest::Response,
    context: &str,
) -> PlatformResult<T> {
    parse_cloudflare_page(response, context)
        .await
        .map(|(result, _)| result)
}

async fn parse_cloudflare_page<T: DeserializeOwned>(
    response: reqwest::Response,
    context: &str,
) -> PlatformResult<(T, Option<CloudflareResultInfo>)> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = match serde_json::from_str::<CloudflareApiResponse<Value>>(&body) {
            Ok(envelope) => summarize_cloudflare_messages(
                envelope.errors.as_deref(),
                envelope.messages.as_deref(),
            ),
            Err(_) => body,
        };
        return Err(PlatformError::Api {
            context: context.to_string(),
            status: status.as_u16(),
            message,
        });
    }

    let envelope: CloudflareApiResponse<T> =
        serde_json::from_str(&body).map_err(|e| PlatformError::Decode {
            context: context.to_string(),
            message: format!("{} (body: {})", e, body),
        })?;

    if !envelope.success {
        return Err(PlatformError::Rejected {
            context: context.to_string(),
            message: summarize_cloudflare_messages(
                envelope.errors.as_deref(),
                envelope.messages.as_deref(),
            ),
        });
    }

    Ok((envelope.result, envelope.result_info))
}

/// 404 means absent; any other failure is an error.
async fn parse_existence(response: reqwest::Response, context: &str) -> PlatformResult<bool> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(false);
    }
    if status.is_success() {
        return Ok(true);
    }
    parse_cloudflare_response::<Value>(response, context)
        .await
        .map(|_| true)
}

#[derive(Clone)]
pub struct CloudflareClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl CloudflareClient {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, context: &str) -> PlatformResult<T> {
        let url = self.url(path);
        let response = send_cloudflare_request_with_retry(
            || self.http.get(&url).bearer_auth(&self.api_token).send(),
            context,
            true,
        )
        .await?;
        parse_cloudflare_response(response, context).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &Value,
        context: &str,
    ) -> PlatformResult<T> {
        let url = self.url(path);
        let idempotent = method != reqwest::Method::POST;
        let response = send_cloudflare_request_with_retry(
            || {
                self.http
                    .request(method.clone(), &url)
                    .bearer_auth(&self.api_token)
                    .json(body)
                    .send()
            },
            context,
            idempotent,
        )
        .await?;
        parse_cloudflare_response(response, context).await
    }

    async fn delete(&self, path: &str, query: &[(&str, &str)], context: &str) -> PlatformResult<()> {
        let url = self.url(path);
        let response = send_cloudflare_request_with_retry(
            || {
                self.http
                    .delete(&url)
                    .bearer_auth(&self.api_token)
                    .query(query)
                    .send()
            },
            context,
            true,
        )
        .await?;
        let _: Value = parse_cloudflare_response(response, context).await?;
        Ok(())
    }

    async fn exists(&self, path: &str, context: &str) -> PlatformResult<bool> {
        let url = self.url(path);
        let response = send_cloudflare_request_with_retry(
            || self.http.get(&url).bearer_auth(&self.api_token).send(),
            context,
            true,
        )
        .await?;
        parse_existence(response, context).await
    }

    async fn put_worker_parts(
        &self,
        path: &str,
        metadata: Value,
        script: Vec<u8>,
        context: &str,
    ) -> PlatformResult<()> {
        let metadata_text = metadata.to_string();
        let url = self.url(path);
        let response = send_cloudflare_request_with_retry(
            || async {
                let metadata_part =
                    multipart::Part::text(metadata_text.clone()).mime_str("application/json")?;
                let script_part = multipart::Part::bytes(script.clone())
                    .file_name(WORKER_MAIN_MODULE)
                    .mime_str("application/javascript+module")?;
                let form = multipart::Form::new()
                    .part("metadata", metadata_part)
                    .part(WORKER_MAIN_MODULE, script_part);

                self.http
                    .put(&url)
                    .bearer_auth(&self.api_token)
                    .multipart(form)
                    .send()
                    .await
            },
            context,
            true,
        )
        .await?;
        let _: Value = parse_cloudflare_response(response, context).await?;
        Ok(())
    }
}

#[async_trait]
impl Platform for CloudflareClient {
    async fn list_accounts(&self) -> PlatformResult<Vec<Account>> {
        let result: Value = self.get_json("/accounts", "List accounts").await?;
        decode_list_from_value(result, &["accounts", "items"], "List accounts")
    }

    async fn create_namespace(
        &self,
        account_id: &str,
        title: &str,
    ) -> PlatformResult<NamespaceRef> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/accounts/{}/storage/kv/namespaces", account_id),
            &json!({ "title": title }),
            &format!("Create KV namespace {}", title),
        )
        .await
    }

    async fn get_namespace(&self, account_id: &str, id: &str) -> PlatformResult<NamespaceRef> {
        self.get_json(
            &format!("/accounts/{}/storage/kv/namespaces/{}", account_id, id),
            &format!("Get KV namespace {}", id),
        )
        .await
    }

    async fn list_namespaces(&self, account_id: &str) -> PlatformResult<Vec<NamespaceRef>> {
        let result: Value = self
            .get_json(
                &format!("/accounts/{}/storage/kv/namespaces", account_id),
                "List KV namespaces",
            )
            .await?;
        decode_list_from_value(result, &["namespaces", "items"], "List KV namespaces")
    }

    async fn delete_namespace(&self, account_id: &str, id: &str) -> PlatformResult<()> {
        self.delete(
            &format!("/accounts/{}/storage/kv/namespaces/{}", account_id, id),
            &[],
            &format!("Delete KV namespace {}", id),
        )
        .await
    }

    async fn worker_exists(&self, account_id: &str, name: &str) -> PlatformResult<bool> {
        self.exists(
            &format!("/accounts/{}/workers/scripts/{}", account_id, name),
            &format!("Get worker script {}", name),
        )
        .await
    }

    async fn upload_worker(
        &self,
        account_id: &str,
        name: &str,
        bindings: &PanelBindings,
        script: Vec<u8>,
    ) -> PlatformResult<()> {
        let metadata = worker_metadata(bindings, &compatibility_date(Utc::now()));
        self.put_worker_parts(
            &format!("/accounts/{}/workers/scripts/{}", account_id, name),
            metadata,
            script,
            &format!("Upload script {}", name),
        )
        .await
    }

    async fn update_worker_content(
        &self,
        account_id: &str,
        name: &str,
        script: Vec<u8>,
    ) -> PlatformResult<()> {
        self.put_worker_parts(
            &format!("/accounts/{}/workers/scripts/{}/content", account_id, name),
            json!({ "main_module": WORKER_MAIN_MODULE }),
            script,
            &format!("Update script content {}", name),
        )
        .await
    }

    async fn list_workers(&self, account_id: &str) -> PlatformResult<Vec<WorkerScript>> {
        let result: Value = self
            .get_json(
                &format!("/accounts/{}/workers/scripts", account_id),
                "List workers scripts",
            )
            .await?;
        decode_list_from_value(result, &["scripts", "items"], "List workers scripts")
    }

    async fn delete_worker(&self, account_id: &str, name: &str) -> PlatformResult<()> {
        self.delete(
            &format!("/accounts/{}/workers/scripts/{}", account_id, name),
            &[("force", "true")],
            &format!("Delete worker script {} (force)", name),
        )
        .await
    }

    async fn enable_worker_subdomain(&self, account_id: &str, name: &str) -> PlatformResult<()> {
        let _: Value = self
            .send_json(
                reqwest::Method::POST,
                &format!("/accounts/{}/workers/scripts/{}/subdomain", account_id, name),
                &json!({ "enabled": true, "previews_enabled": false }),
                &format!("Enable workers.dev for {}", name),
            )
            .await?;
        Ok(())
    }

    async fn workers_subdomain(&self, account_id: &str) -> PlatformResult<String> {
        let result: Value = self
            .get_json(
                &format!("/accounts/{}/workers/subdomain", account_id),
                "Get workers subdomain",
            )
            .await?;
        result
            .get("subdomain")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PlatformError::Decode {
                context: "Get workers subdomain".to_string(),
                message: "subdomain is missing".to_string(),
            })
    }

    async fn create_pages_project(
        &self,
        account_id: &str,
        name: &str,
        bindings: &PanelBindings,
    ) -> PlatformResult<PagesProject> {
        let body = pages_project_body(name, bindings, &compatibility_date(Utc::now()));
        self.send_json(
            reqwest::Method::POST,
            &format!("/accounts/{}/pages/projects", account_id),
            &body,
            &format!("Create Pages project {}", name),
        )
        .await
    }

    async fn pages_project_exists(&self, account_id: &str, name: &str) -> PlatformResult<bool> {
        self.exists(
            &format!("/accounts/{}/pages/projects/{}", account_id, name),
            &format!("Get Pages project {}", name),
        )
        .await
    }

    async fn get_pages_project(
        &self,
        account_id: &str,
        name: &str,
    ) -> PlatformResult<PagesProject> {
        self.get_json(
            &format!("/accounts/{}/pages/projects/{}", account_id, name),
            &format!("Get Pages project {}", name),
        )
        .await
    }

    async fn list_pages_projects(&self, account_id: &str) -> PlatformResult<Vec<PagesProject>> {
        let result: Value = self
            .get_json(
                &format!("/accounts/{}/pages/projects", account_id),
                "List Pages projects",
            )
            .await?;
        decode_list_from_value(result, &["projects", "items"], "List Pages projects")
    }

    async fn delete_pages_project(&self, account_id: &str, name: &str) -> PlatformResult<()> {
        self.delete(
            &format!("/accounts/{}/pages/projects/{}", account_id, name),
            &[],
            &format!("Delete Pages project {}", name),
        )
        .await
    }

    async fn create_pages_deployment(
        &self,
        account_id: &str,
        project: &str,
        script: Vec<u8>,
    ) -> PlatformResult<()> {
        let context = format!("Create Pages deployment for {}", project);
        let url = self.url(&format!(
            "/accounts/{}/pages/projects/{}/deployments",
            account_id, project
        ));
        let response = send_cloudflare_request_with_retry(
            || async {
                let bundle_part = multipart::Part::bytes(script.clone())
                    .file_name(PAGES_ENTRYPOINT)
                    .mime_str("application/javascript")?;
                let form = multipart::Form::new()
                    .text("manifest", "{}")
                    .text("branch", PAGES_BRANCH)
                    .part(PAGES_ENTRYPOINT, bundle_part);

                self.http
                    .post(&url)
                    .bearer_auth(&self.api_token)
                    .multipart(form)
                    .send()
                    .await
            },
            &context,
            false,
        )
        .await?;
        let _: Value = parse_cloudflare_response(response, &context).await?;
        Ok(())
    }

    async fn add_pages_domain(
        &self,
        account_id: &str,
        project: &str,
        domain: &str,
    ) -> PlatformResult<()> {
        let _: Value = self
            .send_json(
                reqwest::Method::POST,
                &format!("/accounts/{}/pages/projects/{}/domains", account_id, project),
                &json!({ "name": domain }),
                &format!("Add domain {} to {}", domain, project),
            )
            .await?;
        Ok(())
    }

    async fn list_pages_domains(
        &self,
        account_id: &str,
        project: &str,
    ) -> PlatformResult<Vec<PagesDomain>> {
        let context = format!("List domains of {}", project);
        let result: Value = self
            .get_json(
                &format!("/accounts/{}/pages/projects/{}/domains", account_id, project),
                &context,
            )
            .await?;
        decode_list_from_value(result, &["domains", "items"], &context)
    }

    async fn delete_pages_domain(
        &self,
        account_id: &str,
        project: &str,
        domain: &str,
    ) -> PlatformResult<()> {
        self.delete(
            &format!(
                "/accounts/{}/pages/projects/{}/domains/{}",
                account_id, project, domain
            ),
            &[],
            &format!("Delete domain {} from {}", domain, project),
        )
        .await
    }

    /// Every zone of the account, following `result_info.total_pages`.
    async fn list_zones(&self, account_id: &str) -> PlatformResult<Vec<Zone>> {
        let url = self.url("/zones");
        let mut zones = Vec::new();
        let mut page = 1u32;

        loop {
            let page_param = page.to_string();
            let response = send_cloudflare_request_with_retry(
                || {
                    self.http
                        .get(&url)
                        .bearer_auth(&self.api_token)
                        .query(&[
                            ("account.id", account_id),
                            ("per_page", ZONES_PER_PAGE),
                            ("page", page_param.as_str()),
                        ])
                        .send()
                },
                "List zones",
                true,
            )
            .await?;
            let (result, info): (Value, _) = parse_cloudflare_page(response, "List zones").await?;
            let batch: Vec<Zone> = decode_list_from_value(result, &["zones", "items"], "List zones")?;

            let fetched = batch.len();
            zones.extend(batch);
            let total_pages = info.map_or(page, |info| info.total_pages);
            if fetched == 0 || page >= total_pages {
                break;
            }
            page += 1;
        }

        tracing::debug!(zones = zones.len(), pages = page, "listed zones");
        Ok(zones)
    }

    async fn attach_worker_domain(
        &self,
        account_id: &str,
        zone_id: &str,
        hostname: &str,
        service: &str,
    ) -> PlatformResult<()> {
        let _: Value = self
            .send_json(
                reqwest::Method::PUT,
                &format!("/accounts/{}/workers/domains", account_id),
                &json!({
                    "environment": "production",
                    "hostname": hostname,
                    "service": service,
                    "zone_id": zone_id,
                }),
                &format!("Attach domain {} to {}", hostname, service),
            )
            .await?;
        Ok(())
    }
}

/// Creates a [`CloudflareClient`] per login against a fixed API base URL.
pub struct CloudflareConnector {
    base_url: String,
}

impl CloudflareConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Connector for CloudflareConnector {
    fn connect(&self, token: &Token) -> Arc<dyn Platform> {
        Arc::new(CloudflareClient::new(
            self.base_url.clone(),
            token.access_token.clone(),
        ))
    }
}
