// Integration tests for the Cloudflare REST client against a local mock API

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Json;
use axum::Router;
use bpb_wizard::cloudflare::CloudflareClient;
use bpb_wizard::platform::{match_zone, PanelBindings, Platform, PlatformError};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    query: String,
    authorization: String,
    body: String,
}

type Log = Arc<Mutex<Vec<Recorded>>>;

fn ok(result: Value) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "success": true, "errors": [], "messages": [], "result": result })),
    )
}

fn ok_page(result: Value, page: u32, total_pages: u32) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "errors": [],
            "messages": [],
            "result": result,
            "result_info": { "page": page, "per_page": 50, "total_pages": total_pages },
        })),
    )
}

fn paged_zones(query: &str) -> (StatusCode, Json<Value>) {
    if query.contains("&page=2") {
        return ok_page(json!([{ "id": "z-target", "name": "example.com" }]), 2, 2);
    }
    let filler: Vec<Value> = (0..50)
        .map(|i| json!({ "id": format!("z-fill-{}", i), "name": format!("filler{}.net", i) }))
        .collect();
    ok_page(Value::Array(filler), 1, 2)
}

fn fail(status: StatusCode, code: i64, message: &str) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({
            "success": false,
            "errors": [{ "code": code, "message": message }],
            "messages": [],
            "result": null,
        })),
    )
}

async fn mock_api(
    State(log): State<Log>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let path = uri.path().to_string();
    let query = uri.query().unwrap_or_default().to_string();
    log.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        query: query.clone(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match (method.as_str(), segments.as_slice()) {
        ("GET", ["accounts"]) => ok(json!([{ "id": "acc-1", "name": "Me" }])),
        ("POST", ["accounts", "acc-flaky", "storage", "kv", "namespaces"]) => {
            fail(StatusCode::SERVICE_UNAVAILABLE, 10013, "Service unavailable")
        }
        ("POST", ["accounts", _, "storage", "kv", "namespaces"]) => {
            let request: Value = serde_json::from_slice(&body).unwrap_or_default();
            ok(json!({ "id": "ns-1", "title": request["title"] }))
        }
        ("GET", ["accounts", _, "workers", "scripts", "taken"]) => ok(json!({ "id": "taken" })),
        ("GET", ["accounts", _, "workers", "scripts", _]) => {
            fail(StatusCode::NOT_FOUND, 10007, "workers.api.error.script_not_found")
        }
        ("GET", ["accounts", _, "workers", "scripts"]) => {
            ok(json!([{ "id": "panel-a" }, { "id": "panel-b" }]))
        }
        ("PUT", ["accounts", _, "workers", "scripts", _])
        | ("PUT", ["accounts", _, "workers", "scripts", _, "content"]) => ok(json!({})),
        ("DELETE", ["accounts", _, "workers", "scripts", _]) => ok(Value::Null),
        ("GET", ["accounts", _, "workers", "subdomain"]) => ok(json!({ "subdomain": "me" })),
        ("GET", ["accounts", _, "pages", "projects"]) => {
            ok(json!([{ "name": "pages-panel", "subdomain": "pages-panel.pages.dev" }]))
        }
        ("GET", ["accounts", _, "pages", "projects", "forbidden"]) => {
            fail(StatusCode::FORBIDDEN, 10000, "Authentication error")
        }
        ("POST", ["accounts", _, "pages", "projects", _, "domains"]) => {
            fail(StatusCode::OK, 8000018, "Domain already exists")
        }
        ("GET", ["zones"]) if query.contains("account.id=acc-many") => paged_zones(&query),
        ("GET", ["zones"]) => ok(json!([
            { "id": "z-1", "name": "example.com" },
            { "id": "z-2", "name": "other.org" },
        ])),
        ("PUT", ["accounts", _, "workers", "domains"]) => ok(json!({ "id": "d-1" })),
        _ => fail(StatusCode::NOT_FOUND, 7003, "No route for that URI"),
    }
}

async fn start() -> (CloudflareClient, Log) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().fallback(mock_api).with_state(log.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let client = CloudflareClient::new(format!("http://{}/", addr), "test-token");
    (client, log)
}

fn bindings() -> PanelBindings {
    PanelBindings {
        namespace_id: "ns-1".to_string(),
        uuid: "4f1c0b9e-6a53-4e0c-9d07-0d5a3f0f4c11".to_string(),
        trojan_password: "Passw0rd!".to_string(),
        proxy_ips: "bpb.yousef.isegaro.com".to_string(),
        fallback: "speed.cloudflare.com".to_string(),
        sub_path: "subpath".to_string(),
    }
}

#[tokio::test]
async fn test_list_accounts_sends_bearer_token() {
    let (client, log) = start().await;

    let accounts = client.list_accounts().await.unwrap();

    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].id, "acc-1");
    let log = log.lock().unwrap();
    assert_eq!(log[0].authorization, "Bearer test-token");
}

#[tokio::test]
async fn test_create_namespace_posts_title() {
    let (client, log) = start().await;

    let namespace = client
        .create_namespace("acc-1", "panel-kv-2025-01-01_00-00-00")
        .await
        .unwrap();

    assert_eq!(namespace.id, "ns-1");
    assert_eq!(namespace.title, "panel-kv-2025-01-01_00-00-00");
    let log = log.lock().unwrap();
    assert_eq!(log[0].path, "/accounts/acc-1/storage/kv/namespaces");
}

#[tokio::test]
async fn test_worker_existence_maps_not_found_to_false() {
    let (client, _) = start().await;

    assert!(client.worker_exists("acc-1", "taken").await.unwrap());
    assert!(!client.worker_exists("acc-1", "free-name").await.unwrap());
}

#[tokio::test]
async fn test_upload_worker_sends_metadata_and_module() {
    let (client, log) = start().await;

    client
        .upload_worker("acc-1", "my-panel", &bindings(), b"export default {}".to_vec())
        .await
        .unwrap();

    let log = log.lock().unwrap();
    let upload = &log[0];
    assert_eq!(upload.method, Method::PUT);
    assert_eq!(upload.path, "/accounts/acc-1/workers/scripts/my-panel");
    assert!(upload.body.contains("name=\"metadata\""));
    assert!(upload.body.contains("\"kv_namespace\""));
    assert!(upload.body.contains("\"TR_PASS\""));
    assert!(upload.body.contains("application/javascript+module"));
    assert!(upload.body.contains("export default {}"));
}

#[tokio::test]
async fn test_update_worker_content_only_sends_script() {
    let (client, log) = start().await;

    client
        .update_worker_content("acc-1", "my-panel", b"// new".to_vec())
        .await
        .unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log[0].path, "/accounts/acc-1/workers/scripts/my-panel/content");
    assert!(!log[0].body.contains("kv_namespace"));
    assert!(log[0].body.contains("// new"));
}

#[tokio::test]
async fn test_delete_worker_is_forced() {
    let (client, log) = start().await;

    client.delete_worker("acc-1", "panel-a").await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log[0].method, Method::DELETE);
    assert_eq!(log[0].query, "force=true");
}

#[tokio::test]
async fn test_listings_and_subdomain() {
    let (client, _) = start().await;

    let workers = client.list_workers("acc-1").await.unwrap();
    assert_eq!(workers.len(), 2);

    let projects = client.list_pages_projects("acc-1").await.unwrap();
    assert_eq!(projects[0].name, "pages-panel");
    assert_eq!(projects[0].subdomain, "pages-panel.pages.dev");

    assert_eq!(client.workers_subdomain("acc-1").await.unwrap(), "me");
}

#[tokio::test]
async fn test_api_error_carries_status_and_messages() {
    let (client, _) = start().await;

    let err = client
        .get_pages_project("acc-1", "forbidden")
        .await
        .unwrap_err();

    match err {
        PlatformError::Api {
            status, message, ..
        } => {
            assert_eq!(status, 403);
            assert_eq!(message, "Authentication error (10000)");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_unsuccessful_envelope_is_rejected() {
    let (client, _) = start().await;

    let err = client
        .add_pages_domain("acc-1", "pages-panel", "panel.example.com")
        .await
        .unwrap_err();

    assert!(matches!(err, PlatformError::Rejected { .. }));
    assert!(err.to_string().contains("Domain already exists"));
}

#[tokio::test]
async fn test_zones_are_scoped_to_account() {
    let (client, log) = start().await;

    let zones = client.list_zones("acc-1").await.unwrap();
    assert_eq!(zones.len(), 2);

    client
        .attach_worker_domain("acc-1", "z-1", "panel.example.com", "my-panel")
        .await
        .unwrap();

    let log = log.lock().unwrap();
    assert!(log[0].query.contains("account.id=acc-1"));
    let attach: Value = serde_json::from_str(&log[1].body).unwrap();
    assert_eq!(attach["hostname"], "panel.example.com");
    assert_eq!(attach["service"], "my-panel");
    assert_eq!(attach["zone_id"], "z-1");
}

#[tokio::test]
async fn test_zone_on_second_page_is_found() {
    let (client, log) = start().await;

    let zones = client.list_zones("acc-many").await.unwrap();

    assert_eq!(zones.len(), 51);
    let zone = match_zone("panel.example.com", &zones).unwrap();
    assert_eq!(zone.id, "z-target");

    let log = log.lock().unwrap();
    let pages: Vec<&str> = log.iter().map(|r| r.query.as_str()).collect();
    assert_eq!(pages.len(), 2);
    assert!(pages[0].contains("page=1"));
    assert!(pages[1].contains("&page=2"));
}

#[tokio::test]
async fn test_single_page_zone_listing_stops_without_result_info() {
    let (client, log) = start().await;

    let zones = client.list_zones("acc-1").await.unwrap();

    assert_eq!(zones.len(), 2);
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_create_is_not_resent() {
    let (client, log) = start().await;

    let err = client
        .create_namespace("acc-flaky", "panel-kv")
        .await
        .unwrap_err();

    match err {
        PlatformError::Api { status, .. } => assert_eq!(status, 503),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(log.lock().unwrap().len(), 1);
}
