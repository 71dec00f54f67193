//! End-to-end JSON-RPC scenarios driven over in-memory buffers against a
//! mocked upstream ELN API (spec §8.4).

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eln_mcp_bridge::audit::{AuditEmitter, AuditSink};
use eln_mcp_bridge::auth::{AuthConfig, AuthMode, AuthManager};
use eln_mcp_bridge::folder_path::FolderPath;
use eln_mcp_bridge::http_client::{HttpClient, HttpClientConfig};
use eln_mcp_bridge::protocol::ProtocolDispatcher;
use eln_mcp_bridge::resources::ResourceManager;
use eln_mcp_bridge::scope::ScopeConfig;
use secrecy::SecretString;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct CollectingSink(Mutex<Vec<String>>);

impl AuditSink for CollectingSink {
    fn write_line(&self, line: String) {
        self.0.lock().unwrap().push(line);
    }
}

fn api_key_config(base_url: String) -> AuthConfig {
    AuthConfig {
        mode: AuthMode::ApiKey,
        access_key_id: "AK".to_string(),
        access_password: SecretString::new("SECRET".to_string().into()),
        username: None,
        api_base_url: base_url,
    }
}

/// Build a fully-wired dispatcher against a mock upstream server.
async fn build_dispatcher(
    server: &MockServer,
    scope: ScopeConfig,
) -> (ProtocolDispatcher, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
    let emitter = AuditEmitter::spawn(sink.clone(), 64);
    let audit = emitter.handle();

    let auth_config = api_key_config(server.uri());
    let auth_manager = Arc::new(AuthManager::new(auth_config, audit.clone()));

    let http_config = HttpClientConfig {
        base_url: server.uri(),
        max_retries: 1,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        ..HttpClientConfig::default()
    };
    let http_client = Arc::new(HttpClient::new(http_config, auth_manager.clone()).unwrap());
    auth_manager.wire_http_client(http_client.clone());

    let resources = Arc::new(ResourceManager::new(http_client, auth_manager, scope, audit));
    (ProtocolDispatcher::new(resources, emitter.handle()), sink)
}

async fn run_one_request(dispatcher: &ProtocolDispatcher, request: Value) -> Value {
    let input = format!("{request}\n");
    let reader = Cursor::new(input.into_bytes());
    let mut output = Vec::new();

    dispatcher
        .run(reader, &mut output, Arc::new(tokio::sync::Notify::new()))
        .await
        .unwrap();

    let text = String::from_utf8(output).unwrap();
    let line = text.lines().next().expect("dispatcher produced no response line");
    serde_json::from_str(line).unwrap()
}

fn mount_user_info(server: &MockServer) -> impl std::future::Future<Output = ()> + '_ {
    Mock::given(method("GET"))
        .and(path("/users/user_info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "user_id": "U1" })))
        .mount(server)
}

#[tokio::test]
async fn scenario_1_simple_listing_no_scope() {
    let server = MockServer::start().await;
    mount_user_info(&server).await;

    Mock::given(method("GET"))
        .and(path("/notebooks/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "notebooks": [
                { "id": "N1", "name": "Alpha" },
                { "id": "N2", "name": "Beta" },
            ]
        })))
        .mount(&server)
        .await;

    let (dispatcher, sink) = build_dispatcher(&server, ScopeConfig::Unscoped).await;

    let response = run_one_request(
        &dispatcher,
        json!({ "jsonrpc": "2.0", "id": 1, "method": "resources/list", "params": {} }),
    )
    .await;

    let resources = response["result"]["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 2);
    assert_eq!(resources[0]["uri"], "eln://notebook/N1");
    assert_eq!(resources[0]["name"], "Alpha");
    assert_eq!(resources[1]["uri"], "eln://notebook/N2");

    tokio::time::sleep(Duration::from_millis(20)).await;
    let lines = sink.0.lock().unwrap();
    assert!(lines.iter().any(|l| l.contains("\"auth_success\"")));
    assert!(lines.iter().any(|l| l.contains("\"resource_list\"") && l.contains("\"ok\"")));
}

#[tokio::test]
async fn scenario_2_exact_folder_scope_rejects_substring_match() {
    let server = MockServer::start().await;
    mount_user_info(&server).await;

    Mock::given(method("GET"))
        .and(path("/notebooks/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "notebooks": [ { "id": "N1", "name": "Alpha" } ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/pages/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pages": [
                { "id": "P1", "notebook_id": "N1", "folder": "Chem" },
                { "id": "P2", "notebook_id": "N1", "folder": "Chemistry" },
            ]
        })))
        .mount(&server)
        .await;

    let scope = ScopeConfig::ByFolderPath(FolderPath::from_raw("Chem"));
    let (dispatcher, _sink) = build_dispatcher(&server, scope).await;

    let response = run_one_request(
        &dispatcher,
        json!({ "jsonrpc": "2.0", "id": 2, "method": "resources/list", "params": {} }),
    )
    .await;

    let uris: Vec<String> = response["result"]["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["uri"].as_str().unwrap().to_string())
        .collect();

    assert!(uris.contains(&"eln://notebook/N1/page/P1".to_string()));
    assert!(!uris.contains(&"eln://notebook/N1/page/P2".to_string()));
}

#[tokio::test]
async fn scenario_3_out_of_scope_read_yields_scope_violation() {
    let server = MockServer::start().await;
    mount_user_info(&server).await;

    Mock::given(method("GET"))
        .and(path("/pages/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pages": [ { "id": "P9", "notebook_id": "N2", "folder": "" } ]
        })))
        .mount(&server)
        .await;

    let scope = ScopeConfig::ByNotebookId("N1".to_string());
    let (dispatcher, sink) = build_dispatcher(&server, scope).await;

    let response = run_one_request(
        &dispatcher,
        json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "resources/read",
            "params": { "uri": "eln://notebook/N2/page/P9" }
        }),
    )
    .await;

    assert_eq!(response["error"]["code"], -32000);
    assert_eq!(response["error"]["message"], "ScopeViolation");
    assert_eq!(
        response["error"]["data"]["kind"],
        "NotebookOutsideConfiguredNotebook"
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    let lines = sink.0.lock().unwrap();
    assert!(lines.iter().any(|l| l.contains("\"scope_violation\"")
        && l.contains("NotebookOutsideConfiguredNotebook")));
}

#[tokio::test]
async fn scenario_4_transparent_session_refresh_on_401() {
    let server = MockServer::start().await;
    mount_user_info(&server).await;

    Mock::given(method("GET"))
        .and(path("/notebooks/list"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/notebooks/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "notebooks": [ { "id": "N1", "name": "Alpha" } ]
        })))
        .with_priority(2)
        .mount(&server)
        .await;

    let (dispatcher, sink) = build_dispatcher(&server, ScopeConfig::Unscoped).await;

    let response = run_one_request(
        &dispatcher,
        json!({ "jsonrpc": "2.0", "id": 1, "method": "resources/list", "params": {} }),
    )
    .await;

    assert!(response.get("result").is_some(), "expected success after transparent re-auth");
    let resources = response["result"]["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let lines = sink.0.lock().unwrap();
    assert!(lines.iter().any(|l| l.contains("\"auth_refresh\"")));
}

#[tokio::test]
async fn scenario_5_second_401_surfaces_as_authentication_error() {
    let server = MockServer::start().await;
    mount_user_info(&server).await;

    Mock::given(method("GET"))
        .and(path("/notebooks/list"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (dispatcher, _sink) = build_dispatcher(&server, ScopeConfig::Unscoped).await;

    let response = run_one_request(
        &dispatcher,
        json!({ "jsonrpc": "2.0", "id": 11, "method": "resources/list", "params": {} }),
    )
    .await;

    assert_eq!(response["error"]["code"], -32001);
    assert_eq!(response["error"]["message"], "Authentication failed");
}

#[tokio::test]
async fn scenario_6_sensitive_query_params_never_appear_in_audit_stream() {
    let server = MockServer::start().await;
    mount_user_info(&server).await;

    Mock::given(method("GET"))
        .and(path("/notebooks/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "notebooks": [] })))
        .mount(&server)
        .await;

    let (dispatcher, sink) = build_dispatcher(&server, ScopeConfig::Unscoped).await;

    run_one_request(
        &dispatcher,
        json!({ "jsonrpc": "2.0", "id": 1, "method": "resources/list", "params": {} }),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    let lines = sink.0.lock().unwrap();
    let joined = lines.join("\n");
    assert!(!joined.contains("SECRET"));
}
