//! Engine lifecycle tests driven by YAML configuration files.

use std::sync::Arc;

use futures::future::join_all;
use mcp_dispatch::{
    core::{SequentialSessionIssuer, StaticProfileResolver},
    testing::{error_result, text_result, tool, ScriptedConnector, ScriptedServer},
    CallContext, Engine, EngineCollaborators, EngineConfig, ExecutionRequest, LocalBlobStore,
    McpError,
};
use serde_json::{json, Map, Value};

const CONFIG: &str = r#"
servers:
  - name: search
    protocol: streamable
    url: https://search.example.com/mcp
  - name: offline
    protocol: sse
    url: https://offline.example.com/sse
custom_tools:
  - provider: gmail
    original_name: GMAIL_SEND_EMAIL
    custom_type: composio
    profile_id: prof_1
    description: Send an email through the broker
    input_schema:
      type: object
      properties:
        recipient: {type: string}
        body: {type: string}
      required: [recipient]
profiles:
  prof_1:
    url: https://broker.example.com/mcp/prof_1
    headers: {X-Api-Key: broker-key}
payload:
  max_items: 5
"#;

async fn load(dir: &tempfile::TempDir) -> EngineConfig {
    let path = dir.path().join("engine.yaml");
    tokio::fs::write(&path, CONFIG).await.unwrap();
    EngineConfig::from_file(&path).await.unwrap()
}

fn search_server() -> ScriptedServer {
    ScriptedServer::new().with_tools(vec![tool(
        "web_search",
        "Search the web",
        json!({
            "type": "object",
            "properties": {"instruction": {"type": "string"}, "limit": {"type": "integer"}},
            "required": ["instruction"]
        }),
    )])
}

#[tokio::test]
async fn test_engine_from_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let config = load(&dir).await;

    let connector = Arc::new(ScriptedConnector::new());
    let search = connector.add("search", search_server().with_fallback(text_result("3 hits")));
    connector.add("offline", ScriptedServer::new().failing_connect("connection refused"));

    let collaborators = EngineCollaborators::new(connector)
        .with_profiles(Arc::new(StaticProfileResolver::new(config.profiles.clone())));
    let engine = Engine::from_config(&config, collaborators).await.unwrap();

    assert_eq!(engine.manager().server_names(), vec!["search"]);

    let catalog = engine.list_tools();
    let listed: Vec<(&str, &str)> = catalog
        .tools
        .iter()
        .map(|t| (t.server.as_str(), t.name.as_str()))
        .collect();
    assert_eq!(
        listed,
        vec![("search", "web_search"), ("custom:gmail", "GMAIL_SEND_EMAIL")]
    );
    let summary = serde_json::to_value(&catalog.tools[1]).unwrap();
    assert_eq!(summary["inputSchema_summary"]["required"], json!(["recipient"]));

    let result = engine
        .execute("web_search", Map::from_iter([("query".to_string(), json!("rust mcp"))]))
        .await;
    assert!(result.success);
    assert_eq!(
        Value::Object(search.calls()[0].arguments.clone()),
        json!({"query": "rust mcp", "instruction": "rust mcp"})
    );

    engine.shutdown().await;
    assert!(engine.manager().server_names().is_empty());
}

#[tokio::test]
async fn test_broker_session_refresh_from_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let config = load(&dir).await;

    let connector = Arc::new(ScriptedConnector::new());
    connector.add("search", search_server());
    let broker = connector.add(
        "gmail:GMAIL_SEND_EMAIL",
        ScriptedServer::new().with_fallback(text_result("sent")),
    );
    broker.push_reply(Ok(error_result("HTTP 410: session is invalid")));

    let issuer = Arc::new(SequentialSessionIssuer::new("sess"));
    let collaborators = EngineCollaborators::new(connector)
        .with_profiles(Arc::new(StaticProfileResolver::new(config.profiles.clone())))
        .with_session_issuer(issuer.clone());
    let engine = Engine::from_config(&config, collaborators).await.unwrap();

    let request = ExecutionRequest::new(
        "mcp_gmail_GMAIL_SEND_EMAIL",
        Map::from_iter([("recipient".to_string(), json!("a@example.com"))]),
    );
    let result = engine
        .dispatch(request, &CallContext::for_thread("conversation-9"))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.attempts, 2);

    let calls = broker.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].headers["X-Session-Id"], "sess-1");
    assert_eq!(calls[1].headers["X-Session-Id"], "sess-2");
    assert_eq!(calls[1].headers["X-Api-Key"], "broker-key");
    assert_eq!(issuer.issued(), 2);
    assert_eq!(engine.metrics().snapshot().auth_retries, 1);
}

#[tokio::test]
async fn test_concurrent_calls_share_connection() {
    let dir = tempfile::tempdir().unwrap();
    let config = load(&dir).await;

    let connector = Arc::new(ScriptedConnector::new());
    let search = connector.add("search", search_server().with_fallback(text_result("ok")));
    connector.add("offline", ScriptedServer::new());

    let engine = Engine::from_config(&config, EngineCollaborators::new(connector.clone()))
        .await
        .unwrap();

    let calls = (0..8).map(|i| {
        engine.execute(
            "web_search",
            Map::from_iter([("instruction".to_string(), json!(format!("q{i}")))]),
        )
    });
    let results = join_all(calls).await;

    assert!(results.iter().all(|r| r.success));
    assert_eq!(search.call_count(), 8);
    // one session per server, opened at startup
    assert_eq!(connector.opened(), 2);

    let snapshot = engine.metrics().snapshot();
    assert_eq!(snapshot.total_executions, 8);
    assert_eq!(snapshot.active_executions, 0);
}

#[tokio::test]
async fn test_large_result_persisted_to_local_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = load(&dir).await;

    let rows: Vec<Value> = (0..6).map(|i| json!({"rank": i, "url": format!("https://r/{i}")})).collect();
    let connector = Arc::new(ScriptedConnector::new());
    connector.add(
        "search",
        search_server().with_fallback(text_result(Value::Array(rows.clone()).to_string())),
    );
    connector.add("offline", ScriptedServer::new());

    let blobs = dir.path().join("blobs");
    let collaborators = EngineCollaborators::new(connector)
        .with_blob_store(Arc::new(LocalBlobStore::new(&blobs, None)));
    let engine = Engine::from_config(&config, collaborators).await.unwrap();

    let result = engine.execute("web_search", Map::new()).await;
    assert!(result.success);
    assert_eq!(result.content["summary"]["items"], json!(6));
    assert_eq!(result.content["summary"]["sample_keys"], json!(["rank", "url"]));

    let url = result.content["storage"]["url"].as_str().unwrap();
    let stored = tokio::fs::read_to_string(url.trim_start_matches("file://"))
        .await
        .unwrap();
    assert_eq!(serde_json::from_str::<Value>(&stored).unwrap(), Value::Array(rows));
}

#[tokio::test]
async fn test_invalid_config_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.yaml");
    tokio::fs::write(
        &path,
        "servers:\n  - name: a\n    protocol: stdio\n    command: run\n  - name: a\n    protocol: stdio\n    command: run\n",
    )
    .await
    .unwrap();

    let err = EngineConfig::from_file(&path).await.unwrap_err();
    assert!(matches!(err, McpError::Config(msg) if msg.contains("duplicate")));

    let missing = EngineConfig::from_file(dir.path().join("missing.yaml")).await;
    assert!(matches!(missing, Err(McpError::Io(_))));
}
