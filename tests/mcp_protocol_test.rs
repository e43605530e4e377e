//! End-to-end protocol sessions over an in-process byte stream

mod common;

use common::{
    create_test_server, request, response_for, run_session, tool_call, tool_payload, LiveSession,
};
use kg_core::ServerExit;
use serde_json::json;

fn initialize() -> String {
    request(
        1,
        "initialize",
        json!({"protocolVersion": "2024-11-05", "clientInfo": {"name": "test-client"}}),
    )
}

#[tokio::test]
async fn test_create_twice_then_read_graph() {
    let (server, _temp) = create_test_server().await;
    let mut session = LiveSession::start(server);
    let entities = json!({"entities": [{"name": "A", "entityType": "T", "observations": ["o1"]}]});

    let init = session.call(&initialize()).await;
    assert_eq!(init["id"], 1);
    assert!(init["result"]["protocolVersion"].is_string());
    let ready = session.next_message().await;
    assert_eq!(ready["method"], "initialized");
    assert!(ready.get("id").is_none());

    let first = session
        .call(&tool_call(2, "create_entities", entities.clone()))
        .await;
    assert_eq!(first["id"], 2);
    let created = tool_payload(&first);
    let names: Vec<&str> = created
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["A"]);

    let second = session
        .call(&tool_call(3, "create_entities", entities))
        .await;
    assert_eq!(second["id"], 3);
    assert_eq!(tool_payload(&second), json!([]));

    let read = session.call(&tool_call(4, "read_graph", json!({}))).await;
    assert_eq!(read["id"], 4);
    let graph = tool_payload(&read);
    let stored = graph["entities"].as_array().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["name"], "A");
    assert_eq!(stored[0]["observations"][0]["text"], "o1");
    assert!(graph["relations"].as_array().unwrap().is_empty());

    assert_eq!(session.finish().await, ServerExit::EndOfInput);
}

#[tokio::test]
async fn test_sequential_sessions_share_the_store() {
    let (store, _temp) = common::create_test_store().await;
    let engine = kg_core::GraphEngine::new(std::sync::Arc::new(store));
    let registry = kg_core::ToolRegistry::new(engine.clone());
    let entities = json!({"entities": [{"name": "A", "entityType": "T", "observations": ["o1"]}]});

    let (_, out) = run_session(
        kg_core::McpServer::new(registry),
        &[initialize(), tool_call(2, "create_entities", entities.clone())].concat(),
    )
    .await;
    let created = tool_payload(response_for(&out, 2));
    assert_eq!(created.as_array().unwrap().len(), 1);
    assert_eq!(created[0]["name"], "A");

    let (_, out) = run_session(
        kg_core::McpServer::new(kg_core::ToolRegistry::new(engine.clone())),
        &[initialize(), tool_call(3, "create_entities", entities)].concat(),
    )
    .await;
    assert!(tool_payload(response_for(&out, 3)).as_array().unwrap().is_empty());

    let (_, out) = run_session(
        kg_core::McpServer::new(kg_core::ToolRegistry::new(engine)),
        &[initialize(), tool_call(4, "read_graph", json!({}))].concat(),
    )
    .await;
    let graph = tool_payload(response_for(&out, 4));
    assert_eq!(graph["entities"].as_array().unwrap().len(), 1);
    assert_eq!(graph["entities"][0]["name"], "A");
}

#[tokio::test]
async fn test_unknown_method_and_notification_silence() {
    let (server, _temp) = create_test_server().await;
    let input = [
        initialize(),
        request(2, "tools/destroy", json!({})),
        "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n".to_string(),
        "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/cancelled\",\"params\":{\"requestId\":9}}\n"
            .to_string(),
        "{\"jsonrpc\":\"2.0\",\"method\":\"some/other\"}\n".to_string(),
    ]
    .concat();

    let (exit, out) = run_session(server, &input).await;
    assert_eq!(exit, ServerExit::EndOfInput);
    assert_eq!(out.len(), 3);
    assert_eq!(out[2]["id"], 2);
    assert_eq!(out[2]["error"]["code"], -32601);
    assert_eq!(out[2]["error"]["message"], "Method not found: tools/destroy");
}

#[tokio::test]
async fn test_tool_call_before_initialize_is_rejected() {
    let (server, _temp) = create_test_server().await;
    let input = [
        tool_call(1, "read_graph", json!({})),
        initialize(),
        tool_call(2, "read_graph", json!({})),
    ]
    .concat();

    let (_, out) = run_session(server, &input).await;
    let rejected = response_for(&out, 1);
    assert_eq!(rejected["error"]["code"], -32002);
    assert_eq!(rejected["error"]["message"], "Server not initialized");

    let graph = tool_payload(response_for(&out, 2));
    assert!(graph["entities"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_tools_list_advertises_nine_tools() {
    let (server, _temp) = create_test_server().await;
    let input = [
        initialize(),
        request(2, "tools/list", json!({})),
        request(3, "mcp.listTools", json!({})),
        request(4, "prompts/list", json!({})),
        request(5, "resources/list", json!({})),
    ]
    .concat();

    let (_, out) = run_session(server, &input).await;
    let tools = response_for(&out, 2)["result"]["tools"].as_array().unwrap().clone();
    assert_eq!(tools.len(), 9);
    assert!(tools.iter().all(|t| t["inputSchema"]["type"] == "object"));
    assert_eq!(response_for(&out, 3)["result"]["tools"], json!(tools));
    assert_eq!(response_for(&out, 4)["result"], json!({"prompts": []}));
    assert_eq!(response_for(&out, 5)["result"], json!({"resources": []}));
}

#[tokio::test]
async fn test_repeated_initialize_is_reacknowledged() {
    let (server, _temp) = create_test_server().await;
    let input = [initialize(), request(2, "initialize", json!({}))].concat();

    let (_, out) = run_session(server, &input).await;
    assert_eq!(out.len(), 4);
    assert_eq!(out[2]["id"], 2);
    assert_eq!(out[2]["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(out[3]["method"], "initialized");
}

#[tokio::test]
async fn test_shutdown_then_exit_is_clean() {
    let (server, _temp) = create_test_server().await;
    let input = [
        initialize(),
        request(2, "shutdown", json!({})),
        request(3, "tools/call", json!({"name": "read_graph"})),
        request(4, "ping", json!({})),
        "{\"jsonrpc\":\"2.0\",\"method\":\"exit\"}\n".to_string(),
        request(5, "tools/list", json!({})),
    ]
    .concat();

    let (exit, out) = run_session(server, &input).await;
    assert_eq!(exit, ServerExit::Exit { clean: true });
    assert_eq!(response_for(&out, 2)["result"], serde_json::Value::Null);
    assert_eq!(response_for(&out, 3)["error"]["code"], -32600);
    assert_eq!(response_for(&out, 4)["result"], json!({}));
    assert!(out.iter().all(|m| m["id"] != 5), "nothing is read after exit");
}

#[tokio::test]
async fn test_invalid_arguments_map_to_invalid_params() {
    let (server, _temp) = create_test_server().await;
    let input = [
        initialize(),
        tool_call(2, "open_nodes", json!({"names": "A"})),
        tool_call(3, "no_such_tool", json!({})),
        tool_call(
            4,
            "add_observations",
            json!({"observations": [{"entityName": "Ghost", "contents": ["x"]}]}),
        ),
    ]
    .concat();

    let (_, out) = run_session(server, &input).await;

    let invalid = response_for(&out, 2);
    assert_eq!(invalid["error"]["code"], -32602);
    assert!(invalid["error"]["message"].as_str().unwrap().contains("names"));

    let unknown = response_for(&out, 3);
    assert_eq!(unknown["error"]["code"], -32000);
    assert_eq!(
        unknown["error"]["message"],
        "Tool 'no_such_tool' failed: Unknown tool: no_such_tool"
    );

    let missing = response_for(&out, 4);
    assert_eq!(missing["error"]["code"], -32000);
    assert!(missing["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Entity with name Ghost not found"));
}

#[tokio::test]
async fn test_chunked_and_noisy_input_is_tolerated() {
    let (server, _temp) = create_test_server().await;
    let input = format!(
        "\n\r\n{}   \n{}\r\n[1,2,3]\n",
        initialize().trim_end(),
        request(2, "ping", json!({})).trim_end()
    );

    let (_, out) = run_session(server, &input).await;
    assert_eq!(out.len(), 3);
    assert_eq!(response_for(&out, 2)["result"], json!({}));
}
