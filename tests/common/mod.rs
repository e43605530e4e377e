//! Common test utilities and helpers

#![allow(dead_code)]

use kg_core::storage::{ConnectionMode, RetryPolicy};
use kg_core::{GraphEngine, LibsqlGraphStore, McpServer, ServerExit, ToolRegistry};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;

/// File-backed store in a temporary directory, bound to `test/knowledge`
pub async fn create_test_store() -> (LibsqlGraphStore, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("knowledge.db");

    let store = LibsqlGraphStore::open(
        ConnectionMode::Local(db_path.to_string_lossy().to_string()),
        "test",
        "knowledge",
        RetryPolicy::none(),
    )
    .await
    .expect("Failed to create test store");

    (store, temp_dir)
}

pub async fn create_test_engine() -> (GraphEngine, TempDir) {
    let (store, temp_dir) = create_test_store().await;
    (GraphEngine::new(Arc::new(store)), temp_dir)
}

pub async fn create_test_server() -> (McpServer, TempDir) {
    let (engine, temp_dir) = create_test_engine().await;
    (McpServer::new(ToolRegistry::new(engine)), temp_dir)
}

/// Feed `input` to a server, close its input, and collect every output line
pub async fn run_session(server: McpServer, input: &str) -> (ServerExit, Vec<Value>) {
    let (mut client_in, server_in) = tokio::io::duplex(64 * 1024);
    let (server_out, client_out) = tokio::io::duplex(64 * 1024);

    let handle = tokio::spawn(server.serve(server_in, server_out));
    client_in
        .write_all(input.as_bytes())
        .await
        .expect("Failed to write input");
    drop(client_in);

    let mut lines = BufReader::new(client_out).lines();
    let mut messages = Vec::new();
    while let Some(line) = lines.next_line().await.expect("Failed to read output") {
        messages.push(serde_json::from_str(&line).expect("Output line is not JSON"));
    }

    let exit = handle
        .await
        .expect("Server task panicked")
        .expect("Server failed");
    (exit, messages)
}

/// A client connected to a running server over held-open streams
pub struct LiveSession {
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
    handle: JoinHandle<kg_core::Result<ServerExit>>,
}

impl LiveSession {
    pub fn start(server: McpServer) -> Self {
        let (input, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, client_out) = tokio::io::duplex(64 * 1024);
        let handle = tokio::spawn(server.serve(server_in, server_out));
        Self {
            input,
            output: BufReader::new(client_out).lines(),
            handle,
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.input
            .write_all(line.as_bytes())
            .await
            .expect("Failed to write input");
    }

    /// Next output line, decoded
    pub async fn next_message(&mut self) -> Value {
        let line = self
            .output
            .next_line()
            .await
            .expect("Failed to read output")
            .expect("Server closed its output");
        serde_json::from_str(&line).expect("Output line is not JSON")
    }

    /// Send one line and wait for the message that answers it
    pub async fn call(&mut self, line: &str) -> Value {
        self.send(line).await;
        self.next_message().await
    }

    /// Close input and wait for the server to finish
    pub async fn finish(self) -> ServerExit {
        drop(self.input);
        self.handle
            .await
            .expect("Server task panicked")
            .expect("Server failed")
    }
}

/// One JSON-RPC request line
pub fn request(id: i64, method: &str, params: Value) -> String {
    format!(
        "{}\n",
        serde_json::json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
    )
}

/// One `tools/call` request line
pub fn tool_call(id: i64, tool: &str, arguments: Value) -> String {
    request(
        id,
        "tools/call",
        serde_json::json!({"name": tool, "arguments": arguments}),
    )
}

/// Decode the text content of a successful tool response
pub fn tool_payload(response: &Value) -> Value {
    let text = response["result"]["content"][0]["text"]
        .as_str()
        .expect("Tool response has no text content");
    serde_json::from_str(text).expect("Tool text is not JSON")
}

/// Find the response for `id` (tool calls may complete out of order)
pub fn response_for(messages: &[Value], id: i64) -> &Value {
    messages
        .iter()
        .find(|m| m["id"] == id)
        .unwrap_or_else(|| panic!("No response for id {}", id))
}
