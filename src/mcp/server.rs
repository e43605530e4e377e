//! MCP server with stdio transport
//!
//! One dispatch loop reads frames and classifies them in order. Handshake,
//! listing and error replies are produced inline; `tools/call` runs as its own
//! task so slow store calls never block the loop. Every outbound message goes
//! through a single writer task, which keeps lines whole on the wire.

use super::framer::{self, FrameCodec, DEFAULT_MAX_FRAME_BYTES};
use super::protocol::{
    classify, IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcResponse,
    OutgoingMessage, RequestId,
};
use super::state::{gate_for, Admission, ServerState};
use super::tools::ToolRegistry;
use crate::error::{KgError, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

/// MCP protocol revision announced in the `initialize` reply
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// How the serve loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerExit {
    /// Input stream closed
    EndOfInput,
    /// `exit` notification; `clean` when it followed `shutdown`
    Exit { clean: bool },
}

impl ServerExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            ServerExit::EndOfInput | ServerExit::Exit { clean: true } => 0,
            ServerExit::Exit { clean: false } => 1,
        }
    }
}

type Outbox = mpsc::UnboundedSender<OutgoingMessage>;

/// MCP server that handles JSON-RPC requests over a byte stream
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    state: ServerState,
    max_frame_bytes: usize,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            state: ServerState::Uninitialized,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Serve on the process's stdin/stdout
    pub async fn run(self) -> Result<ServerExit> {
        info!("MCP server started, listening on stdin...");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve until `exit` or end of input, then drain in-flight calls
    pub async fn serve<R, W>(mut self, reader: R, writer: W) -> Result<ServerExit>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_loop(writer, rx));

        let mut frames = FramedRead::new(reader, FrameCodec::new(self.max_frame_bytes));
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut outcome = ServerExit::EndOfInput;

        loop {
            tokio::select! {
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!("Tool task failed to complete: {}", e);
                    }
                }
                frame = frames.next() => match frame {
                    None => {
                        debug!("Received EOF, shutting down");
                        break;
                    }
                    Some(Err(e)) => {
                        error!("Failed to read from input: {}", e);
                        break;
                    }
                    Some(Ok(frame)) => {
                        debug!("Received frame: {}", frame);
                        if let Some(exit) = self.handle_frame(&frame, &tx, &mut in_flight) {
                            outcome = exit;
                            break;
                        }
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            debug!("Waiting for {} in-flight tool calls", in_flight.len());
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Tool task failed to complete: {}", e);
            }
        }

        drop(tx);
        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to write response: {}", e),
            Err(e) => error!("Writer task failed: {}", e),
        }

        info!("MCP server shutting down ({:?})", outcome);
        Ok(outcome)
    }

    fn handle_frame(
        &mut self,
        frame: &str,
        tx: &Outbox,
        in_flight: &mut JoinSet<()>,
    ) -> Option<ServerExit> {
        match classify(frame) {
            Err(failure) => {
                warn!("Discarding unparseable frame: {}", failure.message);
                if let Some(id) = failure.id {
                    send(tx, JsonRpcResponse::error(id, JsonRpcError::parse_error(failure.message)));
                }
                None
            }
            Ok(IncomingMessage::Invalid { id, reason }) => {
                warn!("Invalid request: {}", reason);
                if let Some(id) = id {
                    send(tx, JsonRpcResponse::error(id, JsonRpcError::invalid_request(reason)));
                }
                None
            }
            Ok(IncomingMessage::ClientResponse { id }) => {
                debug!("Ignoring client response for id {}", id);
                None
            }
            Ok(IncomingMessage::Notification { method, params }) => {
                self.handle_notification(&method, &params)
            }
            Ok(IncomingMessage::Request { id, method, .. }) if method == "exit" => {
                send(tx, JsonRpcResponse::success(id, Value::Null));
                self.handle_notification(&method, &Value::Null)
            }
            Ok(IncomingMessage::Request { id, method, params }) => {
                self.handle_request(id, &method, params, tx, in_flight);
                None
            }
        }
    }

    fn handle_notification(&mut self, method: &str, params: &Value) -> Option<ServerExit> {
        match method {
            "initialized" | "notifications/initialized" => {
                info!("Client confirmed initialization");
                None
            }
            "notifications/cancelled" => {
                let request_id = params.get("requestId").cloned().unwrap_or_default();
                debug!("Client cancelled request {}", request_id);
                None
            }
            "exit" => {
                let clean = self.state.on_exit();
                if !clean {
                    warn!("Received exit before shutdown");
                }
                Some(ServerExit::Exit { clean })
            }
            other => {
                debug!("Ignoring notification {}", other);
                None
            }
        }
    }

    fn handle_request(
        &mut self,
        id: RequestId,
        method: &str,
        params: Value,
        tx: &Outbox,
        in_flight: &mut JoinSet<()>,
    ) {
        let Some(gate) = gate_for(method) else {
            send(tx, JsonRpcResponse::error(id, JsonRpcError::method_not_found(method)));
            return;
        };

        match self.state.admit(method, gate) {
            Admission::NotInitialized => {
                warn!("Rejecting {} before initialize", method);
                send(tx, JsonRpcResponse::error(id, JsonRpcError::not_initialized()));
                return;
            }
            Admission::ShuttingDown => {
                send(tx, JsonRpcResponse::error(id, JsonRpcError::shutting_down()));
                return;
            }
            Admission::Accept => {}
        }

        match method {
            "initialize" => self.handle_initialize(id, &params, tx),
            "ping" => send(tx, JsonRpcResponse::success(id, json!({}))),
            "tools/list" | "mcp.listTools" => {
                debug!("Handling tools/list");
                send(
                    tx,
                    JsonRpcResponse::success(id, json!({ "tools": self.registry.list() })),
                );
            }
            "prompts/list" => send(tx, JsonRpcResponse::success(id, json!({ "prompts": [] }))),
            "resources/list" => {
                send(tx, JsonRpcResponse::success(id, json!({ "resources": [] })))
            }
            "shutdown" => {
                info!("Shutdown requested");
                self.state.on_shutdown();
                send(tx, JsonRpcResponse::success(id, Value::Null));
            }
            "tools/call" | "mcp.callTool" => self.spawn_tool_call(id, params, tx, in_flight),
            other => send(tx, JsonRpcResponse::error(id, JsonRpcError::method_not_found(other))),
        }
    }

    /// Reply to `initialize`, then announce readiness
    fn handle_initialize(&mut self, id: RequestId, params: &Value, tx: &Outbox) {
        if let Some(client) = params.get("clientInfo") {
            info!("Initialize from client {}", client);
        }
        if self.state == ServerState::Ready {
            debug!("Repeated initialize, re-acknowledging");
        }
        self.state.on_initialize();

        send(
            tx,
            JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION")
                    },
                    "capabilities": {
                        "tools": {}
                    }
                }),
            ),
        );
        send(tx, JsonRpcNotification::initialized());
    }

    fn spawn_tool_call(
        &self,
        id: RequestId,
        params: Value,
        tx: &Outbox,
        in_flight: &mut JoinSet<()>,
    ) {
        let Value::Object(params) = params else {
            send(
                tx,
                JsonRpcResponse::error(id, JsonRpcError::invalid_params("params must be an object")),
            );
            return;
        };
        let Some(name) = params.get("name").and_then(Value::as_str).map(str::to_string) else {
            send(
                tx,
                JsonRpcResponse::error(id, JsonRpcError::invalid_params("missing 'name' field")),
            );
            return;
        };
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let registry = Arc::clone(&self.registry);
        let tx = tx.clone();
        in_flight.spawn(async move {
            let tool = name.clone();
            // Separate task so a panicking handler still yields a response
            let call = tokio::spawn(async move { registry.dispatch(&name, arguments).await });
            let response = match call.await {
                Ok(Ok(result)) => JsonRpcResponse::success(id, tool_result(&result)),
                Ok(Err(e)) => {
                    warn!("Tool {} failed: {}", tool, e);
                    JsonRpcResponse::error(id, tool_error(&tool, &e))
                }
                Err(e) => {
                    error!("Tool {} panicked: {}", tool, e);
                    JsonRpcResponse::error(
                        id,
                        JsonRpcError::internal_error(format!("Tool '{}' panicked", tool)),
                    )
                }
            };
            send(&tx, response);
        });
    }
}

/// Wrap a tool result as MCP text content
pub fn tool_result(result: &Value) -> Value {
    let text = serde_json::to_string(result).unwrap_or_else(|_| result.to_string());
    json!({
        "content": [
            {
                "type": "text",
                "text": text
            }
        ]
    })
}

/// Map a tool failure onto a JSON-RPC error
pub fn tool_error(tool: &str, err: &KgError) -> JsonRpcError {
    match err {
        KgError::InvalidArguments { .. } => JsonRpcError::invalid_params(err.to_string()),
        _ => JsonRpcError::tool_failed(tool, err),
    }
}

fn send(tx: &Outbox, message: impl Into<OutgoingMessage>) {
    if tx.send(message.into()).is_err() {
        debug!("Output closed, dropping message");
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<OutgoingMessage>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let bytes = match framer::encode(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to serialize response: {}", e);
                continue;
            }
        };
        writer.write_all(&bytes).await?;
        writer.flush().await?;
    }
    writer.flush().await?;
    Ok(())
}
