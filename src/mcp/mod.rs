//! Model Context Protocol (MCP) server implementation
//!
//! Provides a JSON-RPC 2.0 server over newline-delimited stdio exposing the
//! nine knowledge-graph tools.

pub mod framer;
pub mod protocol;
pub mod server;
pub mod state;
pub mod tools;

pub use framer::FrameCodec;
pub use protocol::{JsonRpcError, JsonRpcNotification, JsonRpcResponse, RequestId};
pub use server::{McpServer, ServerExit};
pub use state::ServerState;
pub use tools::{Tool, ToolRegistry};
