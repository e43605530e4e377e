//! Knowledge graph memory server for LLM clients
//!
//! Exposes entities, relations and observations over the Model Context
//! Protocol (JSON-RPC 2.0 on newline-delimited stdio).
//!
//! # Architecture
//!
//! - **Types**: entities, relations, observations and tool argument shapes
//! - **Storage**: the [`GraphStore`] contract and its libSQL implementation
//! - **Graph**: the nine graph operations with dedup and timestamp policy
//! - **MCP**: framing, handshake state machine, tool registry and dispatch
//!
//! # Example
//!
//! ```ignore
//! use kg_core::{GraphEngine, LazyStore, McpServer, ToolRegistry};
//! use kg_core::storage::{ConnectionMode, RetryPolicy};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> kg_core::Result<()> {
//!     let store = LazyStore::new(ConnectionMode::InMemory, "dev", "kb", RetryPolicy::default());
//!     let engine = GraphEngine::new(Arc::new(store));
//!     let exit = McpServer::new(ToolRegistry::new(engine)).run().await?;
//!     std::process::exit(exit.exit_code());
//! }
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod mcp;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use crate::config::KgConfig;
pub use error::{KgError, Result};
pub use graph::{GraphDocument, GraphEngine, ImportSummary};
pub use mcp::{McpServer, ServerExit, ToolRegistry};
pub use storage::{GraphStore, LazyStore, LibsqlGraphStore};
pub use types::{Entity, KnowledgeGraph, Observation, Relation, RelationKey};
