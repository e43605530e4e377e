//! Test utilities for storage initialization

use crate::storage::libsql::LibsqlGraphStore;
use crate::storage::session::{ConnectionMode, RetryPolicy};

/// In-memory graph store bound to a throwaway scope, schema pre-initialized
pub async fn memory_store() -> LibsqlGraphStore {
    LibsqlGraphStore::open(ConnectionMode::InMemory, "test", "knowledge", RetryPolicy::none())
        .await
        .expect("in-memory store should open")
}
