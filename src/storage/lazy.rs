//! Store that connects on first use
//!
//! The server must answer `initialize`, `tools/list` and `ping` even when the
//! backing store is down. [`LazyStore`] defers the connection until a graph
//! operation actually needs it; a failed attempt leaves it unconnected so the
//! next call tries again.

use crate::error::{KgError, Result};
use crate::storage::libsql::LibsqlGraphStore;
use crate::storage::session::{ConnectionMode, RetryPolicy};
use crate::storage::GraphStore;
use crate::types::{Entity, Observation, Relation, RelationKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::{info, warn};

pub struct LazyStore {
    mode: ConnectionMode,
    namespace: String,
    database: String,
    retry: RetryPolicy,
    inner: OnceCell<LibsqlGraphStore>,
}

impl LazyStore {
    pub fn new(
        mode: ConnectionMode,
        namespace: impl Into<String>,
        database: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            mode,
            namespace: namespace.into(),
            database: database.into(),
            retry,
            inner: OnceCell::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.initialized()
    }

    /// Try to connect now; failure is logged and left for the next call
    pub async fn warm_up(&self) -> bool {
        match self.store().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Store not available yet, continuing degraded: {}", e);
                false
            }
        }
    }

    async fn store(&self) -> Result<&LibsqlGraphStore> {
        self.inner
            .get_or_try_init(|| async {
                let store = LibsqlGraphStore::open(
                    self.mode.clone(),
                    &self.namespace,
                    &self.database,
                    self.retry,
                )
                .await?;
                info!(
                    "Store ready at {} (scope {})",
                    self.mode,
                    store.session().scope()
                );
                Ok::<_, KgError>(store)
            })
            .await
    }
}

impl std::fmt::Debug for LazyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyStore")
            .field("mode", &self.mode.to_string())
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[async_trait]
impl GraphStore for LazyStore {
    async fn get_entity(&self, name: &str) -> Result<Option<Entity>> {
        self.store().await?.get_entity(name).await
    }

    async fn get_entities(&self, names: &[String]) -> Result<Vec<Entity>> {
        self.store().await?.get_entities(names).await
    }

    async fn list_entities(&self) -> Result<Vec<Entity>> {
        self.store().await?.list_entities().await
    }

    async fn insert_entity(&self, entity: &Entity) -> Result<bool> {
        self.store().await?.insert_entity(entity).await
    }

    async fn append_observations(
        &self,
        name: &str,
        candidates: &[Observation],
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Vec<Observation>>> {
        self.store()
            .await?
            .append_observations(name, candidates, updated_at)
            .await
    }

    async fn remove_observations(
        &self,
        name: &str,
        texts: &[String],
        updated_at: DateTime<Utc>,
    ) -> Result<Option<usize>> {
        self.store()
            .await?
            .remove_observations(name, texts, updated_at)
            .await
    }

    async fn delete_entities(&self, names: &[String]) -> Result<usize> {
        self.store().await?.delete_entities(names).await
    }

    async fn list_relations(&self) -> Result<Vec<Relation>> {
        self.store().await?.list_relations().await
    }

    async fn relations_within(&self, names: &[String]) -> Result<Vec<Relation>> {
        self.store().await?.relations_within(names).await
    }

    async fn insert_relation(&self, relation: &Relation) -> Result<bool> {
        self.store().await?.insert_relation(relation).await
    }

    async fn delete_relation(&self, key: &RelationKey) -> Result<bool> {
        self.store().await?.delete_relation(key).await
    }

    async fn delete_relations_touching(&self, names: &[String]) -> Result<usize> {
        self.store().await?.delete_relations_touching(names).await
    }
}
