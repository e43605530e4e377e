//! Storage layer for the knowledge graph
//!
//! Provides the typed store contract the graph engine is written against and
//! its libSQL implementation. Raw query shapes never leave this module.

pub mod lazy;
pub mod libsql;
pub mod rows;
pub mod session;

#[cfg(test)]
pub mod test_utils;

use crate::error::Result;
use crate::types::{Entity, Observation, Relation, RelationKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use self::lazy::LazyStore;
pub use self::libsql::LibsqlGraphStore;
pub use self::session::{ConnectionMode, RetryPolicy, Session};

/// Storage backend trait defining all required operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Fetch one entity by exact name
    async fn get_entity(&self, name: &str) -> Result<Option<Entity>>;

    /// Fetch the entities whose names are in `names` (unknown names are skipped)
    async fn get_entities(&self, names: &[String]) -> Result<Vec<Entity>>;

    /// Every entity in the current scope
    async fn list_entities(&self) -> Result<Vec<Entity>>;

    /// Insert an entity; `false` when the name already existed
    async fn insert_entity(&self, entity: &Entity) -> Result<bool>;

    /// Append observations whose text the entity does not already hold
    ///
    /// Atomic with respect to concurrent writers of the same entity. Returns the
    /// observations actually stored, or `None` when the entity does not exist.
    /// `updatedAt` moves only when something was added.
    async fn append_observations(
        &self,
        name: &str,
        candidates: &[Observation],
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Vec<Observation>>>;

    /// Remove observations by text, atomically; `None` when the entity does not exist
    async fn remove_observations(
        &self,
        name: &str,
        texts: &[String],
        updated_at: DateTime<Utc>,
    ) -> Result<Option<usize>>;

    /// Delete entities by name, returning how many existed
    async fn delete_entities(&self, names: &[String]) -> Result<usize>;

    /// Every relation in the current scope
    async fn list_relations(&self) -> Result<Vec<Relation>>;

    /// Relations whose `from` and `to` are both in `names`
    async fn relations_within(&self, names: &[String]) -> Result<Vec<Relation>>;

    /// Insert a relation; `false` when the triple already existed
    async fn insert_relation(&self, relation: &Relation) -> Result<bool>;

    /// Delete the exact triple; `false` when it was not stored
    async fn delete_relation(&self, key: &RelationKey) -> Result<bool>;

    /// Delete every relation with `from` or `to` in `names`
    async fn delete_relations_touching(&self, names: &[String]) -> Result<usize>;
}
