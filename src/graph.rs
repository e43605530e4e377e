//! Graph operations engine
//!
//! The nine knowledge-graph operations, written against [`GraphStore`].
//! Bulk operations skip individual items that are duplicates or refer to
//! missing entities; `add_observations` is the only operation that fails the
//! whole call, and it checks every target before writing anything.

use crate::error::{KgError, Result};
use crate::storage::GraphStore;
use crate::types::{
    now, DeleteOutcome, Entity, EntityInput, KnowledgeGraph, Observation, ObservationAddition,
    ObservationDeletion, ObservationResult, Relation, RelationKey,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound on a single store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Executes graph operations against a store
#[derive(Clone)]
pub struct GraphEngine {
    store: Arc<dyn GraphStore>,
    timeout: Duration,
}

impl GraphEngine {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self::with_timeout(store, DEFAULT_STORE_TIMEOUT)
    }

    pub fn with_timeout(store: Arc<dyn GraphStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Create entities, skipping names that already exist
    pub async fn create_entities(&self, inputs: Vec<EntityInput>) -> Result<Vec<Entity>> {
        let mut seen = HashSet::new();
        let mut created = Vec::new();

        for input in inputs {
            if !seen.insert(input.name.clone()) {
                debug!("Skipping repeated entity '{}' in batch", input.name);
                continue;
            }

            let ts = now();
            let mut texts = HashSet::new();
            let observations: Vec<Observation> = input
                .observations
                .into_iter()
                .filter(|o| texts.insert(o.text().to_string()))
                .map(|o| o.into_observation(ts))
                .collect();

            let entity = Entity {
                name: input.name,
                entity_type: input.entity_type,
                observations,
                created_at: ts,
                updated_at: ts,
            };

            if guarded(self.timeout, "insert_entity", self.store.insert_entity(&entity)).await? {
                created.push(entity);
            } else {
                debug!("Entity '{}' already exists, skipping", entity.name);
            }
        }

        info!("Created {} entities", created.len());
        Ok(created)
    }

    /// Create relations between existing entities, skipping duplicates
    pub async fn create_relations(&self, keys: Vec<RelationKey>) -> Result<Vec<Relation>> {
        let mut seen = HashSet::new();
        let mut exists: HashMap<String, bool> = HashMap::new();
        let mut created = Vec::new();

        for key in keys {
            if !seen.insert(key.clone()) {
                continue;
            }

            let mut endpoints_present = true;
            for endpoint in [&key.from, &key.to] {
                if !self.entity_exists(endpoint, &mut exists).await? {
                    endpoints_present = false;
                }
            }
            if !endpoints_present {
                warn!("Skipping relation {}: endpoint entity not found", key);
                continue;
            }

            let relation = Relation {
                from: key.from,
                to: key.to,
                relation_type: key.relation_type,
                created_at: now(),
            };
            if guarded(self.timeout, "insert_relation", self.store.insert_relation(&relation))
                .await?
            {
                created.push(relation);
            } else {
                debug!("Relation {} already exists, skipping", relation.key());
            }
        }

        info!("Created {} relations", created.len());
        Ok(created)
    }

    async fn entity_exists(&self, name: &str, cache: &mut HashMap<String, bool>) -> Result<bool> {
        if let Some(known) = cache.get(name) {
            return Ok(*known);
        }
        let found = guarded(self.timeout, "get_entity", self.store.get_entity(name))
            .await?
            .is_some();
        cache.insert(name.to_string(), found);
        Ok(found)
    }

    /// Append new observation texts to existing entities
    ///
    /// Fails with [`KgError::EntityNotFound`] before any write if a target is missing.
    pub async fn add_observations(
        &self,
        additions: Vec<ObservationAddition>,
    ) -> Result<Vec<ObservationResult>> {
        let mut names: Vec<String> = Vec::new();
        for addition in &additions {
            if !names.contains(&addition.entity_name) {
                names.push(addition.entity_name.clone());
            }
        }

        let found: HashSet<String> =
            guarded(self.timeout, "get_entities", self.store.get_entities(&names))
                .await?
                .into_iter()
                .map(|e| e.name)
                .collect();

        if let Some(missing) = names.iter().find(|n| !found.contains(*n)) {
            return Err(KgError::EntityNotFound(missing.clone()));
        }

        let mut results = Vec::with_capacity(additions.len());
        for addition in additions {
            let ts = now();
            let candidates: Vec<Observation> = addition
                .contents
                .into_iter()
                .map(|text| Observation::new(text, ts))
                .collect();

            let added = guarded(
                self.timeout,
                "append_observations",
                self.store
                    .append_observations(&addition.entity_name, &candidates, ts),
            )
            .await?
            .ok_or_else(|| KgError::EntityNotFound(addition.entity_name.clone()))?;

            debug!(
                "Added {} observations to '{}'",
                added.len(),
                addition.entity_name
            );
            results.push(ObservationResult {
                entity_name: addition.entity_name,
                added_observations: added,
            });
        }

        Ok(results)
    }

    /// Delete entities and every relation touching them
    pub async fn delete_entities(&self, names: Vec<String>) -> Result<DeleteOutcome> {
        let names = unique(names);
        let relations = guarded(
            self.timeout,
            "delete_relations_touching",
            self.store.delete_relations_touching(&names),
        )
        .await?;
        let deleted = guarded(self.timeout, "delete_entities", self.store.delete_entities(&names))
            .await?;

        info!("Deleted {} entities and {} relations", deleted, relations);
        Ok(DeleteOutcome::counted(deleted, "Entities deleted successfully"))
    }

    /// Remove listed observation texts from entities; absent entities are skipped
    pub async fn delete_observations(
        &self,
        deletions: Vec<ObservationDeletion>,
    ) -> Result<DeleteOutcome> {
        for deletion in deletions {
            let removed = guarded(
                self.timeout,
                "remove_observations",
                self.store.remove_observations(
                    &deletion.entity_name,
                    &deletion.observations,
                    now(),
                ),
            )
            .await?;
            match removed {
                Some(count) => debug!(
                    "Removed {} observations from '{}'",
                    count, deletion.entity_name
                ),
                None => debug!(
                    "Entity '{}' not found, skipping observation deletion",
                    deletion.entity_name
                ),
            }
        }

        Ok(DeleteOutcome::done("Observations deleted successfully"))
    }

    /// Remove exact relation triples
    pub async fn delete_relations(&self, keys: Vec<RelationKey>) -> Result<DeleteOutcome> {
        let mut deleted = 0;
        for key in unique(keys) {
            if guarded(self.timeout, "delete_relation", self.store.delete_relation(&key)).await? {
                deleted += 1;
            }
        }
        Ok(DeleteOutcome::counted(deleted, "Relations deleted successfully"))
    }

    /// The whole graph in the current scope
    pub async fn read_graph(&self) -> Result<KnowledgeGraph> {
        let entities = guarded(self.timeout, "list_entities", self.store.list_entities()).await?;
        let relations =
            guarded(self.timeout, "list_relations", self.store.list_relations()).await?;
        Ok(KnowledgeGraph {
            entities,
            relations,
        })
    }

    /// Case-insensitive substring search over names, types and observations
    pub async fn search_nodes(&self, query: &str) -> Result<KnowledgeGraph> {
        let all = guarded(self.timeout, "list_entities", self.store.list_entities()).await?;
        let entities = search_entities(all, query);
        let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
        let relations = guarded(
            self.timeout,
            "relations_within",
            self.store.relations_within(&names),
        )
        .await?;

        debug!("Search '{}' matched {} entities", query, entities.len());
        Ok(KnowledgeGraph {
            entities,
            relations,
        })
    }

    /// Entities by exact name, with the relations among them
    pub async fn open_nodes(&self, names: Vec<String>) -> Result<KnowledgeGraph> {
        let names = unique(names);
        let entities =
            guarded(self.timeout, "get_entities", self.store.get_entities(&names)).await?;
        let relations = guarded(
            self.timeout,
            "relations_within",
            self.store.relations_within(&names),
        )
        .await?;
        Ok(KnowledgeGraph {
            entities,
            relations,
        })
    }
}

/// A graph file as written by `export` or produced by other tools
///
/// Extra fields such as relation timestamps are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub entities: Vec<EntityInput>,
    #[serde(default)]
    pub relations: Vec<RelationKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub entities: usize,
    pub relations: usize,
}

impl GraphEngine {
    /// Load a document with the same skip rules as the create operations
    pub async fn import(&self, document: GraphDocument) -> Result<ImportSummary> {
        let entities = self.create_entities(document.entities).await?.len();
        let relations = self.create_relations(document.relations).await?.len();
        Ok(ImportSummary {
            entities,
            relations,
        })
    }
}

/// Run a store call under a time bound
pub async fn guarded<T, F>(limit: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Store call {} exceeded {:?}", operation, limit);
            Err(KgError::Timeout {
                operation: operation.to_string(),
                after_ms: limit.as_millis() as u64,
            })
        }
    }
}

/// Whether an entity matches an already-lowercased query
pub fn matches_query(entity: &Entity, lowered: &str) -> bool {
    entity.name.to_lowercase().contains(lowered)
        || entity.entity_type.to_lowercase().contains(lowered)
        || entity
            .observations
            .iter()
            .any(|o| o.text.to_lowercase().contains(lowered))
}

/// Filter entities by query, de-duplicated by name, keeping input order
pub fn search_entities(entities: Vec<Entity>, query: &str) -> Vec<Entity> {
    let lowered = query.to_lowercase();
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|e| matches_query(e, &lowered))
        .filter(|e| seen.insert(e.name.clone()))
        .collect()
}

fn unique<T: Clone + Eq + std::hash::Hash>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
