//! LibSQL storage backend implementation
//!
//! Entities and relations live in two scope-keyed tables. Observations are an
//! ordered JSON array column on the entity row, so an entity and its facts are
//! always read together. Observation writes are compare-and-swap on the raw
//! column text, so concurrent writers never overwrite each other.

use crate::error::{KgError, Result};
use crate::storage::rows::{entity_from_record, relation_from_record, Record};
use crate::storage::session::{Collection, ConnectionMode, RetryPolicy, Session};
use crate::storage::GraphStore;
use crate::types::{format_timestamp, Entity, Observation, Relation, RelationKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::debug;

const ENTITY_COLUMNS: &str = "name, entity_type, observations, created_at, updated_at";
const RELATION_COLUMNS: &str = "from_entity, to_entity, relation_type, created_at";

/// Placeholders `?{offset}..` for an IN list
fn build_placeholders(count: usize, offset: usize) -> String {
    (offset..offset + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Bound on compare-and-swap retries for one observation update
const MAX_SWAP_ATTEMPTS: usize = 128;

fn names_to_params(names: &[String]) -> Vec<Value> {
    names.iter().map(|n| Value::String(n.clone())).collect()
}

/// LibSQL-backed graph store
#[derive(Debug)]
pub struct LibsqlGraphStore {
    session: Session,
}

impl LibsqlGraphStore {
    /// Wrap an already scoped session, creating the schema if needed
    pub async fn new(session: Session) -> Result<Self> {
        session.ensure_schema().await?;
        Ok(Self { session })
    }

    /// Connect, select the scope and ensure the schema in one step
    pub async fn open(
        mode: ConnectionMode,
        namespace: &str,
        database: &str,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let mut session = Session::connect_with_retry(mode, retry).await?;
        session.select_namespace(namespace, database)?;
        Self::new(session).await
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn close(self) {
        self.session.close();
    }

    async fn select_entities(&self, filter: &str, params: Vec<Value>) -> Result<Vec<Entity>> {
        let sql = format!(
            "SELECT {} FROM kg_entities WHERE scope = ?1 {} ORDER BY rowid",
            ENTITY_COLUMNS, filter
        );
        self.session
            .query(&sql, params)
            .await?
            .iter()
            .map(entity_from_record)
            .collect()
    }

    async fn select_relations(&self, filter: &str, params: Vec<Value>) -> Result<Vec<Relation>> {
        let sql = format!(
            "SELECT {} FROM kg_relations WHERE scope = ?1 {} ORDER BY rowid",
            RELATION_COLUMNS, filter
        );
        self.session
            .query(&sql, params)
            .await?
            .iter()
            .map(relation_from_record)
            .collect()
    }

    /// Read-modify-write of one entity's observations, retried until no other
    /// writer changed the column in between
    ///
    /// `modify` returns its outcome and whether the list changed; unchanged
    /// lists are not written back.
    async fn update_observations<T, F>(
        &self,
        name: &str,
        updated_at: DateTime<Utc>,
        mut modify: F,
    ) -> Result<Option<T>>
    where
        T: Send,
        F: FnMut(&mut Vec<Observation>) -> (T, bool) + Send,
    {
        for attempt in 0..MAX_SWAP_ATTEMPTS {
            let sql = format!(
                "SELECT {} FROM kg_entities WHERE scope = ?1 AND name = ?2",
                ENTITY_COLUMNS
            );
            let Some(record) = self
                .session
                .query(&sql, vec![json!(name)])
                .await?
                .into_iter()
                .next()
            else {
                return Ok(None);
            };

            let expected = record.get("observations").cloned().unwrap_or(Value::Null);
            let mut observations = entity_from_record(&record)?.observations;
            let (outcome, changed) = modify(&mut observations);
            if !changed {
                return Ok(Some(outcome));
            }

            let swapped = self
                .session
                .execute(
                    "UPDATE kg_entities SET observations = ?3, updated_at = ?4 \
                     WHERE scope = ?1 AND name = ?2 AND observations IS ?5",
                    vec![
                        json!(name),
                        json!(serde_json::to_string(&observations)?),
                        json!(format_timestamp(&updated_at)),
                        expected,
                    ],
                )
                .await?;
            if swapped > 0 {
                return Ok(Some(outcome));
            }
            debug!(
                "Observations of '{}' changed concurrently, retrying (attempt {})",
                name,
                attempt + 1
            );
        }

        Err(KgError::Database(format!(
            "observations of '{}' kept changing; gave up after {} attempts",
            name, MAX_SWAP_ATTEMPTS
        )))
    }
}

fn record_of(value: Value) -> Record {
    match value {
        Value::Object(map) => Record(map),
        _ => Record::default(),
    }
}

#[async_trait]
impl GraphStore for LibsqlGraphStore {
    async fn get_entity(&self, name: &str) -> Result<Option<Entity>> {
        Ok(self
            .select_entities("AND name = ?2", vec![json!(name)])
            .await?
            .into_iter()
            .next())
    }

    async fn get_entities(&self, names: &[String]) -> Result<Vec<Entity>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let filter = format!("AND name IN ({})", build_placeholders(names.len(), 2));
        self.select_entities(&filter, names_to_params(names)).await
    }

    async fn list_entities(&self) -> Result<Vec<Entity>> {
        self.select_entities("", Vec::new()).await
    }

    async fn insert_entity(&self, entity: &Entity) -> Result<bool> {
        let record = record_of(json!({
            "name": entity.name,
            "entity_type": entity.entity_type,
            "observations": serde_json::to_string(&entity.observations)?,
            "created_at": format_timestamp(&entity.created_at),
            "updated_at": format_timestamp(&entity.updated_at),
        }));
        let inserted = self.session.insert(Collection::Entities, &record).await?;
        debug!("insert entity {}: {}", entity.name, inserted.is_some());
        Ok(inserted.is_some())
    }

    async fn append_observations(
        &self,
        name: &str,
        candidates: &[Observation],
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Vec<Observation>>> {
        self.update_observations(name, updated_at, |observations| {
            let mut added = Vec::new();
            for candidate in candidates {
                if observations.iter().any(|o| o.text == candidate.text) {
                    continue;
                }
                observations.push(candidate.clone());
                added.push(candidate.clone());
            }
            let changed = !added.is_empty();
            (added, changed)
        })
        .await
    }

    async fn remove_observations(
        &self,
        name: &str,
        texts: &[String],
        updated_at: DateTime<Utc>,
    ) -> Result<Option<usize>> {
        self.update_observations(name, updated_at, |observations| {
            let before = observations.len();
            observations.retain(|o| !texts.contains(&o.text));
            let removed = before - observations.len();
            (removed, removed > 0)
        })
        .await
    }

    async fn delete_entities(&self, names: &[String]) -> Result<usize> {
        if names.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM kg_entities WHERE scope = ?1 AND name IN ({})",
            build_placeholders(names.len(), 2)
        );
        Ok(self.session.execute(&sql, names_to_params(names)).await? as usize)
    }

    async fn list_relations(&self) -> Result<Vec<Relation>> {
        self.select_relations("", Vec::new()).await
    }

    async fn relations_within(&self, names: &[String]) -> Result<Vec<Relation>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = build_placeholders(names.len(), 2);
        let filter = format!(
            "AND from_entity IN ({0}) AND to_entity IN ({0})",
            placeholders
        );
        self.select_relations(&filter, names_to_params(names)).await
    }

    async fn insert_relation(&self, relation: &Relation) -> Result<bool> {
        let record = record_of(json!({
            "from_entity": relation.from,
            "to_entity": relation.to,
            "relation_type": relation.relation_type,
            "created_at": format_timestamp(&relation.created_at),
        }));
        Ok(self
            .session
            .insert(Collection::Relations, &record)
            .await?
            .is_some())
    }

    async fn delete_relation(&self, key: &RelationKey) -> Result<bool> {
        let deleted = self
            .session
            .execute(
                "DELETE FROM kg_relations WHERE scope = ?1 \
                 AND from_entity = ?2 AND to_entity = ?3 AND relation_type = ?4",
                vec![json!(key.from), json!(key.to), json!(key.relation_type)],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn delete_relations_touching(&self, names: &[String]) -> Result<usize> {
        if names.is_empty() {
            return Ok(0);
        }
        let placeholders = build_placeholders(names.len(), 2);
        let sql = format!(
            "DELETE FROM kg_relations WHERE scope = ?1 \
             AND (from_entity IN ({0}) OR to_entity IN ({0}))",
            placeholders
        );
        Ok(self.session.execute(&sql, names_to_params(names)).await? as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_utils::memory_store;
    use crate::types::now;

    fn entity(name: &str, observations: &[&str]) -> Entity {
        let ts = now();
        Entity {
            name: name.to_string(),
            entity_type: "person".to_string(),
            observations: observations.iter().map(|o| Observation::new(*o, ts)).collect(),
            created_at: ts,
            updated_at: ts,
        }
    }

    fn relation(from: &str, to: &str, kind: &str) -> Relation {
        Relation {
            from: from.to_string(),
            to: to.to_string(),
            relation_type: kind.to_string(),
            created_at: now(),
        }
    }

    #[test]
    fn test_build_placeholders() {
        assert_eq!(build_placeholders(3, 2), "?2, ?3, ?4");
        assert_eq!(build_placeholders(0, 2), "");
    }

    #[tokio::test]
    async fn test_entity_round_trip() {
        let store = memory_store().await;
        let alice = entity("alice", &["likes tea", "works remotely"]);

        assert!(store.insert_entity(&alice).await.unwrap());
        assert!(!store.insert_entity(&alice).await.unwrap());

        let loaded = store.get_entity("alice").await.unwrap().unwrap();
        assert_eq!(loaded, alice);
        assert!(store.get_entity("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_entities_skips_unknown_names() {
        let store = memory_store().await;
        store.insert_entity(&entity("a", &[])).await.unwrap();
        store.insert_entity(&entity("b", &[])).await.unwrap();

        let found = store
            .get_entities(&["b".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "b");
        assert!(store.get_entities(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_observations_skips_known_texts() {
        let store = memory_store().await;
        let original = entity("a", &["one"]);
        store.insert_entity(&original).await.unwrap();

        let later = original.updated_at + chrono::Duration::seconds(5);
        let candidates = vec![
            Observation::new("one", later),
            Observation::new("two", later),
            Observation::new("two", later),
        ];
        let added = store
            .append_observations("a", &candidates, later)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(added, vec![Observation::new("two", later)]);

        let loaded = store.get_entity("a").await.unwrap().unwrap();
        let texts: Vec<&str> = loaded.observations.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert_eq!(loaded.observations[0].created_at, original.created_at);
        assert_eq!(loaded.updated_at, later);
        assert_eq!(loaded.created_at, original.created_at);

        let even_later = later + chrono::Duration::seconds(5);
        let nothing = store
            .append_observations("a", &candidates, even_later)
            .await
            .unwrap()
            .unwrap();
        assert!(nothing.is_empty());
        assert_eq!(store.get_entity("a").await.unwrap().unwrap().updated_at, later);

        assert!(store
            .append_observations("missing", &candidates, later)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_remove_observations_counts_removed_texts() {
        let store = memory_store().await;
        store
            .insert_entity(&entity("a", &["keep", "drop", "also drop"]))
            .await
            .unwrap();

        let removed = store
            .remove_observations(
                "a",
                &["drop".to_string(), "also drop".to_string(), "absent".to_string()],
                now(),
            )
            .await
            .unwrap();
        assert_eq!(removed, Some(2));

        let loaded = store.get_entity("a").await.unwrap().unwrap();
        assert_eq!(loaded.observations.len(), 1);
        assert_eq!(loaded.observations[0].text, "keep");

        assert_eq!(
            store
                .remove_observations("ghost", &["x".to_string()], now())
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_legacy_observation_column_is_rewritten_on_append() {
        let store = memory_store().await;
        store.insert_entity(&entity("a", &[])).await.unwrap();
        store
            .session()
            .execute(
                "UPDATE kg_entities SET observations = ?3 WHERE scope = ?1 AND name = ?2",
                vec![json!("a"), json!("[\"legacy\"]")],
            )
            .await
            .unwrap();

        let added = store
            .append_observations("a", &[Observation::new("fresh", now())], now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(added.len(), 1);

        let loaded = store.get_entity("a").await.unwrap().unwrap();
        let texts: Vec<&str> = loaded.observations.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, vec!["legacy", "fresh"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_all_kept() {
        let store = std::sync::Arc::new(memory_store().await);
        store.insert_entity(&entity("a", &[])).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..40 {
            let store = store.clone();
            tasks.spawn(async move {
                let ts = now();
                store
                    .append_observations("a", &[Observation::new(format!("obs-{}", i), ts)], ts)
                    .await
                    .unwrap()
                    .unwrap()
                    .len()
            });
        }

        let mut reported = 0;
        while let Some(added) = tasks.join_next().await {
            reported += added.unwrap();
        }

        let stored = store.get_entity("a").await.unwrap().unwrap().observations.len();
        assert_eq!(reported, 40);
        assert_eq!(stored, 40);
    }

    #[tokio::test]
    async fn test_relation_lifecycle() {
        let store = memory_store().await;
        let rel = relation("a", "b", "knows");

        assert!(store.insert_relation(&rel).await.unwrap());
        assert!(!store.insert_relation(&rel).await.unwrap());
        assert_eq!(store.list_relations().await.unwrap().len(), 1);

        assert!(store.delete_relation(&rel.key()).await.unwrap());
        assert!(!store.delete_relation(&rel.key()).await.unwrap());
        assert!(store.list_relations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_relations_within_requires_both_endpoints() {
        let store = memory_store().await;
        store.insert_relation(&relation("a", "b", "knows")).await.unwrap();
        store.insert_relation(&relation("a", "c", "knows")).await.unwrap();
        store.insert_relation(&relation("c", "b", "knows")).await.unwrap();

        let within = store
            .relations_within(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(within.len(), 1);
        assert_eq!(within[0].to, "b");
        assert_eq!(within[0].from, "a");
    }

    #[tokio::test]
    async fn test_delete_relations_touching() {
        let store = memory_store().await;
        store.insert_relation(&relation("a", "b", "knows")).await.unwrap();
        store.insert_relation(&relation("c", "a", "knows")).await.unwrap();
        store.insert_relation(&relation("b", "c", "knows")).await.unwrap();

        let deleted = store
            .delete_relations_touching(&["a".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let remaining = store.list_relations().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key(), relation("b", "c", "knows").key());
    }

    #[tokio::test]
    async fn test_delete_entities_counts_existing_only() {
        let store = memory_store().await;
        store.insert_entity(&entity("a", &[])).await.unwrap();

        let deleted = store
            .delete_entities(&["a".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.list_entities().await.unwrap().is_empty());
    }
}
