//! Core data types for the knowledge graph
//!
//! Entities, relations and observations as stored, plus the argument shapes
//! accepted by the graph tools. Field names serialize in camelCase because
//! they travel verbatim inside tool results.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Current time truncated to the precision we persist
pub fn now() -> DateTime<Utc> {
    let ts = Utc::now();
    DateTime::parse_from_rfc3339(&format_timestamp(&ts))
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(ts)
}

/// RFC 3339 with millisecond precision, the on-disk and on-wire form
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A timestamped fact attached to exactly one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Observation {
    pub fn new(text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            created_at,
        }
    }
}

/// Named node in the knowledge graph
///
/// `name` is the unique key within a store scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<Observation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Whether an observation with this exact text is already attached
    pub fn has_observation(&self, text: &str) -> bool {
        self.observations.iter().any(|o| o.text == text)
    }
}

/// Directed, typed edge between two entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub from: String,
    pub to: String,
    pub relation_type: String,
    pub created_at: DateTime<Utc>,
}

impl Relation {
    pub fn key(&self) -> RelationKey {
        RelationKey {
            from: self.from.clone(),
            to: self.to.clone(),
            relation_type: self.relation_type.clone(),
        }
    }
}

/// The `(from, to, relationType)` triple that identifies a relation
///
/// Also the argument shape of `create_relations` and `delete_relations`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationKey {
    pub from: String,
    pub to: String,
    pub relation_type: String,
}

impl std::fmt::Display for RelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} --[{}]--> {}", self.from, self.relation_type, self.to)
    }
}

/// Transient view returned by every read-style operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl KnowledgeGraph {
    pub fn entity_names(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.name.clone()).collect()
    }
}

/// Observation as supplied by a client
///
/// Plain strings are the common form; objects carrying their own
/// `createdAt` are accepted so exported graphs can be loaded back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObservationInput {
    Text(String),
    Full {
        text: String,
        #[serde(rename = "createdAt", default)]
        created_at: Option<DateTime<Utc>>,
    },
}

impl ObservationInput {
    pub fn text(&self) -> &str {
        match self {
            ObservationInput::Text(text) => text,
            ObservationInput::Full { text, .. } => text,
        }
    }

    /// Resolve into a stored observation, stamping `now` when no time was given
    pub fn into_observation(self, now: DateTime<Utc>) -> Observation {
        match self {
            ObservationInput::Text(text) => Observation::new(text, now),
            ObservationInput::Full { text, created_at } => {
                Observation::new(text, created_at.unwrap_or(now))
            }
        }
    }
}

/// One element of `create_entities.entities`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityInput {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<ObservationInput>,
}

/// One element of `add_observations.observations`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationAddition {
    pub entity_name: String,
    pub contents: Vec<String>,
}

/// Per-entity outcome of `add_observations`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationResult {
    pub entity_name: String,
    pub added_observations: Vec<Observation>,
}

/// One element of `delete_observations.deletions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationDeletion {
    pub entity_name: String,
    pub observations: Vec<String>,
}

/// Outcome of the delete operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<usize>,
    pub message: String,
}

impl DeleteOutcome {
    pub fn counted(deleted: usize, message: impl Into<String>) -> Self {
        Self {
            success: true,
            deleted: Some(deleted),
            message: message.into(),
        }
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self {
            success: true,
            deleted: None,
            message: message.into(),
        }
    }
}
