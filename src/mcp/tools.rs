//! MCP tool catalog and dispatch
//!
//! Nine knowledge-graph tools, advertised in a fixed order. Arguments are
//! checked against each tool's input schema before being decoded into typed
//! inputs and handed to the [`GraphEngine`].

use crate::error::{KgError, Result};
use crate::graph::GraphEngine;
use crate::types::{EntityInput, ObservationAddition, ObservationDeletion, RelationKey};
use jsonschema::error::{ValidationError, ValidationErrorKind};
use jsonschema::{Draft, JSONSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// Tool schema definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Tool name (e.g., "create_entities")
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// JSON Schema for input parameters
    pub input_schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    CreateEntities,
    CreateRelations,
    AddObservations,
    DeleteEntities,
    DeleteObservations,
    DeleteRelations,
    ReadGraph,
    SearchNodes,
    OpenNodes,
}

impl ToolKind {
    /// Advertised order
    pub const ALL: [ToolKind; 9] = [
        ToolKind::CreateEntities,
        ToolKind::CreateRelations,
        ToolKind::AddObservations,
        ToolKind::DeleteEntities,
        ToolKind::DeleteObservations,
        ToolKind::DeleteRelations,
        ToolKind::ReadGraph,
        ToolKind::SearchNodes,
        ToolKind::OpenNodes,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::CreateEntities => "create_entities",
            ToolKind::CreateRelations => "create_relations",
            ToolKind::AddObservations => "add_observations",
            ToolKind::DeleteEntities => "delete_entities",
            ToolKind::DeleteObservations => "delete_observations",
            ToolKind::DeleteRelations => "delete_relations",
            ToolKind::ReadGraph => "read_graph",
            ToolKind::SearchNodes => "search_nodes",
            ToolKind::OpenNodes => "open_nodes",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    fn description(&self) -> &'static str {
        match self {
            ToolKind::CreateEntities => "Create multiple new entities in the knowledge graph",
            ToolKind::CreateRelations => {
                "Create multiple new relations between entities in the knowledge graph"
            }
            ToolKind::AddObservations => {
                "Add new observations to existing entities in the knowledge graph"
            }
            ToolKind::DeleteEntities => {
                "Delete multiple entities and their associated relations from the knowledge graph"
            }
            ToolKind::DeleteObservations => {
                "Delete specific observations from entities in the knowledge graph"
            }
            ToolKind::DeleteRelations => "Delete multiple relations from the knowledge graph",
            ToolKind::ReadGraph => "Read the entire knowledge graph",
            ToolKind::SearchNodes => "Search for nodes in the knowledge graph based on a query",
            ToolKind::OpenNodes => "Open specific nodes in the knowledge graph by their names",
        }
    }

    fn input_schema(&self) -> Value {
        match self {
            ToolKind::CreateEntities => json!({
                "type": "object",
                "properties": {
                    "entities": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": {
                                    "type": "string",
                                    "description": "The name of the entity"
                                },
                                "entityType": {
                                    "type": "string",
                                    "description": "The type of the entity"
                                },
                                "observations": {
                                    "type": "array",
                                    "items": {"type": ["string", "object"]},
                                    "description": "An array of observation contents associated with the entity"
                                }
                            },
                            "required": ["name", "entityType"]
                        }
                    }
                },
                "required": ["entities"]
            }),
            ToolKind::CreateRelations => json!({
                "type": "object",
                "properties": {
                    "relations": relation_array_schema("An array of relations to create")
                },
                "required": ["relations"]
            }),
            ToolKind::AddObservations => json!({
                "type": "object",
                "properties": {
                    "observations": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "entityName": {
                                    "type": "string",
                                    "description": "The name of the entity to add the observations to"
                                },
                                "contents": {
                                    "type": "array",
                                    "items": {"type": "string"},
                                    "description": "An array of observation contents to add"
                                }
                            },
                            "required": ["entityName", "contents"]
                        }
                    }
                },
                "required": ["observations"]
            }),
            ToolKind::DeleteEntities => json!({
                "type": "object",
                "properties": {
                    "entityNames": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "An array of entity names to delete"
                    }
                },
                "required": ["entityNames"]
            }),
            ToolKind::DeleteObservations => json!({
                "type": "object",
                "properties": {
                    "deletions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "entityName": {
                                    "type": "string",
                                    "description": "The name of the entity containing the observations"
                                },
                                "observations": {
                                    "type": "array",
                                    "items": {"type": "string"},
                                    "description": "An array of observations to delete"
                                }
                            },
                            "required": ["entityName", "observations"]
                        }
                    }
                },
                "required": ["deletions"]
            }),
            ToolKind::DeleteRelations => json!({
                "type": "object",
                "properties": {
                    "relations": relation_array_schema("An array of relations to delete")
                },
                "required": ["relations"]
            }),
            ToolKind::ReadGraph => json!({
                "type": "object",
                "properties": {}
            }),
            ToolKind::SearchNodes => json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query to match against entity names, types, and observation content"
                    }
                },
                "required": ["query"]
            }),
            ToolKind::OpenNodes => json!({
                "type": "object",
                "properties": {
                    "names": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "An array of entity names to retrieve"
                    }
                },
                "required": ["names"]
            }),
        }
    }

    fn descriptor(&self) -> Tool {
        Tool {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

fn relation_array_schema(description: &str) -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "from": {
                    "type": "string",
                    "description": "The name of the entity where the relation starts"
                },
                "to": {
                    "type": "string",
                    "description": "The name of the entity where the relation ends"
                },
                "relationType": {
                    "type": "string",
                    "description": "The type of the relation"
                }
            },
            "required": ["from", "to", "relationType"]
        },
        "description": description
    })
}

#[derive(Deserialize)]
struct CreateEntitiesArgs {
    entities: Vec<EntityInput>,
}

#[derive(Deserialize)]
struct RelationsArgs {
    relations: Vec<RelationKey>,
}

#[derive(Deserialize)]
struct AddObservationsArgs {
    observations: Vec<ObservationAddition>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteEntitiesArgs {
    entity_names: Vec<String>,
}

#[derive(Deserialize)]
struct DeleteObservationsArgs {
    deletions: Vec<ObservationDeletion>,
}

#[derive(Deserialize)]
struct SearchNodesArgs {
    query: String,
}

#[derive(Deserialize)]
struct OpenNodesArgs {
    names: Vec<String>,
}

/// Tool registry that dispatches to the graph engine
pub struct ToolRegistry {
    engine: GraphEngine,
    tools: Vec<Tool>,
}

impl ToolRegistry {
    pub fn new(engine: GraphEngine) -> Self {
        Self {
            engine,
            tools: ToolKind::ALL.iter().map(ToolKind::descriptor).collect(),
        }
    }

    /// Get list of all available tools
    pub fn list(&self) -> &[Tool] {
        &self.tools
    }

    pub fn engine(&self) -> &GraphEngine {
        &self.engine
    }

    /// Validate arguments and run the named tool
    pub async fn dispatch(&self, name: &str, arguments: Value) -> Result<Value> {
        let kind =
            ToolKind::from_name(name).ok_or_else(|| KgError::UnknownTool(name.to_string()))?;

        let arguments = match arguments {
            Value::Null => json!({}),
            other => other,
        };
        check_arguments(kind, &arguments)?;

        debug!("Dispatching tool {}", name);
        let result = match kind {
            ToolKind::CreateEntities => {
                let args: CreateEntitiesArgs = decode(name, arguments)?;
                serde_json::to_value(self.engine.create_entities(args.entities).await?)?
            }
            ToolKind::CreateRelations => {
                let args: RelationsArgs = decode(name, arguments)?;
                serde_json::to_value(self.engine.create_relations(args.relations).await?)?
            }
            ToolKind::AddObservations => {
                let args: AddObservationsArgs = decode(name, arguments)?;
                serde_json::to_value(self.engine.add_observations(args.observations).await?)?
            }
            ToolKind::DeleteEntities => {
                let args: DeleteEntitiesArgs = decode(name, arguments)?;
                serde_json::to_value(self.engine.delete_entities(args.entity_names).await?)?
            }
            ToolKind::DeleteObservations => {
                let args: DeleteObservationsArgs = decode(name, arguments)?;
                serde_json::to_value(self.engine.delete_observations(args.deletions).await?)?
            }
            ToolKind::DeleteRelations => {
                let args: RelationsArgs = decode(name, arguments)?;
                serde_json::to_value(self.engine.delete_relations(args.relations).await?)?
            }
            ToolKind::ReadGraph => serde_json::to_value(self.engine.read_graph().await?)?,
            ToolKind::SearchNodes => {
                let args: SearchNodesArgs = decode(name, arguments)?;
                serde_json::to_value(self.engine.search_nodes(&args.query).await?)?
            }
            ToolKind::OpenNodes => {
                let args: OpenNodesArgs = decode(name, arguments)?;
                serde_json::to_value(self.engine.open_nodes(args.names).await?)?
            }
        };

        Ok(result)
    }
}

/// Validate arguments against the tool's input schema
fn check_arguments(kind: ToolKind, arguments: &Value) -> Result<()> {
    let schema_value = kind.input_schema();
    let schema = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema_value)
        .map_err(|e| KgError::Other(format!("Invalid input schema for {}: {}", kind.name(), e)))?;

    let problems: Vec<String> = match schema.validate(arguments) {
        Ok(()) => return Ok(()),
        Err(errors) => errors.map(describe).collect(),
    };

    Err(KgError::InvalidArguments {
        tool: kind.name().to_string(),
        message: problems.join("; "),
    })
}

fn describe(error: ValidationError<'_>) -> String {
    let path = field_path(&error.instance_path.to_string());
    match &error.kind {
        ValidationErrorKind::Required { property } => {
            let property = property
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| property.to_string());
            let field = if path.is_empty() {
                property
            } else {
                format!("{}.{}", path, property)
            };
            format!("missing required field '{}'", field)
        }
        _ if path.is_empty() => format!("arguments: {}", error),
        _ => format!("{}: {}", path, error),
    }
}

/// JSON pointer to a dotted field path: `/entities/1/name` becomes `entities[1].name`
fn field_path(pointer: &str) -> String {
    let mut path = String::new();
    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if segment.parse::<usize>().is_ok() {
            path.push('[');
            path.push_str(&segment);
            path.push(']');
        } else {
            if !path.is_empty() {
                path.push('.');
            }
            path.push_str(&segment);
        }
    }
    path
}

fn decode<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T> {
    serde_json::from_value(arguments).map_err(|e| KgError::InvalidArguments {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}
