//! Row decoding and result-shape normalization
//!
//! The store hands back rows whose JSON columns are not uniform: older
//! writers stored observations as bare strings, some tools wrapped result
//! sets in extra arrays or `{"result": [...]}` envelopes, and missing values
//! come back as `null`. Everything is flattened here so the graph engine only
//! ever sees typed entities and relations.

use crate::error::{KgError, Result};
use crate::types::{Entity, Observation, Relation};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// A single row keyed by column name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(pub Map<String, Value>);

impl Record {
    /// Build a record from a libSQL row using the column names of its result set
    pub fn from_row(row: &libsql::Row, columns: &[String]) -> Result<Self> {
        let mut map = Map::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            let value = row.get_value(idx as i32)?;
            map.insert(name.clone(), sql_to_json(value));
        }
        Ok(Self(map))
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// Required text column
    pub fn text(&self, column: &str) -> Result<String> {
        match self.0.get(column) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            other => Err(KgError::Database(format!(
                "column '{}' expected text, found {:?}",
                column, other
            ))),
        }
    }

    /// Timestamp column, falling back when absent or unparseable
    pub fn timestamp_or(&self, column: &str, fallback: DateTime<Utc>) -> DateTime<Utc> {
        self.0
            .get(column)
            .and_then(parse_timestamp)
            .unwrap_or(fallback)
    }

    /// Column that holds a JSON document encoded as text
    pub fn json(&self, column: &str) -> Value {
        match self.0.get(column) {
            Some(Value::String(raw)) => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
            }
            Some(other) => other.clone(),
            None => Value::Null,
        }
    }
}

fn sql_to_json(value: libsql::Value) -> Value {
    match value {
        libsql::Value::Null => Value::Null,
        libsql::Value::Integer(i) => Value::from(i),
        libsql::Value::Real(f) => Value::from(f),
        libsql::Value::Text(s) => Value::String(s),
        libsql::Value::Blob(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| DateTime::<Utc>::from_timestamp_millis(millis)),
        _ => None,
    }
}

/// Flatten a possibly-wrapped result into a plain sequence of items
///
/// `null` becomes empty, a lone object becomes a one-element sequence,
/// nested arrays are flattened at any depth, `{"result": ...}` envelopes
/// are unwrapped, and `null` items are dropped.
pub fn normalize_sequence(value: Value) -> Vec<Value> {
    let mut out = Vec::new();
    flatten_into(value, &mut out);
    out
}

fn flatten_into(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        Value::Object(mut map) if map.len() == 1 && map.contains_key("result") => {
            if let Some(inner) = map.remove("result") {
                flatten_into(inner, out);
            }
        }
        other => out.push(other),
    }
}

/// Decode an observations column into typed observations
///
/// Bare strings are lifted into observations stamped with `fallback`
/// (the owning entity's creation time).
pub fn normalize_observations(raw: Value, fallback: DateTime<Utc>) -> Vec<Observation> {
    normalize_sequence(raw)
        .into_iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(Observation::new(text, fallback)),
            Value::Object(map) => {
                let text = map.get("text").and_then(Value::as_str)?.to_string();
                let created_at = map
                    .get("createdAt")
                    .and_then(parse_timestamp)
                    .unwrap_or(fallback);
                Some(Observation::new(text, created_at))
            }
            _ => None,
        })
        .collect()
}

/// Decode an entity row
pub fn entity_from_record(record: &Record) -> Result<Entity> {
    let now = crate::types::now();
    let created_at = record.timestamp_or("created_at", now);
    let updated_at = record.timestamp_or("updated_at", created_at);

    Ok(Entity {
        name: record.text("name")?,
        entity_type: record.text("entity_type")?,
        observations: normalize_observations(record.json("observations"), created_at),
        created_at,
        updated_at,
    })
}

/// Decode a relation row
pub fn relation_from_record(record: &Record) -> Result<Relation> {
    Ok(Relation {
        from: record.text("from_entity")?,
        to: record.text("to_entity")?,
        relation_type: record.text("relation_type")?,
        created_at: record.timestamp_or("created_at", crate::types::now()),
    })
}
