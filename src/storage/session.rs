//! Store session over libSQL
//!
//! A [`Session`] is the single shared handle to the backing store. It owns one
//! libSQL connection, knows which namespace/database scope it is bound to, and
//! exposes the narrow contract the graph store is written against: connect,
//! select a scope, ensure the schema, run a query, insert a record, close.

use crate::error::{KgError, Result};
use crate::storage::rows::Record;
use libsql::params::Params;
use libsql::{Builder, Connection, Database};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Database connection mode
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionMode {
    /// Local file-based database
    Local(String),
    /// In-memory database (for testing)
    InMemory,
    /// Remote database (libSQL server / Turso)
    Remote { url: String, token: String },
}

impl ConnectionMode {
    /// Parse a store URL into a connection mode
    ///
    /// - ":memory:" → InMemory
    /// - "libsql://", "http://", "https://" → Remote with the given token
    /// - "file:" prefix or anything else → Local file path
    pub fn from_url(url: &str, token: &str) -> Self {
        if url == ":memory:" {
            ConnectionMode::InMemory
        } else if url.starts_with("libsql://")
            || url.starts_with("http://")
            || url.starts_with("https://")
        {
            ConnectionMode::Remote {
                url: url.to_string(),
                token: token.to_string(),
            }
        } else {
            let path = url.strip_prefix("file:").unwrap_or(url);
            ConnectionMode::Local(path.to_string())
        }
    }
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionMode::Local(path) => write!(f, "{}", path),
            ConnectionMode::InMemory => write!(f, ":memory:"),
            // Never print the token
            ConnectionMode::Remote { url, .. } => write!(f, "{}", url),
        }
    }
}

/// Bounded exponential backoff for connection attempts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

/// Table a record is inserted into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Entities,
    Relations,
}

impl Collection {
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Entities => "kg_entities",
            Collection::Relations => "kg_relations",
        }
    }

    fn columns(&self) -> &'static [&'static str] {
        match self {
            Collection::Entities => &[
                "name",
                "entity_type",
                "observations",
                "created_at",
                "updated_at",
            ],
            Collection::Relations => &["from_entity", "to_entity", "relation_type", "created_at"],
        }
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kg_entities (
    scope TEXT NOT NULL,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    observations TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (scope, name)
);
CREATE TABLE IF NOT EXISTS kg_relations (
    scope TEXT NOT NULL,
    from_entity TEXT NOT NULL,
    to_entity TEXT NOT NULL,
    relation_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (scope, from_entity, to_entity, relation_type)
);
CREATE INDEX IF NOT EXISTS kg_relations_to ON kg_relations (scope, to_entity);
"#;

/// Shared handle to the backing store
pub struct Session {
    id: Uuid,
    mode: ConnectionMode,
    // Kept alive for the lifetime of the connection
    _db: Database,
    conn: Connection,
    scope: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("mode", &self.mode.to_string())
            .field("scope", &self.scope)
            .finish()
    }
}

impl Session {
    /// Open a connection and verify the store answers
    pub async fn connect(mode: ConnectionMode) -> Result<Self> {
        info!("Connecting to store: {}", mode);

        let db = match &mode {
            ConnectionMode::Local(path) => {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            KgError::Connection(format!(
                                "Failed to create database directory {}: {}",
                                parent.display(),
                                e
                            ))
                        })?;
                    }
                }
                Builder::new_local(path).build().await
            }
            ConnectionMode::InMemory => Builder::new_local(":memory:").build().await,
            ConnectionMode::Remote { url, token } => {
                Builder::new_remote(url.clone(), token.clone()).build().await
            }
        }
        .map_err(|e| KgError::Connection(format!("Failed to open store {}: {}", mode, e)))?;

        let conn = db
            .connect()
            .map_err(|e| KgError::Connection(format!("Failed to connect to {}: {}", mode, e)))?;

        // Remote builders are lazy; the first round-trip is the real reachability check
        conn.query("SELECT 1", ())
            .await
            .map_err(|e| KgError::Connection(format!("Store {} is unreachable: {}", mode, e)))?;

        let session = Self {
            id: Uuid::new_v4(),
            mode,
            _db: db,
            conn,
            scope: String::new(),
        };
        debug!("Store session {} established", session.id);
        Ok(session)
    }

    /// Connect, retrying connection failures with exponential backoff
    pub async fn connect_with_retry(mode: ConnectionMode, policy: RetryPolicy) -> Result<Self> {
        let mut attempt = 0;
        loop {
            match Self::connect(mode.clone()).await {
                Ok(session) => return Ok(session),
                Err(e) if e.is_retryable() && attempt < policy.retries => {
                    let delay = policy.delay(attempt);
                    warn!(
                        "Store connection attempt {} failed: {}; retrying in {:?}",
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Bind the session to a namespace/database pair
    ///
    /// Rows are keyed by scope, so sessions bound to different pairs never
    /// see each other's data even when they share one physical database.
    pub fn select_namespace(&mut self, namespace: &str, database: &str) -> Result<()> {
        if namespace.is_empty() || database.is_empty() {
            return Err(KgError::Other(
                "namespace and database selectors must not be empty".to_string(),
            ));
        }
        if namespace.contains('/') {
            return Err(KgError::Other(format!(
                "namespace '{}' must not contain '/'",
                namespace
            )));
        }
        self.scope = format!("{}/{}", namespace, database);
        debug!("Session {} bound to scope {}", self.id, self.scope);
        Ok(())
    }

    /// Create tables and uniqueness constraints if absent
    pub async fn ensure_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA)
            .await
            .map_err(|e| KgError::Database(format!("Failed to ensure schema: {}", e)))?;
        debug!("Schema ensured");
        Ok(())
    }

    fn require_scope(&self) -> Result<&str> {
        if self.scope.is_empty() {
            return Err(KgError::Other(
                "no namespace selected on store session".to_string(),
            ));
        }
        Ok(&self.scope)
    }

    /// Run a query; the scope is always bound as `?1`
    pub async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Record>> {
        let bound = self.bind(params)?;
        let mut rows = self.conn.query(sql, Params::Positional(bound)).await?;

        let columns: Vec<String> = (0..rows.column_count())
            .map(|i| rows.column_name(i).unwrap_or_default().to_string())
            .collect();

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Record::from_row(&row, &columns)?);
        }
        Ok(records)
    }

    /// Run a statement; the scope is always bound as `?1`
    pub async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<u64> {
        let bound = self.bind(params)?;
        Ok(self.conn.execute(sql, Params::Positional(bound)).await?)
    }

    /// Insert a record unless it violates a uniqueness constraint
    ///
    /// Returns the stored row, or `None` when an equal key already existed.
    pub async fn insert(&self, collection: Collection, record: &Record) -> Result<Option<Record>> {
        let allowed = collection.columns();
        let mut columns = Vec::with_capacity(record.0.len());
        let mut values = Vec::with_capacity(record.0.len());
        for (column, value) in &record.0 {
            if !allowed.contains(&column.as_str()) {
                return Err(KgError::Database(format!(
                    "unknown column '{}' for {}",
                    column,
                    collection.table()
                )));
            }
            columns.push(column.as_str());
            values.push(value.clone());
        }

        let placeholders: Vec<String> = (0..columns.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            "INSERT INTO {} (scope, {}) VALUES (?1, {}) ON CONFLICT DO NOTHING RETURNING *",
            collection.table(),
            columns.join(", "),
            placeholders.join(", ")
        );

        Ok(self.query(&sql, values).await?.into_iter().next())
    }

    /// Release the connection
    pub fn close(self) {
        info!("Closing store session {}", self.id);
    }

    fn bind(&self, params: Vec<Value>) -> Result<Vec<libsql::Value>> {
        let scope = self.require_scope()?;
        let mut bound = Vec::with_capacity(params.len() + 1);
        bound.push(libsql::Value::Text(scope.to_string()));
        bound.extend(params.into_iter().map(json_to_sql));
        Ok(bound)
    }
}

fn json_to_sql(value: Value) -> libsql::Value {
    match value {
        Value::Null => libsql::Value::Null,
        Value::Bool(b) => libsql::Value::Integer(b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => libsql::Value::Integer(i),
            None => libsql::Value::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => libsql::Value::Text(s),
        other => libsql::Value::Text(other.to_string()),
    }
}
