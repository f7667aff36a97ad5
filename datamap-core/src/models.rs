//! Core data models: connection configuration, schema descriptors, mapping
//! specifications and execution results.
//!
//! All models are serde-serializable so the configuration layer can persist
//! them and the UI can render them. None of them carry raw backend handles.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;

/// Supported target database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[serde(rename = "postgresql")]
    PostgreSql,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "mssql")]
    SqlServer,
    #[serde(rename = "mongodb")]
    MongoDb,
}

impl DatabaseType {
    /// Resolves a backend-type identifier to a database type.
    ///
    /// # Errors
    /// Returns a configuration error naming the supported identifiers when
    /// the type is unknown.
    pub fn parse(identifier: &str) -> crate::Result<Self> {
        match identifier.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseType::PostgreSql),
            "mysql" => Ok(DatabaseType::MySql),
            "mssql" | "sqlserver" => Ok(DatabaseType::SqlServer),
            "mongodb" => Ok(DatabaseType::MongoDb),
            other => Err(crate::error::DataMapError::configuration(format!(
                "Unsupported database type '{}' (supported: postgresql, mysql, mssql, mongodb)",
                other
            ))),
        }
    }

    /// True for backends with transactional batch-write semantics.
    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            DatabaseType::PostgreSql | DatabaseType::MySql | DatabaseType::SqlServer
        )
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseType::PostgreSql => write!(f, "PostgreSQL"),
            DatabaseType::MySql => write!(f, "MySQL"),
            DatabaseType::SqlServer => write!(f, "SQL Server"),
            DatabaseType::MongoDb => write!(f, "MongoDB"),
        }
    }
}

/// Resolved target-database connection configuration.
///
/// Credentials arrive already decrypted from the configuration layer. The
/// password is excluded from serialization and from `Debug`/`Display` output;
/// this crate never persists or logs it.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Backend family
    pub db_type: DatabaseType,
    /// Database host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Database name
    pub database: String,
    /// Optional schema name (relational backends; defaults to the backend's
    /// conventional schema)
    pub schema: Option<String>,
    /// Username
    pub username: String,
    /// Password (never serialized or logged)
    #[serde(default, skip_serializing)]
    pub password: String,
    /// Whether TLS is required
    #[serde(default)]
    pub ssl: bool,
    /// Backend-specific connection options (e.g. `connection_type = atlas`)
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("db_type", &self.db_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("ssl", &self.ssl)
            // username and password intentionally omitted
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}://{}:{}/{}",
            self.db_type, self.host, self.port, self.database
        )
        // Credentials intentionally never included
    }
}

impl ConnectionConfig {
    /// Validates connection parameters.
    ///
    /// # Errors
    /// Returns a configuration error for an empty host, zero port or empty
    /// database name.
    pub fn validate(&self) -> crate::Result<()> {
        if self.host.is_empty() {
            return Err(crate::error::DataMapError::configuration(
                "host cannot be empty",
            ));
        }
        if self.port == 0 {
            return Err(crate::error::DataMapError::configuration(
                "port must be greater than 0",
            ));
        }
        if self.database.is_empty() {
            return Err(crate::error::DataMapError::configuration(
                "database cannot be empty",
            ));
        }
        Ok(())
    }
}

/// Kind of schema object a descriptor entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableKind {
    Table,
    View,
    Collection,
}

/// One column (or inferred document field) of a target table/collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Raw backend type string, as reported by the catalog or inferred from
    /// a sample document
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Constraint markers such as `PRIMARY KEY` / `FOREIGN KEY`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
}

impl ColumnDescriptor {
    /// Minimal descriptor with just a name and raw type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
            constraints: Vec::new(),
            length: None,
            precision: None,
            scale: None,
        }
    }
}

/// Structure of one table, view or collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub kind: TableKind,
    /// True when the structure was inferred from a sample document rather
    /// than read from an authoritative catalog
    #[serde(default)]
    pub inferred: bool,
    /// Ordered column list
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Introspected or inferred structural metadata of a target database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    /// Table/collection name -> descriptor, ordered by name
    pub tables: BTreeMap<String, TableDescriptor>,
}

impl SchemaDescriptor {
    /// Looks up a table/collection descriptor by name.
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.get(name)
    }
}

/// Declarative rule mapping one source path to one target column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Dot-path into the source record; missing segments resolve to absent,
    /// never an error
    pub source_path: String,
    pub target_column: String,
    /// Ordered transform names, composed left to right
    #[serde(default)]
    pub transforms: Vec<String>,
    /// Substituted when the source value is absent or null
    #[serde(default)]
    pub default_value: Option<JsonValue>,
    /// Drop the column entirely when the source value is absent or null
    #[serde(default)]
    pub skip_if_null: bool,
}

/// Complete mapping specification: owned by the configuration layer, a
/// read-only input to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingSpec {
    /// Ordered field mappings
    pub field_mappings: Vec<FieldMapping>,
    /// Target table or collection name
    pub target_table: String,
    /// Upsert key columns
    #[serde(default)]
    pub conflict_columns: Vec<String>,
    /// Records per write batch; must be greater than 0
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Issue upserts keyed by `conflict_columns` instead of plain inserts
    #[serde(default)]
    pub update_on_conflict: bool,
}

fn default_batch_size() -> usize {
    100
}

impl MappingSpec {
    /// Validates the specification.
    ///
    /// # Errors
    /// Returns a configuration error when the batch size is zero, the target
    /// table is empty, or no field mappings are defined.
    pub fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 {
            return Err(crate::error::DataMapError::configuration(
                "batch_size must be greater than 0",
            ));
        }
        if self.target_table.is_empty() {
            return Err(crate::error::DataMapError::configuration(
                "target_table cannot be empty",
            ));
        }
        if self.field_mappings.is_empty() {
            return Err(crate::error::DataMapError::configuration(
                "field_mappings cannot be empty",
            ));
        }
        Ok(())
    }
}

/// Execution lifecycle state. Terminal state is decided once, from the
/// aggregate counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Success,
    Partial,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Partial => write!(f, "partial"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Pipeline stage at which a record error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    /// Per-field transform pipeline
    Transform,
    /// Batch write to the target adapter
    Write,
    /// Fetch or setup failure affecting the whole execution
    General,
}

/// Structured per-record error entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordError {
    /// Index of the record within the full extracted record list; `None`
    /// for execution-level errors
    pub record_index: Option<usize>,
    pub stage: ErrorStage,
    pub message: String,
    /// Snapshot of conventional key fields for identifying the record
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub field_values: JsonMap<String, JsonValue>,
}

/// Conventional keys probed when snapshotting a record for error reporting.
const KEY_FIELD_NAMES: &[&str] = &["id", "email", "name", "username", "code", "identifier"];

/// Nested containers also probed for the conventional keys.
const NESTED_CONTAINERS: &[&str] = &["data", "attributes", "properties"];

/// Extracts identifying fields from a source record for error reporting.
///
/// Probes the conventional key names at the top level and one level down in
/// common container fields; when nothing matches, falls back to the first
/// three scalar fields of the record.
pub fn key_field_snapshot(record: &JsonValue) -> JsonMap<String, JsonValue> {
    let mut snapshot = JsonMap::new();
    let Some(object) = record.as_object() else {
        return snapshot;
    };

    for key in KEY_FIELD_NAMES {
        if let Some(value) = object.get(*key) {
            snapshot.insert((*key).to_string(), value.clone());
        }
        for container in NESTED_CONTAINERS {
            if let Some(nested) = object.get(*container).and_then(JsonValue::as_object) {
                if let Some(value) = nested.get(*key) {
                    snapshot.insert(format!("{}.{}", container, key), value.clone());
                }
            }
        }
    }

    if snapshot.is_empty() {
        for (key, value) in object.iter() {
            if snapshot.len() >= 3 {
                break;
            }
            if !value.is_object() && !value.is_array() {
                snapshot.insert(key.clone(), value.clone());
            }
        }
    }

    snapshot
}

/// Outcome of one batch write, merged with transform failures by the engine.
///
/// Invariant: once merged, `success + failed` equals the batch length and
/// `failed == 0` implies batch success.
#[derive(Debug, Clone, Default)]
pub struct WriteOutcome {
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<RecordError>,
}

/// Final result of one mapping execution. Created once per run and finalized
/// exactly once; never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub total_records: usize,
    pub processed_records: usize,
    pub failed_records: usize,
    pub execution_time_ms: u64,
    /// Full ordered error list; use [`ExecutionResult::error_preview`] for a
    /// bounded view
    pub errors: Vec<RecordError>,
}

impl ExecutionResult {
    /// Bounded error preview (first 10 entries); the full list stays in
    /// `errors` for collaborator-side persistence.
    pub fn error_preview(&self) -> &[RecordError] {
        let n = self.errors.len().min(10);
        &self.errors[..n]
    }
}

/// Advisory compatibility verdict between an inferred source type and a
/// target column type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeValidationEntry {
    pub source_type: String,
    pub target_type: String,
    pub compatible: bool,
    pub conversion_needed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Truncated sample value from the source record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_value: Option<String>,
}

/// How a field-mapping suggestion was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Identical after name normalization
    Exact,
    /// Both names belong to the same curated synonym group
    Synonym,
    /// Best fuzzy-similarity candidate
    Fuzzy,
}

/// Suggested source->target field mapping for the interactive builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingSuggestion {
    pub source_path: String,
    pub source_name: String,
    pub target_column: String,
    /// 0-100 match confidence
    pub confidence: u8,
    pub match_kind: MatchKind,
}
