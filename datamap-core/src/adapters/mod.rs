//! Database adapter trait and factory for unified target-database access.
//!
//! Each backend module implements [`DatabaseAdapter`] for one database
//! family; the engine only ever sees `Box<dyn DatabaseAdapter>`. Connection
//! strings are built here from structured configuration and are redacted in
//! every error message.

use crate::error::Result;
use crate::models::{ConnectionConfig, DatabaseType, MappingSpec, SchemaDescriptor, WriteOutcome};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;

#[cfg(feature = "mongodb")]
pub mod mongodb;
#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgresql")]
pub mod postgres;
#[cfg(any(feature = "postgresql", feature = "mysql", feature = "mssql"))]
pub(crate) mod sql;

/// One transformed record, keyed by target column name.
pub type Row = JsonMap<String, JsonValue>;

/// Result of a connectivity probe. Probes never error; failures are reported
/// through `ok` and `message`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionProbe {
    pub ok: bool,
    pub message: String,
    /// Backend-reported facts such as server version and current database
    pub server_info: BTreeMap<String, String>,
}

impl ConnectionProbe {
    pub(crate) fn success(server_info: BTreeMap<String, String>) -> Self {
        Self {
            ok: true,
            message: "Connection successful".to_string(),
            server_info,
        }
    }

    pub(crate) fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            server_info: BTreeMap::new(),
        }
    }
}

/// Output of an ad-hoc query.
#[derive(Debug, Clone)]
pub enum QueryOutput {
    /// Result rows of a SELECT-like statement, one JSON object per row
    Rows(Vec<JsonValue>),
    /// Affected-row count of a mutating statement
    Affected(u64),
}

/// How a batch of transformed records lands in the target.
#[derive(Debug, Clone)]
pub struct WritePlan {
    /// Target table or collection name
    pub table: String,
    /// Upsert instead of plain insert
    pub update_on_conflict: bool,
    /// Key columns identifying an existing row for upserts
    pub conflict_columns: Vec<String>,
}

impl WritePlan {
    /// Derives the write plan from a mapping specification.
    pub fn from_spec(spec: &MappingSpec) -> Self {
        Self {
            table: spec.target_table.clone(),
            update_on_conflict: spec.update_on_conflict,
            conflict_columns: spec.conflict_columns.clone(),
        }
    }
}

/// Object-safe adapter interface over one target database.
///
/// Credentials are consumed at construction time and never stored in
/// serializable state, logged, or echoed in errors.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Probes connectivity and gathers server facts. Never errors; a failed
    /// probe carries the normalized failure message.
    async fn test_connection(&self) -> ConnectionProbe;

    /// Introspects the structure of the target database.
    ///
    /// Relational backends read the catalog; document backends infer the
    /// structure from one sample document per collection and mark the result
    /// as inferred.
    ///
    /// # Errors
    /// Returns an error when the backend is unreachable or introspection
    /// queries fail.
    async fn get_schema(&self) -> Result<SchemaDescriptor>;

    /// Runs one ad-hoc query with positional parameters.
    ///
    /// # Errors
    /// Returns a query-execution error carrying the backend message.
    async fn execute_query(&self, query: &str, params: &[JsonValue]) -> Result<QueryOutput>;

    /// Writes one batch of transformed records.
    ///
    /// Relational backends wrap the batch in a single transaction: the first
    /// failing record rolls everything back and surfaces as an `Err` naming
    /// the failing index. Document backends report partial failures inside
    /// an `Ok` outcome instead.
    ///
    /// # Errors
    /// Returns a query-execution error when the batch cannot be applied
    /// atomically.
    async fn write_batch(&self, plan: &WritePlan, records: &[Row]) -> Result<WriteOutcome>;

    /// Renders the write statement for one record as a diagnostic preview.
    /// Never executed; values are rendered inline.
    fn render_write_preview(&self, plan: &WritePlan, record: &Row) -> String;

    /// Releases the underlying pool or client.
    async fn close(&self);

    /// Backend family this adapter talks to.
    fn database_type(&self) -> DatabaseType;
}

/// Creates the adapter for a connection configuration.
///
/// # Errors
/// Returns a configuration error for invalid parameters, a connection error
/// when the pool cannot be established, or an unsupported-feature error when
/// the backend was not compiled in.
pub async fn create_adapter(config: &ConnectionConfig) -> Result<Box<dyn DatabaseAdapter>> {
    config.validate()?;

    match config.db_type {
        #[cfg(feature = "postgresql")]
        DatabaseType::PostgreSql => {
            let adapter = postgres::PostgresAdapter::connect(config).await?;
            Ok(Box::new(adapter))
        }
        #[cfg(not(feature = "postgresql"))]
        DatabaseType::PostgreSql => Err(crate::error::DataMapError::unsupported_feature(
            "PostgreSQL adapter (compile with --features postgresql)",
            "postgresql",
        )),
        #[cfg(feature = "mysql")]
        DatabaseType::MySql => {
            let adapter = mysql::MySqlAdapter::connect(config).await?;
            Ok(Box::new(adapter))
        }
        #[cfg(not(feature = "mysql"))]
        DatabaseType::MySql => Err(crate::error::DataMapError::unsupported_feature(
            "MySQL adapter (compile with --features mysql)",
            "mysql",
        )),
        #[cfg(feature = "mssql")]
        DatabaseType::SqlServer => {
            let adapter = mssql::MssqlAdapter::connect(config).await?;
            Ok(Box::new(adapter))
        }
        #[cfg(not(feature = "mssql"))]
        DatabaseType::SqlServer => Err(crate::error::DataMapError::unsupported_feature(
            "SQL Server adapter (compile with --features mssql)",
            "mssql",
        )),
        #[cfg(feature = "mongodb")]
        DatabaseType::MongoDb => {
            let adapter = mongodb::MongoAdapter::connect(config).await?;
            Ok(Box::new(adapter))
        }
        #[cfg(not(feature = "mongodb"))]
        DatabaseType::MongoDb => Err(crate::error::DataMapError::unsupported_feature(
            "MongoDB adapter (compile with --features mongodb)",
            "mongodb",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldMapping;

    #[test]
    fn test_write_plan_from_spec() {
        let spec = MappingSpec {
            field_mappings: vec![FieldMapping {
                source_path: "id".to_string(),
                target_column: "id".to_string(),
                transforms: Vec::new(),
                default_value: None,
                skip_if_null: false,
            }],
            target_table: "users".to_string(),
            conflict_columns: vec!["id".to_string()],
            batch_size: 100,
            update_on_conflict: true,
        };
        let plan = WritePlan::from_spec(&spec);
        assert_eq!(plan.table, "users");
        assert!(plan.update_on_conflict);
        assert_eq!(plan.conflict_columns, vec!["id".to_string()]);
    }

    #[test]
    fn test_connection_probe_constructors() {
        let ok = ConnectionProbe::success(BTreeMap::new());
        assert!(ok.ok);
        let failed = ConnectionProbe::failure("no route to host");
        assert!(!failed.ok);
        assert!(failed.server_info.is_empty());
    }
}
