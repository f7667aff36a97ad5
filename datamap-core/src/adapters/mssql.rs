//! SQL Server adapter: INFORMATION_SCHEMA introspection and transactional
//! batch writes over TDS.
//!
//! tiberius has no built-in pool, so every operation opens a short-lived
//! client. Upserts degrade to plain inserts; T-SQL has no single-statement
//! upsert short of MERGE, and conflicting rows surface as constraint
//! violations.

use super::sql::{self, Dialect};
use super::{ConnectionProbe, DatabaseAdapter, QueryOutput, Row, WritePlan};
use crate::error::{classify_connection_error, DataMapError, Result};
use crate::models::{
    ColumnDescriptor, ConnectionConfig, DatabaseType, SchemaDescriptor, TableDescriptor,
    TableKind, WriteOutcome,
};
use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

/// SQL Server implementation of [`DatabaseAdapter`] backed by tiberius.
pub struct MssqlAdapter {
    config: Config,
    /// Schema searched during introspection
    schema: String,
    /// Credential-free connection target for error messages
    target: String,
}

impl MssqlAdapter {
    /// Validates connectivity and returns the adapter.
    ///
    /// Credentials are handed to the TDS client at connect time and never
    /// echoed; error messages carry a password-free target description.
    ///
    /// # Errors
    /// Returns a normalized connection error when the server is unreachable
    /// or rejects the login.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let adapter = Self {
            config: build_config(config),
            schema: config.schema.clone().unwrap_or_else(|| "dbo".to_string()),
            target: format!(
                "mssql://{}@{}:{}/{}",
                config.username, config.host, config.port, config.database
            ),
        };
        // Other backends establish their pool eagerly; probe once so a bad
        // target fails at construction here too
        drop(adapter.client().await?);
        Ok(adapter)
    }

    /// Opens a fresh client for one operation.
    async fn client(&self) -> Result<Client<Compat<TcpStream>>> {
        let tcp = TcpStream::connect(self.config.get_addr())
            .await
            .map_err(|e| self.connection_error(&e.to_string()))?;
        tcp.set_nodelay(true)
            .map_err(|e| self.connection_error(&e.to_string()))?;
        Client::connect(self.config.clone(), tcp.compat_write())
            .await
            .map_err(|e| self.connection_error(&e.to_string()))
    }

    fn connection_error(&self, message: &str) -> DataMapError {
        DataMapError::connection(
            classify_connection_error(message),
            format!("{message} (target: {})", self.target),
        )
    }
}

fn build_config(config: &ConnectionConfig) -> Config {
    let mut tds = Config::new();
    tds.host(&config.host);
    tds.port(config.port);
    tds.database(&config.database);
    tds.authentication(AuthMethod::sql_server(&config.username, &config.password));
    if config.ssl {
        tds.encryption(EncryptionLevel::Required);
        tds.trust_cert();
    } else {
        tds.encryption(EncryptionLevel::NotSupported);
    }
    tds
}

fn query_error(context: &str, e: &tiberius::error::Error) -> DataMapError {
    DataMapError::query_failed(format!("{context}: {e}"))
}

/// Converts a JSON value to an owned TDS parameter.
fn json_param(value: &JsonValue) -> Box<dyn ToSql> {
    match value {
        JsonValue::Null => Box::new(Option::<String>::None),
        JsonValue::Bool(b) => Box::new(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Box::new(i)
            } else {
                Box::new(n.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(s) => Box::new(s.clone()),
        other => Box::new(other.to_string()),
    }
}

/// Runs one scalar query and returns the first column of the first row.
async fn fetch_scalar(client: &mut Client<Compat<TcpStream>>, query: &str) -> Result<String> {
    let rows = client
        .simple_query(query)
        .await
        .map_err(|e| query_error("scalar query failed", &e))?
        .into_first_result()
        .await
        .map_err(|e| query_error("scalar query failed", &e))?;
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| DataMapError::query_failed("scalar query returned no rows"))?;
    let value = row
        .try_get::<&str, _>(0)
        .map_err(|e| query_error("scalar query failed", &e))?;
    Ok(value.unwrap_or_default().to_string())
}

fn row_to_json(row: &tiberius::Row) -> JsonValue {
    let mut map = JsonMap::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), extract_column_value(row, index));
    }
    JsonValue::Object(map)
}

/// Extracts a column value as JSON, trying types in order of likelihood.
fn extract_column_value(row: &tiberius::Row, index: usize) -> JsonValue {
    if let Ok(v) = row.try_get::<&str, _>(index) {
        return v
            .map(|s| JsonValue::String(s.to_string()))
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<i32, _>(index) {
        return v
            .map(|n| JsonValue::Number(n.into()))
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return v
            .map(|n| JsonValue::Number(n.into()))
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return v.map(JsonValue::Bool).unwrap_or(JsonValue::Null);
    }
    JsonValue::Null
}

#[async_trait]
impl DatabaseAdapter for MssqlAdapter {
    async fn test_connection(&self) -> ConnectionProbe {
        let mut client = match self.client().await {
            Ok(c) => c,
            Err(e) => return ConnectionProbe::failure(e.to_string()),
        };

        let version = match fetch_scalar(&mut client, "SELECT @@VERSION").await {
            Ok(v) => v,
            Err(e) => return ConnectionProbe::failure(e.to_string()),
        };

        let mut server_info = BTreeMap::new();
        server_info.insert(
            "version".to_string(),
            version.lines().next().unwrap_or_default().to_string(),
        );
        if let Ok(db) = fetch_scalar(&mut client, "SELECT DB_NAME()").await {
            server_info.insert("current_database".to_string(), db);
        }
        if let Ok(level) = fetch_scalar(
            &mut client,
            "SELECT CAST(SERVERPROPERTY('ProductLevel') AS NVARCHAR(128))",
        )
        .await
        {
            server_info.insert("product_level".to_string(), level);
        }
        if let Ok(edition) = fetch_scalar(
            &mut client,
            "SELECT CAST(SERVERPROPERTY('Edition') AS NVARCHAR(128))",
        )
        .await
        {
            server_info.insert("edition".to_string(), edition);
        }
        ConnectionProbe::success(server_info)
    }

    async fn get_schema(&self) -> Result<SchemaDescriptor> {
        let mut client = self.client().await?;
        let mut descriptor = SchemaDescriptor::default();

        let tables = client
            .query(
                "SELECT TABLE_NAME, TABLE_TYPE \
                 FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = @P1 AND TABLE_TYPE IN ('BASE TABLE', 'VIEW') \
                 ORDER BY TABLE_NAME",
                &[&self.schema],
            )
            .await
            .map_err(|e| query_error("failed to list tables", &e))?
            .into_first_result()
            .await
            .map_err(|e| query_error("failed to list tables", &e))?;

        let table_names: Vec<(String, TableKind)> = tables
            .iter()
            .filter_map(|row| {
                let name = row.try_get::<&str, _>(0).ok().flatten()?;
                let kind = match row.try_get::<&str, _>(1).ok().flatten() {
                    Some("VIEW") => TableKind::View,
                    _ => TableKind::Table,
                };
                Some((name.to_string(), kind))
            })
            .collect();

        for (table_name, kind) in table_names {
            let mut table = TableDescriptor {
                kind,
                inferred: false,
                columns: Vec::new(),
            };

            // Lengths and precisions are cast to INT; INFORMATION_SCHEMA
            // reports NUMERIC_PRECISION as tinyint
            let columns = client
                .query(
                    "SELECT c.COLUMN_NAME, c.DATA_TYPE, \
                            CAST(c.CHARACTER_MAXIMUM_LENGTH AS INT), \
                            CAST(c.NUMERIC_PRECISION AS INT), \
                            CAST(c.NUMERIC_SCALE AS INT), \
                            c.IS_NULLABLE, c.COLUMN_DEFAULT, tc.CONSTRAINT_TYPE \
                     FROM INFORMATION_SCHEMA.COLUMNS c \
                     LEFT JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
                       ON c.TABLE_SCHEMA = kcu.TABLE_SCHEMA \
                      AND c.TABLE_NAME = kcu.TABLE_NAME \
                      AND c.COLUMN_NAME = kcu.COLUMN_NAME \
                     LEFT JOIN INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
                       ON kcu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME \
                      AND kcu.TABLE_SCHEMA = tc.TABLE_SCHEMA \
                      AND tc.CONSTRAINT_TYPE IN ('PRIMARY KEY', 'FOREIGN KEY') \
                     WHERE c.TABLE_SCHEMA = @P1 AND c.TABLE_NAME = @P2 \
                     ORDER BY c.ORDINAL_POSITION",
                    &[&self.schema, &table_name],
                )
                .await
                .map_err(|e| query_error("failed to list columns", &e))?
                .into_first_result()
                .await
                .map_err(|e| query_error("failed to list columns", &e))?;

            for col in &columns {
                let name = col
                    .try_get::<&str, _>(0)
                    .map_err(|e| query_error("failed to read column name", &e))?
                    .unwrap_or_default()
                    .to_string();
                let constraint = col
                    .try_get::<&str, _>(7)
                    .unwrap_or(None)
                    .map(ToString::to_string);

                // The constraint join can emit one row per constraint; merge
                // duplicates instead of repeating the column
                if let Some(existing) = table.columns.iter_mut().find(|c| c.name == name) {
                    if let Some(constraint) = constraint {
                        if !existing.constraints.contains(&constraint) {
                            existing.constraints.push(constraint);
                        }
                    }
                    continue;
                }

                let data_type = col
                    .try_get::<&str, _>(1)
                    .map_err(|e| query_error("failed to read column type", &e))?
                    .unwrap_or_default()
                    .to_string();
                let length = col.try_get::<i32, _>(2).unwrap_or(None);
                let precision = col.try_get::<i32, _>(3).unwrap_or(None);
                let scale = col.try_get::<i32, _>(4).unwrap_or(None);
                let is_nullable = col.try_get::<&str, _>(5).unwrap_or(None).unwrap_or("");

                table.columns.push(ColumnDescriptor {
                    name,
                    data_type,
                    nullable: is_nullable == "YES",
                    default: col
                        .try_get::<&str, _>(6)
                        .unwrap_or(None)
                        .map(ToString::to_string),
                    constraints: constraint.into_iter().collect(),
                    // varchar(max) reports -1, which drops to None here
                    length: length.and_then(|v| u32::try_from(v).ok()),
                    precision: if length.is_none() {
                        precision.and_then(|v| u32::try_from(v).ok())
                    } else {
                        None
                    },
                    scale: if length.is_none() {
                        scale.and_then(|v| u32::try_from(v).ok())
                    } else {
                        None
                    },
                });
            }

            descriptor.tables.insert(table_name, table);
        }

        // Identity columns are invisible to INFORMATION_SCHEMA constraints
        let identity = client
            .query(
                "SELECT OBJECT_NAME(object_id), name \
                 FROM sys.identity_columns \
                 WHERE OBJECT_SCHEMA_NAME(object_id) = @P1",
                &[&self.schema],
            )
            .await
            .map_err(|e| query_error("failed to list identity columns", &e))?
            .into_first_result()
            .await
            .map_err(|e| query_error("failed to list identity columns", &e))?;

        for row in &identity {
            let (Some(table_name), Some(column_name)) = (
                row.try_get::<&str, _>(0).unwrap_or(None),
                row.try_get::<&str, _>(1).unwrap_or(None),
            ) else {
                continue;
            };
            if let Some(table) = descriptor.tables.get_mut(table_name) {
                if let Some(column) = table.columns.iter_mut().find(|c| c.name == column_name) {
                    let identity = "IDENTITY".to_string();
                    if !column.constraints.contains(&identity) {
                        column.constraints.push(identity);
                    }
                }
            }
        }

        Ok(descriptor)
    }

    async fn execute_query(&self, query: &str, params: &[JsonValue]) -> Result<QueryOutput> {
        let mut client = self.client().await?;
        let owned: Vec<Box<dyn ToSql>> = params.iter().map(json_param).collect();
        let refs: Vec<&dyn ToSql> = owned.iter().map(|p| p.as_ref()).collect();

        if sql::is_select_like(query) {
            let rows = client
                .query(query, &refs)
                .await
                .map_err(|e| query_error("query failed", &e))?
                .into_first_result()
                .await
                .map_err(|e| query_error("query failed", &e))?;
            Ok(QueryOutput::Rows(rows.iter().map(row_to_json).collect()))
        } else {
            let result = client
                .execute(query, &refs)
                .await
                .map_err(|e| query_error("statement failed", &e))?;
            Ok(QueryOutput::Affected(result.total()))
        }
    }

    async fn write_batch(&self, plan: &WritePlan, records: &[Row]) -> Result<WriteOutcome> {
        if records.is_empty() {
            return Ok(WriteOutcome::default());
        }

        let mut client = self.client().await?;
        client
            .execute("BEGIN TRANSACTION", &[])
            .await
            .map_err(|e| query_error("failed to open transaction", &e))?;

        for (index, record) in records.iter().enumerate() {
            let columns = sql::column_names(record);
            let statement = sql::write_statement(Dialect::SqlServer, plan, &columns);
            let owned: Vec<Box<dyn ToSql>> = columns
                .iter()
                .map(|c| json_param(record.get(c).unwrap_or(&JsonValue::Null)))
                .collect();
            let refs: Vec<&dyn ToSql> = owned.iter().map(|p| p.as_ref()).collect();
            if let Err(e) = client.execute(statement.as_str(), &refs).await {
                client.execute("ROLLBACK TRANSACTION", &[]).await.ok();
                return Err(DataMapError::query_failed(format!("record {index}: {e}")));
            }
        }

        client
            .execute("COMMIT TRANSACTION", &[])
            .await
            .map_err(|e| query_error("commit failed", &e))?;
        debug!(count = records.len(), table = %plan.table, "batch committed");

        Ok(WriteOutcome {
            success: records.len(),
            failed: 0,
            errors: Vec::new(),
        })
    }

    fn render_write_preview(&self, plan: &WritePlan, record: &Row) -> String {
        sql::render_preview(Dialect::SqlServer, plan, record)
    }

    async fn close(&self) {
        // Clients are per-operation; nothing is held open
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SqlServer
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use tiberius::ColumnData;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            db_type: DatabaseType::SqlServer,
            host: "db.example.org".to_string(),
            port: 1433,
            database: "appdb".to_string(),
            schema: None,
            username: "app".to_string(),
            password: "hunter2".to_string(),
            ssl: false,
            options: BTreeMap::new(),
        }
    }

    #[test]
    fn test_target_never_carries_password() {
        let cfg = config();
        let target = format!(
            "mssql://{}@{}:{}/{}",
            cfg.username, cfg.host, cfg.port, cfg.database
        );
        assert_eq!(target, "mssql://app@db.example.org:1433/appdb");
        assert!(!target.contains("hunter2"));
    }

    #[test]
    fn test_json_param_maps_tds_types() {
        assert!(matches!(
            json_param(&json!(null)).to_sql(),
            ColumnData::String(None)
        ));
        assert!(matches!(
            json_param(&json!(true)).to_sql(),
            ColumnData::Bit(Some(true))
        ));
        assert!(matches!(
            json_param(&json!(42)).to_sql(),
            ColumnData::I64(Some(42))
        ));
        assert!(matches!(
            json_param(&json!(2.5)).to_sql(),
            ColumnData::F64(Some(v)) if (v - 2.5).abs() < f64::EPSILON
        ));
        match json_param(&json!("ada")).to_sql() {
            ColumnData::String(Some(s)) => assert_eq!(s, "ada"),
            other => panic!("expected string parameter, got {other:?}"),
        }
        // Structured values are serialized to their JSON text
        match json_param(&json!({"k": 1})).to_sql() {
            ColumnData::String(Some(s)) => assert_eq!(s, r#"{"k":1}"#),
            other => panic!("expected string parameter, got {other:?}"),
        }
    }

    #[test]
    fn test_preview_uses_tsql_quoting() {
        let plan = WritePlan {
            table: "users".to_string(),
            update_on_conflict: false,
            conflict_columns: Vec::new(),
        };
        let mut record = Row::new();
        record.insert("id".to_string(), json!(7));
        record.insert("name".to_string(), json!("Ada"));
        let preview = sql::render_preview(Dialect::SqlServer, &plan, &record);
        assert_eq!(preview, "INSERT INTO [users] ([id], [name]) VALUES (7, 'Ada');");
    }
}
