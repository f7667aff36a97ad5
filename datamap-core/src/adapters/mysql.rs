//! MySQL adapter: catalog introspection and transactional batch writes.

use super::sql::{self, Dialect};
use super::{ConnectionProbe, DatabaseAdapter, QueryOutput, Row, WritePlan};
use crate::error::{classify_connection_error, redact_database_url, DataMapError, Result};
use crate::models::{
    ColumnDescriptor, ConnectionConfig, DatabaseType, SchemaDescriptor, TableDescriptor,
    TableKind, WriteOutcome,
};
use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue};
use sqlx::mysql::{MySqlArguments, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, MySql, MySqlPool, Row as SqlxRow};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_POOL_CONNECTIONS: u32 = 5;

/// MySQL implementation of [`DatabaseAdapter`] backed by a sqlx pool.
pub struct MySqlAdapter {
    pool: MySqlPool,
    /// Database (schema) searched during introspection
    database: String,
}

impl MySqlAdapter {
    /// Connects a pooled adapter.
    ///
    /// # Errors
    /// Returns a normalized connection error (URL redacted) when the pool
    /// cannot reach the server.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let url = build_url(config)?;
        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect(url.as_str())
            .await
            .map_err(|e| connection_error(&e.to_string(), url.as_str()))?;

        Ok(Self {
            pool,
            database: config.database.clone(),
        })
    }
}

/// Builds the connection URL; `Url` setters percent-escape credentials.
fn build_url(config: &ConnectionConfig) -> Result<Url> {
    let mut url = Url::parse("mysql://localhost")
        .map_err(|e| DataMapError::configuration(format!("invalid base URL: {e}")))?;
    url.set_host(Some(&config.host))
        .map_err(|e| DataMapError::configuration(format!("invalid host '{}': {e}", config.host)))?;
    url.set_port(Some(config.port))
        .map_err(|()| DataMapError::configuration("invalid port"))?;
    url.set_username(&config.username)
        .map_err(|()| DataMapError::configuration("invalid username"))?;
    if !config.password.is_empty() {
        url.set_password(Some(&config.password))
            .map_err(|()| DataMapError::configuration("invalid password"))?;
    }
    url.set_path(&format!("/{}", config.database));
    if config.ssl {
        url.query_pairs_mut().append_pair("ssl-mode", "required");
    }
    Ok(url)
}

fn connection_error(message: &str, url: &str) -> DataMapError {
    DataMapError::connection(
        classify_connection_error(message),
        format!("{message} (target: {})", redact_database_url(url)),
    )
}

fn query_error(context: &str, e: &sqlx::Error) -> DataMapError {
    DataMapError::query_failed(format!("{context}: {e}"))
}

/// Binds a JSON value as a positional parameter.
fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &JsonValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        JsonValue::Null => query.bind(Option::<String>::None),
        JsonValue::Bool(b) => query.bind(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn row_to_json(row: &MySqlRow) -> JsonValue {
    let mut map = JsonMap::new();
    for column in row.columns() {
        map.insert(
            column.name().to_string(),
            extract_column_value(row, column.name()),
        );
    }
    JsonValue::Object(map)
}

/// Extracts a column value as JSON, trying types in order of likelihood.
fn extract_column_value(row: &MySqlRow, column_name: &str) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<String>, _>(column_name) {
        return v.map(JsonValue::String).unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(column_name) {
        return v
            .map(|n| JsonValue::Number(n.into()))
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(column_name) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(column_name) {
        return v.map(JsonValue::Bool).unwrap_or(JsonValue::Null);
    }
    JsonValue::Null
}

/// Maps a `COLUMN_KEY` marker onto a constraint name.
fn constraint_for_key(key: &str) -> Option<String> {
    match key {
        "PRI" => Some("PRIMARY KEY".to_string()),
        "MUL" => Some("FOREIGN KEY".to_string()),
        "UNI" => Some("UNIQUE".to_string()),
        _ => None,
    }
}

#[async_trait]
impl DatabaseAdapter for MySqlAdapter {
    async fn test_connection(&self) -> ConnectionProbe {
        let version: std::result::Result<String, sqlx::Error> =
            sqlx::query_scalar("SELECT VERSION()").fetch_one(&self.pool).await;
        let version = match version {
            Ok(v) => v,
            Err(e) => {
                let message = e.to_string();
                return ConnectionProbe::failure(format!(
                    "{}: {message}",
                    classify_connection_error(&message)
                ));
            }
        };

        let mut server_info = BTreeMap::new();
        server_info.insert("version".to_string(), version);
        if let Ok(Some(db)) = sqlx::query_scalar::<_, Option<String>>("SELECT DATABASE()")
            .fetch_one(&self.pool)
            .await
        {
            server_info.insert("current_database".to_string(), db);
        }
        if let Ok(charset) = sqlx::query_scalar::<_, String>("SELECT @@character_set_server")
            .fetch_one(&self.pool)
            .await
        {
            server_info.insert("character_set".to_string(), charset);
        }
        ConnectionProbe::success(server_info)
    }

    async fn get_schema(&self) -> Result<SchemaDescriptor> {
        let mut descriptor = SchemaDescriptor::default();

        let tables = sqlx::query(
            "SELECT TABLE_NAME AS table_name, TABLE_TYPE AS table_type \
             FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? AND TABLE_TYPE IN ('BASE TABLE', 'VIEW') \
             ORDER BY TABLE_NAME",
        )
        .bind(&self.database)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("failed to list tables", &e))?;

        for table_row in &tables {
            let table_name: String = table_row
                .try_get("table_name")
                .map_err(|e| query_error("failed to read table name", &e))?;
            let table_type: String = table_row
                .try_get("table_type")
                .map_err(|e| query_error("failed to read table type", &e))?;

            let mut table = TableDescriptor {
                kind: if table_type == "VIEW" {
                    TableKind::View
                } else {
                    TableKind::Table
                },
                inferred: false,
                columns: Vec::new(),
            };

            let columns = sqlx::query(
                "SELECT COLUMN_NAME AS column_name, DATA_TYPE AS data_type, \
                        CHARACTER_MAXIMUM_LENGTH AS char_length, \
                        NUMERIC_PRECISION AS num_precision, NUMERIC_SCALE AS num_scale, \
                        IS_NULLABLE AS is_nullable, COLUMN_DEFAULT AS column_default, \
                        COLUMN_KEY AS column_key \
                 FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                 ORDER BY ORDINAL_POSITION",
            )
            .bind(&self.database)
            .bind(&table_name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error("failed to list columns", &e))?;

            for col in &columns {
                let name: String = col
                    .try_get("column_name")
                    .map_err(|e| query_error("failed to read column name", &e))?;
                let data_type: String = col
                    .try_get("data_type")
                    .map_err(|e| query_error("failed to read column type", &e))?;
                let is_nullable: String = col.try_get("is_nullable").unwrap_or_default();
                let length: Option<i64> = col.try_get("char_length").unwrap_or(None);
                let precision: Option<i64> = col.try_get("num_precision").unwrap_or(None);
                let scale: Option<i64> = col.try_get("num_scale").unwrap_or(None);
                let key: Option<String> = col.try_get("column_key").unwrap_or(None);

                table.columns.push(ColumnDescriptor {
                    name,
                    data_type,
                    nullable: is_nullable == "YES",
                    default: col.try_get("column_default").unwrap_or(None),
                    constraints: key
                        .as_deref()
                        .and_then(constraint_for_key)
                        .into_iter()
                        .collect(),
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

        Ok(descriptor)
    }

    async fn execute_query(&self, query: &str, params: &[JsonValue]) -> Result<QueryOutput> {
        let mut prepared = sqlx::query(query);
        for param in params {
            prepared = bind_value(prepared, param);
        }

        if sql::is_select_like(query) {
            let rows = prepared
                .fetch_all(&self.pool)
                .await
                .map_err(|e| query_error("query failed", &e))?;
            Ok(QueryOutput::Rows(rows.iter().map(row_to_json).collect()))
        } else {
            let result = prepared
                .execute(&self.pool)
                .await
                .map_err(|e| query_error("statement failed", &e))?;
            Ok(QueryOutput::Affected(result.rows_affected()))
        }
    }

    async fn write_batch(&self, plan: &WritePlan, records: &[Row]) -> Result<WriteOutcome> {
        if records.is_empty() {
            return Ok(WriteOutcome::default());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_error("failed to open transaction", &e))?;

        for (index, record) in records.iter().enumerate() {
            let columns = sql::column_names(record);
            let statement = sql::write_statement(Dialect::MySql, plan, &columns);
            let mut query = sqlx::query(&statement);
            for column in &columns {
                query = bind_value(query, record.get(column).unwrap_or(&JsonValue::Null));
            }
            if let Err(e) = query.execute(&mut *tx).await {
                tx.rollback().await.ok();
                return Err(DataMapError::query_failed(format!("record {index}: {e}")));
            }
        }

        tx.commit()
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
        sql::render_preview(Dialect::MySql, plan, record)
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySql
    }
}
