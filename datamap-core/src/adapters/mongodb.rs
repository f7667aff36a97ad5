//! MongoDB adapter: sample-document schema inference and bulk document
//! writes.
//!
//! Unlike the relational adapters, batch writes here are not transactional:
//! inserts go through one unordered `insertMany` and partial failures are
//! reported per record inside an `Ok` outcome.

use super::{ConnectionProbe, DatabaseAdapter, QueryOutput, Row, WritePlan};
use crate::error::{classify_connection_error, redact_database_url, DataMapError, Result};
use crate::models::{
    ColumnDescriptor, ConnectionConfig, DatabaseType, ErrorStage, RecordError, SchemaDescriptor,
    TableDescriptor, TableKind, WriteOutcome, key_field_snapshot,
};
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use mongodb::error::ErrorKind;
use mongodb::options::ClientOptions;
use mongodb::Client;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// MongoDB implementation of [`DatabaseAdapter`].
pub struct MongoAdapter {
    client: Client,
    database: String,
}

impl MongoAdapter {
    /// Connects and validates the target with a ping.
    ///
    /// # Errors
    /// Returns a normalized connection error (URL redacted) when the server
    /// cannot be reached or rejects the credentials.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let url = build_connection_string(config)?;
        let mut options = ClientOptions::parse(url.as_str())
            .await
            .map_err(|e| connection_error(&e.to_string(), url.as_str()))?;
        options.connect_timeout = Some(CONNECT_TIMEOUT);
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);

        let client = Client::with_options(options)
            .map_err(|e| connection_error(&e.to_string(), url.as_str()))?;

        // Client construction is lazy; force a round trip so bad targets
        // fail here rather than on first use
        client
            .database(&config.database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| connection_error(&e.to_string(), url.as_str()))?;

        Ok(Self {
            client,
            database: config.database.clone(),
        })
    }
}

/// Builds the connection string. Atlas targets (`connection_type = atlas` in
/// the options) use the SRV scheme without a port and enable retryable
/// majority writes.
fn build_connection_string(config: &ConnectionConfig) -> Result<Url> {
    let atlas = config.options.get("connection_type").map(String::as_str) == Some("atlas");
    let base = if atlas {
        "mongodb+srv://localhost"
    } else {
        "mongodb://localhost"
    };
    let mut url = Url::parse(base)
        .map_err(|e| DataMapError::configuration(format!("invalid base URL: {e}")))?;
    url.set_host(Some(&config.host))
        .map_err(|e| DataMapError::configuration(format!("invalid host '{}': {e}", config.host)))?;
    if !atlas {
        url.set_port(Some(config.port))
            .map_err(|()| DataMapError::configuration("invalid port"))?;
    }
    if !config.username.is_empty() {
        url.set_username(&config.username)
            .map_err(|()| DataMapError::configuration("invalid username"))?;
    }
    if !config.password.is_empty() {
        url.set_password(Some(&config.password))
            .map_err(|()| DataMapError::configuration("invalid password"))?;
    }
    url.set_path(&format!("/{}", config.database));
    if atlas {
        url.query_pairs_mut()
            .append_pair("retryWrites", "true")
            .append_pair("w", "majority");
    }
    Ok(url)
}

fn connection_error(message: &str, url: &str) -> DataMapError {
    DataMapError::connection(
        classify_connection_error(message),
        format!("{message} (target: {})", redact_database_url(url)),
    )
}

/// BSON type name as reported in inferred schemas. The names line up with
/// the compatibility matrix used by mapping validation.
fn bson_type_name(value: &Bson) -> String {
    match value {
        Bson::Double(_) => "double".to_string(),
        Bson::String(_) => "string".to_string(),
        Bson::Array(_) => "array".to_string(),
        Bson::Document(_) => "object".to_string(),
        Bson::Boolean(_) => "bool".to_string(),
        Bson::Null => "null".to_string(),
        Bson::Int32(_) => "int32".to_string(),
        Bson::Int64(_) => "int64".to_string(),
        Bson::DateTime(_) => "date".to_string(),
        Bson::Timestamp(_) => "timestamp".to_string(),
        Bson::ObjectId(_) => "objectid".to_string(),
        Bson::Decimal128(_) => "decimal128".to_string(),
        Bson::Binary(_) => "binData".to_string(),
        _ => "unknown".to_string(),
    }
}

/// Infers columns from one sample document. Nested fields are dot-named and
/// arrays are typed by their first element.
fn infer_fields(document: &Document, prefix: &str, out: &mut Vec<ColumnDescriptor>) {
    for (key, value) in document {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        let data_type = match value {
            Bson::Array(items) => match items.first() {
                Some(first) => format!("array[{}]", bson_type_name(first)),
                None => "array".to_string(),
            },
            other => bson_type_name(other),
        };
        out.push(ColumnDescriptor::new(path.clone(), data_type));
        if let Bson::Document(nested) = value {
            infer_fields(nested, &path, out);
        }
    }
}

fn record_to_document(record: &Row) -> Result<Document> {
    bson::to_document(record).map_err(|e| DataMapError::Serialization {
        context: "failed to convert record to BSON".to_string(),
        source: serde_json::Error::io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        )),
    })
}

/// Builds the upsert filter from the conflict columns present in a record.
fn upsert_filter(plan: &WritePlan, record: &Row) -> Document {
    let mut filter = Document::new();
    for column in &plan.conflict_columns {
        if let Some(value) = record.get(column) {
            if let Ok(bson_value) = bson::to_bson(value) {
                filter.insert(column.clone(), bson_value);
            }
        }
    }
    filter
}

/// Shell-style statement preview for diagnostics. Never executed.
fn render_preview(plan: &WritePlan, record: &Row) -> String {
    let body = serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string());
    if plan.update_on_conflict && !plan.conflict_columns.is_empty() {
        let filter: serde_json::Map<String, JsonValue> = plan
            .conflict_columns
            .iter()
            .filter_map(|c| record.get(c).map(|v| (c.clone(), v.clone())))
            .collect();
        let filter = serde_json::to_string(&filter).unwrap_or_else(|_| "{}".to_string());
        format!(
            "db.{}.updateOne({filter}, {{\"$set\": {body}}}, {{\"upsert\": true}})",
            plan.table
        )
    } else {
        format!("db.{}.insertOne({body})", plan.table)
    }
}

fn record_error(index: usize, message: String, record: &Row) -> RecordError {
    RecordError {
        record_index: Some(index),
        stage: ErrorStage::Write,
        message,
        field_values: key_field_snapshot(&JsonValue::Object(record.clone())),
    }
}

#[async_trait]
impl DatabaseAdapter for MongoAdapter {
    async fn test_connection(&self) -> ConnectionProbe {
        let db = self.client.database(&self.database);
        if let Err(e) = db.run_command(doc! { "ping": 1 }).await {
            let message = e.to_string();
            return ConnectionProbe::failure(format!(
                "{}: {message}",
                classify_connection_error(&message)
            ));
        }

        let mut server_info = BTreeMap::new();
        if let Ok(build_info) = self
            .client
            .database("admin")
            .run_command(doc! { "buildInfo": 1 })
            .await
        {
            if let Ok(version) = build_info.get_str("version") {
                server_info.insert("version".to_string(), version.to_string());
            }
            if let Ok(git_version) = build_info.get_str("gitVersion") {
                server_info.insert("git_version".to_string(), git_version.to_string());
            }
        }
        server_info.insert("current_database".to_string(), self.database.clone());
        ConnectionProbe::success(server_info)
    }

    async fn get_schema(&self) -> Result<SchemaDescriptor> {
        let db = self.client.database(&self.database);
        let mut descriptor = SchemaDescriptor::default();

        let names = db.list_collection_names().await.map_err(|e| {
            DataMapError::query_failed(format!("failed to list collections: {e}"))
        })?;

        for name in names {
            let collection = db.collection::<Document>(&name);
            let sample = collection.find_one(doc! {}).await.map_err(|e| {
                DataMapError::query_failed(format!("failed to sample collection '{name}': {e}"))
            })?;

            let mut columns = Vec::new();
            if let Some(document) = sample {
                infer_fields(&document, "", &mut columns);
            }
            descriptor.tables.insert(
                name,
                TableDescriptor {
                    kind: TableKind::Collection,
                    inferred: true,
                    columns,
                },
            );
        }

        Ok(descriptor)
    }

    async fn execute_query(&self, query: &str, _params: &[JsonValue]) -> Result<QueryOutput> {
        // Queries are JSON database commands, e.g. `{"ping": 1}`
        let value: JsonValue = serde_json::from_str(query).map_err(|e| {
            DataMapError::configuration(format!("query must be a JSON command document: {e}"))
        })?;
        let command = bson::to_document(&value).map_err(|e| {
            DataMapError::configuration(format!("query is not a valid command document: {e}"))
        })?;

        let result = self
            .client
            .database(&self.database)
            .run_command(command)
            .await
            .map_err(|e| DataMapError::query_failed(format!("command failed: {e}")))?;

        Ok(QueryOutput::Rows(vec![
            Bson::Document(result).into_relaxed_extjson(),
        ]))
    }

    async fn write_batch(&self, plan: &WritePlan, records: &[Row]) -> Result<WriteOutcome> {
        if records.is_empty() {
            return Ok(WriteOutcome::default());
        }
        let collection = self
            .client
            .database(&self.database)
            .collection::<Document>(&plan.table);

        let mut outcome = WriteOutcome::default();

        if plan.update_on_conflict && !plan.conflict_columns.is_empty() {
            for (index, record) in records.iter().enumerate() {
                let document = match record_to_document(record) {
                    Ok(d) => d,
                    Err(e) => {
                        outcome.failed += 1;
                        outcome.errors.push(record_error(index, e.to_string(), record));
                        continue;
                    }
                };
                let filter = upsert_filter(plan, record);
                match collection
                    .update_one(filter, doc! { "$set": document })
                    .upsert(true)
                    .await
                {
                    Ok(_) => outcome.success += 1,
                    Err(e) => {
                        outcome.failed += 1;
                        outcome.errors.push(record_error(index, e.to_string(), record));
                    }
                }
            }
            return Ok(outcome);
        }

        // Insert path: convert everything up front so index positions in the
        // bulk result line up with record positions
        let mut documents = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            match record_to_document(record) {
                Ok(d) => documents.push((index, d)),
                Err(e) => {
                    outcome.failed += 1;
                    outcome.errors.push(record_error(index, e.to_string(), record));
                }
            }
        }

        let index_map: Vec<usize> = documents.iter().map(|(i, _)| *i).collect();
        let docs: Vec<Document> = documents.into_iter().map(|(_, d)| d).collect();
        if docs.is_empty() {
            return Ok(outcome);
        }

        match collection.insert_many(docs).ordered(false).await {
            Ok(result) => outcome.success += result.inserted_ids.len(),
            Err(e) => match *e.kind {
                ErrorKind::InsertMany(ref failure) => {
                    let mut failed_positions = Vec::new();
                    for write_error in failure.write_errors.iter().flatten() {
                        let record_index =
                            index_map.get(write_error.index).copied().unwrap_or(0);
                        failed_positions.push(write_error.index);
                        let record = &records[record_index];
                        outcome.failed += 1;
                        outcome.errors.push(record_error(
                            record_index,
                            write_error.message.clone(),
                            record,
                        ));
                    }
                    outcome.success += index_map.len() - failed_positions.len();
                }
                _ => {
                    return Err(DataMapError::query_failed(format!(
                        "insert into '{}' failed: {e}",
                        plan.table
                    )));
                }
            },
        }

        debug!(
            success = outcome.success,
            failed = outcome.failed,
            collection = %plan.table,
            "batch written"
        );
        Ok(outcome)
    }

    fn render_write_preview(&self, plan: &WritePlan, record: &Row) -> String {
        render_preview(plan, record)
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MongoDb
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(atlas: bool) -> ConnectionConfig {
        let mut options = BTreeMap::new();
        if atlas {
            options.insert("connection_type".to_string(), "atlas".to_string());
        }
        ConnectionConfig {
            db_type: DatabaseType::MongoDb,
            host: "cluster0.example.mongodb.net".to_string(),
            port: 27017,
            database: "appdb".to_string(),
            schema: None,
            username: "app".to_string(),
            password: "secret".to_string(),
            ssl: false,
            options,
        }
    }

    #[test]
    fn test_standard_connection_string() {
        let url = build_connection_string(&config(false)).unwrap();
        assert_eq!(url.scheme(), "mongodb");
        assert_eq!(url.port(), Some(27017));
        assert_eq!(url.path(), "/appdb");
    }

    #[test]
    fn test_atlas_connection_string() {
        let url = build_connection_string(&config(true)).unwrap();
        assert_eq!(url.scheme(), "mongodb+srv");
        assert_eq!(url.port(), None);
        assert!(url.as_str().contains("retryWrites=true"));
        assert!(url.as_str().contains("w=majority"));
    }

    #[test]
    fn test_infer_fields_nested_and_arrays() {
        let document = doc! {
            "_id": bson::oid::ObjectId::new(),
            "name": "Ada",
            "age": 36i32,
            "address": { "city": "London", "zip": "N1" },
            "tags": ["a", "b"],
            "scores": Bson::Array(vec![]),
        };
        let mut columns = Vec::new();
        infer_fields(&document, "", &mut columns);

        let by_name = |n: &str| {
            columns
                .iter()
                .find(|c| c.name == n)
                .map(|c| c.data_type.clone())
        };
        assert_eq!(by_name("_id").as_deref(), Some("objectid"));
        assert_eq!(by_name("name").as_deref(), Some("string"));
        assert_eq!(by_name("age").as_deref(), Some("int32"));
        assert_eq!(by_name("address").as_deref(), Some("object"));
        assert_eq!(by_name("address.city").as_deref(), Some("string"));
        assert_eq!(by_name("tags").as_deref(), Some("array[string]"));
        assert_eq!(by_name("scores").as_deref(), Some("array"));
    }

    #[test]
    fn test_upsert_filter_skips_absent_columns() {
        let plan = WritePlan {
            table: "users".to_string(),
            update_on_conflict: true,
            conflict_columns: vec!["email".to_string(), "tenant".to_string()],
        };
        let record: Row = [("email".to_string(), json!("a@b.com"))].into_iter().collect();
        let filter = upsert_filter(&plan, &record);
        assert_eq!(filter.get_str("email").ok(), Some("a@b.com"));
        assert!(!filter.contains_key("tenant"));
    }

    #[test]
    fn test_insert_preview() {
        let plan = WritePlan {
            table: "users".to_string(),
            update_on_conflict: false,
            conflict_columns: Vec::new(),
        };
        let record: Row = [("name".to_string(), json!("Ada"))].into_iter().collect();
        assert_eq!(
            render_preview(&plan, &record),
            r#"db.users.insertOne({"name":"Ada"})"#
        );
    }

    #[test]
    fn test_upsert_preview() {
        let plan = WritePlan {
            table: "users".to_string(),
            update_on_conflict: true,
            conflict_columns: vec!["email".to_string()],
        };
        let record: Row = [
            ("email".to_string(), json!("a@b.com")),
            ("name".to_string(), json!("Ada")),
        ]
        .into_iter()
        .collect();
        let preview = render_preview(&plan, &record);
        assert!(preview.starts_with(r#"db.users.updateOne({"email":"a@b.com"}"#));
        assert!(preview.contains(r#""$set""#));
        assert!(preview.contains(r#""upsert": true"#));
    }
}
