//! Core execution engine for datamap.
//!
//! This crate implements the data-mapping pipeline shared by the CLI and any
//! embedding service: fetching records from an HTTP source, applying a
//! declarative field-mapping specification, and writing the transformed
//! records to a PostgreSQL, MySQL, SQL Server or MongoDB target in batches.
//!
//! # Security Guarantees
//! - Credentials are never persisted, serialized or logged
//! - Connection URLs are redacted before appearing in any error message
//! - Source API keys and bearer tokens are excluded from debug output
//!
//! # Architecture
//! - Factory pattern for database adapter instantiation, feature-gated per
//!   backend
//! - One [`engine::MappingEngine`] per execution, with observable progress
//! - Record-level fault isolation: transform and write errors mark records
//!   failed without aborting the run

pub mod adapters;
pub mod engine;
pub mod error;
pub mod logging;
pub mod matcher;
pub mod models;
pub mod path;
pub mod source;
pub mod transform;
pub mod validator;

// Re-export commonly used types
pub use adapters::{create_adapter, ConnectionProbe, DatabaseAdapter, QueryOutput, WritePlan};
pub use engine::{MappingEngine, MappingPreview, ProgressHandle, ProgressSnapshot};
pub use error::{DataMapError, Result};
pub use models::{
    ConnectionConfig, DatabaseType, ExecutionResult, ExecutionStatus, FieldMapping, MappingSpec,
    MappingSuggestion, RecordError, SchemaDescriptor, TableDescriptor,
};
pub use source::SourceRequest;
