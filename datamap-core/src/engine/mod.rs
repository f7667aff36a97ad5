//! Mapping execution engine: fetch, transform, batch write, aggregate.
//!
//! One engine instance runs one mapping against one target. Batches are
//! strictly sequential; the only concurrency is the observable progress
//! handle. Transform problems never abort a run, they mark individual
//! records failed. A fetch failure fails the whole execution with a single
//! general error.

mod progress;
mod retry;

pub use progress::{ProgressHandle, ProgressSnapshot};
pub use retry::RetryPolicy;

use crate::adapters::{DatabaseAdapter, Row, WritePlan};
use crate::error::Result;
use crate::models::{
    key_field_snapshot, ErrorStage, ExecutionResult, ExecutionStatus, MappingSpec, RecordError,
    WriteOutcome,
};
use crate::path::extract_path;
use crate::source::{self, SourceRequest};
use crate::transform;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Instant;
use tracing::{info, warn};

/// Default number of records transformed by [`MappingEngine::test`].
pub const DEFAULT_SAMPLE_SIZE: usize = 5;

/// Dry-run output: transformed samples plus the write statement the adapter
/// would issue for the first one.
#[derive(Debug, Clone, Serialize)]
pub struct MappingPreview {
    pub sample_size: usize,
    pub transformed: Vec<PreviewEntry>,
    pub statement_preview: String,
    pub target_table: String,
}

/// One sample record before and after the mapping.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewEntry {
    pub original: JsonValue,
    pub transformed: Row,
}

/// Executes one mapping specification against one target database.
pub struct MappingEngine {
    spec: MappingSpec,
    request: SourceRequest,
    adapter: Box<dyn DatabaseAdapter>,
    plan: WritePlan,
    retry: RetryPolicy,
    progress: ProgressHandle,
}

impl MappingEngine {
    /// Builds an engine after validating the specification.
    ///
    /// # Errors
    /// Returns a configuration error for an invalid mapping specification.
    pub fn new(
        spec: MappingSpec,
        request: SourceRequest,
        adapter: Box<dyn DatabaseAdapter>,
    ) -> Result<Self> {
        spec.validate()?;
        let plan = WritePlan::from_spec(&spec);
        Ok(Self {
            spec,
            request,
            adapter,
            plan,
            retry: RetryPolicy::default(),
            progress: ProgressHandle::new(),
        })
    }

    /// Handle for observing counters while [`execute`](Self::execute) runs.
    pub fn progress(&self) -> ProgressHandle {
        self.progress.clone()
    }

    /// Runs the mapping end to end. Infallible surface: a fetch failure
    /// comes back as a `Failed` result carrying one general error.
    pub async fn execute(&self) -> ExecutionResult {
        let started = Instant::now();
        self.progress.set_status(ExecutionStatus::Running);

        let mut result = match self.run().await {
            Ok(result) => result,
            Err(e) => ExecutionResult {
                status: ExecutionStatus::Failed,
                total_records: 0,
                processed_records: 0,
                failed_records: 0,
                execution_time_ms: 0,
                errors: vec![RecordError {
                    record_index: None,
                    stage: ErrorStage::General,
                    message: e.to_string(),
                    field_values: serde_json::Map::new(),
                }],
            },
        };
        result.execution_time_ms =
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.progress.set_status(result.status);

        info!(
            status = %result.status,
            total = result.total_records,
            processed = result.processed_records,
            failed = result.failed_records,
            elapsed_ms = result.execution_time_ms,
            "mapping execution finished"
        );
        result
    }

    async fn run(&self) -> Result<ExecutionResult> {
        let payload = source::fetch(&self.request).await?;
        let records = source::extract_records(payload);
        Ok(self.process_records(&records).await)
    }

    /// Transforms and writes all records in sequential batches, then decides
    /// the terminal status from the aggregate counts.
    async fn process_records(&self, records: &[JsonValue]) -> ExecutionResult {
        let total = records.len();
        self.progress.begin_run(total);

        let mut processed = 0;
        let mut failed = 0;
        let mut errors = Vec::new();

        for (batch_index, batch) in records.chunks(self.spec.batch_size).enumerate() {
            let offset = batch_index * self.spec.batch_size;
            let outcome = self.process_batch(offset, batch).await;

            processed += outcome.success;
            failed += outcome.failed;
            errors.extend(outcome.errors);
            self.progress.add_processed(outcome.success);
            self.progress.add_failed(outcome.failed);
        }

        let status = if failed == 0 {
            ExecutionStatus::Success
        } else if processed > 0 {
            ExecutionStatus::Partial
        } else {
            ExecutionStatus::Failed
        };

        ExecutionResult {
            status,
            total_records: total,
            processed_records: processed,
            failed_records: failed,
            execution_time_ms: 0,
            errors,
        }
    }

    /// One batch: per-record transform, then one adapter write with retry.
    /// `offset` is the batch's position in the full record list; all error
    /// indices are absolute.
    async fn process_batch(&self, offset: usize, batch: &[JsonValue]) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();
        let mut rows: Vec<(usize, &JsonValue, Row)> = Vec::new();

        for (i, record) in batch.iter().enumerate() {
            let index = offset + i;
            let row = self.transform_record(record);
            if row.is_empty() {
                outcome.failed += 1;
                outcome.errors.push(RecordError {
                    record_index: Some(index),
                    stage: ErrorStage::Transform,
                    message: "record produced no mapped columns".to_string(),
                    field_values: key_field_snapshot(record),
                });
            } else {
                rows.push((index, record, row));
            }
        }

        if rows.is_empty() {
            return outcome;
        }

        let transformed: Vec<Row> = rows.iter().map(|(_, _, row)| row.clone()).collect();
        match self.write_with_retry(&transformed).await {
            Ok(write) => {
                outcome.success += write.success;
                outcome.failed += write.failed;
                for mut error in write.errors {
                    // Adapter indices are batch-relative; map them back to
                    // positions in the full record list
                    if let Some(relative) = error.record_index {
                        if let Some((absolute, original, _)) = rows.get(relative) {
                            error.record_index = Some(*absolute);
                            if error.field_values.is_empty() {
                                error.field_values = key_field_snapshot(original);
                            }
                        }
                    }
                    outcome.errors.push(error);
                }
            }
            Err(e) => {
                // All-or-nothing write: the whole batch is failed
                outcome.failed += rows.len();
                for (absolute, original, _) in &rows {
                    outcome.errors.push(RecordError {
                        record_index: Some(*absolute),
                        stage: ErrorStage::Write,
                        message: e.to_string(),
                        field_values: key_field_snapshot(original),
                    });
                }
            }
        }
        outcome
    }

    async fn write_with_retry(&self, rows: &[Row]) -> Result<WriteOutcome> {
        let mut attempt = 0;
        loop {
            match self.adapter.write_batch(&self.plan, rows).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    let message = e.to_string();
                    if attempt + 1 < self.retry.max_attempts && self.retry.is_transient(&message)
                    {
                        let wait = self.retry.backoff(attempt);
                        warn!(
                            attempt = attempt + 1,
                            wait_secs = wait.as_secs(),
                            error = %message,
                            "transient write failure, retrying"
                        );
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                    } else {
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Applies every field mapping to one source record. Absent and null
    /// source values honor `skip_if_null` and `default_value`; an unmapped
    /// record comes back empty.
    fn transform_record(&self, record: &JsonValue) -> Row {
        let mut row = Row::new();
        for mapping in &self.spec.field_mappings {
            let extracted = extract_path(record, &mapping.source_path)
                .filter(|v| !v.is_null())
                .cloned();
            let value = match extracted {
                Some(v) => v,
                None => {
                    if mapping.skip_if_null {
                        continue;
                    }
                    mapping.default_value.clone().unwrap_or(JsonValue::Null)
                }
            };
            let value = transform::apply_pipeline(&mapping.transforms, value);
            row.insert(mapping.target_column.clone(), value);
        }
        row
    }

    /// Dry run: fetch, transform up to `sample_size` records, render the
    /// write statement for the first one. Nothing is written.
    ///
    /// # Errors
    /// Returns an error when the fetch fails.
    pub async fn test(&self, sample_size: usize) -> Result<MappingPreview> {
        let payload = source::fetch(&self.request).await?;
        let mut records = source::extract_records(payload);
        records.truncate(sample_size);

        let transformed: Vec<PreviewEntry> = records
            .into_iter()
            .map(|original| {
                let transformed = self.transform_record(&original);
                PreviewEntry {
                    original,
                    transformed,
                }
            })
            .collect();

        let statement_preview = transformed
            .first()
            .map(|entry| self.adapter.render_write_preview(&self.plan, &entry.transformed))
            .unwrap_or_else(|| "No data to preview".to_string());

        Ok(MappingPreview {
            sample_size: transformed.len(),
            transformed,
            statement_preview,
            target_table: self.spec.target_table.clone(),
        })
    }

    /// Releases the underlying adapter connections.
    pub async fn close(&self) {
        self.adapter.close().await;
    }
}
