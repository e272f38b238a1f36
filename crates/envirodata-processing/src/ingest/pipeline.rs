//! The batch ingestion pipeline.
//!
//! One run reads an upload, normalizes it, creates a sample batch, turns
//! every cleaned row into a reading and persists all readings with one bulk
//! insert followed by one bulk link. Row-scoped failures are absorbed (or
//! abort the run when `skip_invalid_rows` is off); anything else ends the
//! run as a failure. The upload log is finalized exactly once per run.

use super::progress::{ClosureProgressReporter, IngestStage, ProgressReporter, ProgressUpdate};
use super::reader::{UploadedFile, check_file_size, read_table};
use super::resolver::{resolve_location, resolve_pollutant, validate_concentration};
use crate::config::{ConfigValidationError, IngestConfig};
use crate::error::{ProcessingError, Result, ResultExt, RowError};
use crate::normalizer::{FieldNormalizer, NormalizedRow};
use crate::store::ReadingStore;
use crate::types::{
    BatchMetadata, BatchReading, EnvironmentalReading, QualityFlag, SampleBatch, UploadLog,
    UploadStatus, UploadTotals,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Outcome of an ingestion run. Fatal failures are reported here with
/// `success = false`, never as an `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<SampleBatch>,
    pub upload_log_id: Uuid,
    pub status: UploadStatus,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Fatal error message, set when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Counters and messages gathered while a run progresses.
#[derive(Debug, Clone, Default, PartialEq)]
struct Tally {
    processed: usize,
    successful: usize,
    failed: usize,
    skipped: usize,
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// Identity of a row for duplicate detection within one file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RowKey {
    location: String,
    pollutant: String,
    measured_at: i64,
    concentration: u64,
}

impl RowKey {
    fn of(row: &NormalizedRow) -> Self {
        Self {
            location: row.location.to_lowercase(),
            pollutant: row.pollutant.to_lowercase(),
            measured_at: row.measured_at.timestamp_millis(),
            concentration: row.concentration.to_bits(),
        }
    }
}

/// Accumulator threaded through the row loop.
#[derive(Debug, Default)]
struct RowAccumulator {
    tally: Tally,
    readings: Vec<EnvironmentalReading>,
    seen: HashSet<RowKey>,
}

impl RowAccumulator {
    fn with_warnings(warnings: Vec<String>) -> Self {
        Self {
            tally: Tally {
                warnings,
                ..Tally::default()
            },
            ..Self::default()
        }
    }
}

struct RunOutput {
    batch: SampleBatch,
    tally: Tally,
}

struct RunFailure {
    error: ProcessingError,
    tally: Tally,
    batch: Option<SampleBatch>,
}

impl RunFailure {
    fn structural(error: ProcessingError) -> Self {
        Self {
            error,
            tally: Tally::default(),
            batch: None,
        }
    }
}

/// The ingestion pipeline.
///
/// # Example
///
/// ```rust,ignore
/// use envirodata_processing::{IngestionPipeline, IngestConfig, MemoryStore, UploadedFile};
///
/// let mut store = MemoryStore::with_default_catalog();
/// let pipeline = IngestionPipeline::builder()
///     .config(IngestConfig::builder().create_missing_locations(true).build()?)
///     .on_progress(|update| println!("{}: {}", update.stage.display_name(), update.message))
///     .build()?;
///
/// let upload = UploadedFile::from_path("lagos_march.csv")?;
/// let result = pipeline.process(&mut store, "alice", &upload, metadata);
/// println!("{} readings created", result.successful);
/// ```
pub struct IngestionPipeline {
    config: IngestConfig,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
}

static_assertions::assert_impl_all!(IngestionPipeline: Send, Sync);

impl Default for IngestionPipeline {
    fn default() -> Self {
        Self {
            config: IngestConfig::default(),
            progress_reporter: None,
        }
    }
}

impl IngestionPipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> IngestionPipelineBuilder {
        IngestionPipelineBuilder::default()
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Run one ingestion of `upload` for `owner`.
    pub fn process<S: ReadingStore + ?Sized>(
        &self,
        store: &mut S,
        owner: &str,
        upload: &UploadedFile,
        metadata: BatchMetadata,
    ) -> IngestionResult {
        let start_time = Instant::now();
        let mut log = UploadLog::start(owner, &upload.filename, upload.size());
        info!("Starting ingestion of {} ({} bytes)", upload.filename, upload.size());

        if let Err(e) = store.save_upload_log(&log) {
            error!("Could not open upload log: {}", e);
            self.report_progress(ProgressUpdate::failed(e.to_string()));
            return failure_result(&log, &e, Tally::default(), None);
        }

        match self.run(store, owner, upload, metadata) {
            Ok(output) => {
                let status = if output.tally.failed == 0 {
                    UploadStatus::Completed
                } else {
                    UploadStatus::CompletedWithErrors
                };
                self.report_progress(ProgressUpdate::new(
                    IngestStage::Finalizing,
                    0.0,
                    "Finalizing upload log...",
                ));
                let totals = self.totals(&output.tally, Some(output.batch.id), None);
                if let Err(e) = finalize_log(store, &mut log, status, totals) {
                    error!("Could not finalize upload log: {}", e);
                    self.report_progress(ProgressUpdate::failed(e.to_string()));
                    return failure_result(&log, &e, output.tally, Some(output.batch));
                }

                info!(
                    "Ingestion completed in {:.2?}: {} successful, {} failed, {} skipped",
                    start_time.elapsed(),
                    output.tally.successful,
                    output.tally.failed,
                    output.tally.skipped
                );
                self.report_progress(ProgressUpdate::complete(format!(
                    "Imported {} readings",
                    output.tally.successful
                )));

                IngestionResult {
                    success: true,
                    batch: Some(output.batch),
                    upload_log_id: log.id,
                    status,
                    processed: output.tally.processed,
                    successful: output.tally.successful,
                    failed: output.tally.failed,
                    skipped: output.tally.skipped,
                    errors: output.tally.errors,
                    warnings: output.tally.warnings,
                    error: None,
                    error_code: None,
                }
            }
            Err(failure) => {
                error!("File processing failed: {}", failure.error);
                self.report_progress(ProgressUpdate::failed(failure.error.to_string()));

                let totals = self.totals(
                    &failure.tally,
                    failure.batch.as_ref().map(|b| b.id),
                    Some(&failure.error),
                );
                if let Err(e) = finalize_log(store, &mut log, UploadStatus::Failed, totals) {
                    error!("Could not finalize upload log: {}", e);
                }
                failure_result(&log, &failure.error, failure.tally, failure.batch)
            }
        }
    }

    fn run<S: ReadingStore + ?Sized>(
        &self,
        store: &mut S,
        owner: &str,
        upload: &UploadedFile,
        metadata: BatchMetadata,
    ) -> std::result::Result<RunOutput, RunFailure> {
        self.report_progress(ProgressUpdate::new(
            IngestStage::Reading,
            0.0,
            format!("Reading {}...", upload.filename),
        ));
        check_file_size(upload, self.config.max_file_size_bytes).map_err(RunFailure::structural)?;
        let df = read_table(upload).map_err(RunFailure::structural)?;
        info!("Processing file with {} rows", df.height());

        self.report_progress(ProgressUpdate::new(
            IngestStage::Normalizing,
            0.0,
            "Validating and cleaning columns...",
        ));
        let table = FieldNormalizer::normalize(&df).map_err(RunFailure::structural)?;
        let rows = table.rows().map_err(RunFailure::structural)?;

        self.report_progress(ProgressUpdate::new(
            IngestStage::CreatingBatch,
            0.0,
            format!("Creating batch '{}'...", metadata.name),
        ));
        let batch = store
            .create_batch(SampleBatch::new(owner, metadata))
            .context("Creating sample batch")
            .map_err(RunFailure::structural)?;
        info!("Created sample batch: {}", batch.metadata.name);

        let mut acc = RowAccumulator::with_warnings(table.warnings);
        let total = rows.len();
        let report_every = (total / 20).max(1);
        for (idx, row) in rows.iter().enumerate() {
            if let Err(error) = self.process_row(store, owner, row, &mut acc) {
                acc.tally.successful = 0;
                return Err(RunFailure {
                    error,
                    tally: acc.tally,
                    batch: Some(batch),
                });
            }
            if (idx + 1) % report_every == 0 || idx + 1 == total {
                self.report_progress(ProgressUpdate::with_items(
                    IngestStage::ProcessingRows,
                    idx + 1,
                    total,
                    format!("Processed {} of {} rows", idx + 1, total),
                ));
            }
        }

        self.report_progress(ProgressUpdate::new(
            IngestStage::Persisting,
            0.0,
            format!("Saving {} readings...", acc.readings.len()),
        ));
        let RowAccumulator {
            mut tally,
            readings,
            ..
        } = acc;
        if let Err(error) = persist(store, &batch, readings) {
            tally.successful = 0;
            return Err(RunFailure {
                error,
                tally,
                batch: Some(batch),
            });
        }

        Ok(RunOutput { batch, tally })
    }

    /// Process one row, recording its outcome in `acc`.
    ///
    /// Only a [`RowError`] is absorbed; store failures propagate, as does a
    /// row error when invalid rows may not be skipped.
    fn process_row<S: ReadingStore + ?Sized>(
        &self,
        store: &mut S,
        owner: &str,
        row: &NormalizedRow,
        acc: &mut RowAccumulator,
    ) -> Result<()> {
        acc.tally.processed += 1;

        let key = RowKey::of(row);
        if self.config.skip_duplicate_rows && acc.seen.contains(&key) {
            acc.tally.skipped += 1;
            acc.tally.warnings.push(format!(
                "Row {}: duplicate of an earlier row, skipped",
                row.row_number()
            ));
            return Ok(());
        }

        match self.build_reading(store, owner, row, &mut acc.tally.warnings)? {
            Ok(reading) => {
                acc.tally.successful += 1;
                acc.readings.push(reading);
                acc.seen.insert(key);
                Ok(())
            }
            Err(cause) => {
                if !self.config.skip_invalid_rows {
                    return Err(ProcessingError::Row {
                        row: row.row_number(),
                        source: cause,
                    });
                }
                acc.tally.failed += 1;
                let message = format!("Row {}: {}", row.row_number(), cause);
                warn!("{}", message);
                acc.tally.errors.push(message);
                Ok(())
            }
        }
    }

    fn build_reading<S: ReadingStore + ?Sized>(
        &self,
        store: &mut S,
        owner: &str,
        row: &NormalizedRow,
        warnings: &mut Vec<String>,
    ) -> Result<std::result::Result<EnvironmentalReading, RowError>> {
        let location = match resolve_location(
            store,
            owner,
            row,
            self.config.create_missing_locations,
            warnings,
        )? {
            Ok(location) => location,
            Err(cause) => return Ok(Err(cause)),
        };
        let pollutant = match resolve_pollutant(store, &row.pollutant)? {
            Ok(pollutant) => pollutant,
            Err(cause) => return Ok(Err(cause)),
        };
        let concentration = match validate_concentration(row.concentration) {
            Ok(value) => value,
            Err(cause) => return Ok(Err(cause)),
        };

        let quality_flag = match row.quality_flag.as_deref() {
            None => QualityFlag::Valid,
            Some(label) => QualityFlag::from_label(label).unwrap_or_else(|| {
                warnings.push(format!(
                    "Row {}: unknown quality flag '{}', marked as questionable",
                    row.row_number(),
                    label
                ));
                QualityFlag::Questionable
            }),
        };

        Ok(Ok(EnvironmentalReading {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            location_id: location.id,
            pollutant_type_id: pollutant.id,
            concentration,
            measured_at: row.measured_at,
            quality_flag,
            meteorology: row.meteorology,
            detection_limit: row.detection_limit,
            uncertainty_percent: row.uncertainty,
            provenance: row.provenance.clone(),
            created_at: Utc::now(),
        }))
    }

    fn totals(
        &self,
        tally: &Tally,
        batch_id: Option<Uuid>,
        fatal: Option<&ProcessingError>,
    ) -> UploadTotals {
        let mut lines: Vec<String> = fatal.map(|e| e.to_string()).into_iter().collect();
        lines.push(bounded_error_log(&tally.errors, self.config.max_logged_errors));
        lines.retain(|line| !line.is_empty());

        UploadTotals {
            processed: tally.processed,
            successful: tally.successful,
            failed: tally.failed,
            skipped: tally.skipped,
            error_log: lines.join("\n"),
            warning_log: tally.warnings.join("\n"),
            batch_id,
        }
    }

    /// Report progress if a reporter is configured.
    fn report_progress(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(update);
        }
    }
}

/// Bulk-insert readings, then bulk-link them to the batch.
fn persist<S: ReadingStore + ?Sized>(
    store: &mut S,
    batch: &SampleBatch,
    readings: Vec<EnvironmentalReading>,
) -> Result<()> {
    if readings.is_empty() {
        info!("No readings to persist");
        return Ok(());
    }
    let count = readings.len();
    let ids = store
        .bulk_insert_readings(readings)
        .context(format!("Bulk inserting {} readings", count))?;
    let links = ids
        .into_iter()
        .map(|reading_id| BatchReading {
            batch_id: batch.id,
            reading_id,
        })
        .collect();
    let linked = store
        .bulk_link_batch(links)
        .context("Linking readings to batch")?;
    info!("Persisted {} readings ({} linked to batch)", count, linked);
    Ok(())
}

fn finalize_log<S: ReadingStore + ?Sized>(
    store: &mut S,
    log: &mut UploadLog,
    status: UploadStatus,
    totals: UploadTotals,
) -> Result<()> {
    log.finalize(status, totals)?;
    store.save_upload_log(log)
}

/// Join at most `limit` error messages, noting how many were left out.
fn bounded_error_log(errors: &[String], limit: usize) -> String {
    if errors.len() <= limit {
        return errors.join("\n");
    }
    let mut log = errors[..limit].join("\n");
    log.push_str(&format!("\n... and {} more errors", errors.len() - limit));
    log
}

fn failure_result(
    log: &UploadLog,
    error: &ProcessingError,
    tally: Tally,
    batch: Option<SampleBatch>,
) -> IngestionResult {
    IngestionResult {
        success: false,
        batch,
        upload_log_id: log.id,
        status: UploadStatus::Failed,
        processed: tally.processed,
        successful: tally.successful,
        failed: tally.failed,
        skipped: tally.skipped,
        errors: tally.errors,
        warnings: tally.warnings,
        error: Some(error.to_string()),
        error_code: Some(error.error_code().to_string()),
    }
}

/// Builder for [`IngestionPipeline`].
#[derive(Default)]
pub struct IngestionPipelineBuilder {
    config: Option<IngestConfig>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
}

impl IngestionPipelineBuilder {
    pub fn config(mut self, config: IngestConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set a progress reporter for receiving updates during a run.
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Build the pipeline.
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> std::result::Result<IngestionPipeline, ConfigValidationError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        Ok(IngestionPipeline {
            config,
            progress_reporter: self.progress_reporter,
        })
    }
}
