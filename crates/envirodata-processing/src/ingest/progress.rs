//! Progress reporting for the ingestion pipeline.
//!
//! # Example
//!
//! ```rust,ignore
//! use envirodata_processing::IngestionPipeline;
//!
//! let pipeline = IngestionPipeline::builder()
//!     .on_progress(|update| {
//!         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
//!     })
//!     .build()?;
//! ```

use serde::{Deserialize, Serialize};

/// Stages of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    /// Reading the uploaded file into a table
    Reading,
    /// Reconciling headers and cleaning cells
    Normalizing,
    /// Creating the sample batch
    CreatingBatch,
    /// Resolving references and building readings row by row
    ProcessingRows,
    /// Bulk-inserting readings and batch links
    Persisting,
    /// Finalizing the upload log
    Finalizing,
    /// Run completed (possibly with row errors)
    Complete,
    /// Run aborted with a fatal error
    Failed,
}

impl IngestStage {
    /// Returns a human-readable name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Reading => "Reading File",
            Self::Normalizing => "Normalizing Columns",
            Self::CreatingBatch => "Creating Batch",
            Self::ProcessingRows => "Processing Rows",
            Self::Persisting => "Saving Readings",
            Self::Finalizing => "Finalizing",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        }
    }

    /// Share of the overall run taken by this stage. The working stages sum
    /// to 1.0.
    pub fn weight(&self) -> f32 {
        match self {
            Self::Reading => 0.10,
            Self::Normalizing => 0.15,
            Self::CreatingBatch => 0.05,
            Self::ProcessingRows => 0.50,
            Self::Persisting => 0.15,
            Self::Finalizing => 0.05,
            Self::Complete | Self::Failed => 0.0,
        }
    }

    /// Cumulative progress at the start of this stage.
    pub fn base_progress(&self) -> f32 {
        match self {
            Self::Reading => 0.0,
            Self::Normalizing => 0.10,
            Self::CreatingBatch => 0.25,
            Self::ProcessingRows => 0.30,
            Self::Persisting => 0.80,
            Self::Finalizing => 0.95,
            Self::Complete => 1.0,
            Self::Failed => 0.0,
        }
    }
}

/// A progress event emitted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: IngestStage,

    /// Overall progress (0.0 - 1.0)
    pub progress: f32,

    /// Progress within the current stage (0.0 - 1.0)
    pub stage_progress: f32,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_processed: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_total: Option<usize>,
}

impl ProgressUpdate {
    pub fn new(stage: IngestStage, stage_progress: f32, message: impl Into<String>) -> Self {
        let progress = stage.base_progress() + (stage.weight() * stage_progress);
        Self {
            stage,
            progress: progress.clamp(0.0, 1.0),
            stage_progress: stage_progress.clamp(0.0, 1.0),
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }

    /// Progress update carrying item counts, e.g. rows processed so far.
    pub fn with_items(
        stage: IngestStage,
        current: usize,
        total: usize,
        message: impl Into<String>,
    ) -> Self {
        let stage_progress = if total > 0 {
            current as f32 / total as f32
        } else {
            0.0
        };
        Self {
            items_processed: Some(current),
            items_total: Some(total),
            ..Self::new(stage, stage_progress, message)
        }
    }

    pub fn complete(message: impl Into<String>) -> Self {
        Self::new(IngestStage::Complete, 1.0, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(IngestStage::Failed, 0.0, message)
    }
}

static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);

/// Receives progress updates from the pipeline.
///
/// Implementations must be `Send + Sync` so a pipeline running on a worker
/// thread can report to a listener owned elsewhere.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// [`ProgressReporter`] backed by a closure.
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_stage_weights_sum() {
        let stages = [
            IngestStage::Reading,
            IngestStage::Normalizing,
            IngestStage::CreatingBatch,
            IngestStage::ProcessingRows,
            IngestStage::Persisting,
            IngestStage::Finalizing,
        ];
        let total: f32 = stages.iter().map(|s| s.weight()).sum();
        assert!((total - 1.0).abs() < 0.01, "Weights should sum to ~1.0");
    }

    #[test]
    fn test_base_progress_matches_weights() {
        assert!((IngestStage::Normalizing.base_progress() - IngestStage::Reading.weight()).abs() < 1e-6);
        let end_of_rows =
            IngestStage::ProcessingRows.base_progress() + IngestStage::ProcessingRows.weight();
        assert!((end_of_rows - IngestStage::Persisting.base_progress()).abs() < 1e-6);
    }

    #[test]
    fn test_progress_update_with_items() {
        let update = ProgressUpdate::with_items(IngestStage::ProcessingRows, 25, 100, "Rows");
        assert_eq!(update.items_processed, Some(25));
        assert_eq!(update.items_total, Some(100));
        assert_eq!(update.stage_progress, 0.25);
        assert!((update.progress - 0.425).abs() < 1e-6);
    }

    #[test]
    fn test_complete_and_failed() {
        assert_eq!(ProgressUpdate::complete("done").progress, 1.0);
        let failed = ProgressUpdate::failed("boom");
        assert_eq!(failed.stage, IngestStage::Failed);
        assert_eq!(failed.progress, 0.0);
    }

    #[test]
    fn test_stage_json_values() {
        assert_eq!(
            serde_json::to_string(&IngestStage::ProcessingRows).unwrap(),
            "\"processing_rows\""
        );
        assert_eq!(
            serde_json::to_string(&IngestStage::CreatingBatch).unwrap(),
            "\"creating_batch\""
        );
    }

    #[test]
    fn test_closure_progress_reporter_across_threads() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let reporter = Arc::new(ClosureProgressReporter::new(move |_update| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let reporter_clone = reporter.clone();
        std::thread::spawn(move || {
            reporter_clone.report(ProgressUpdate::new(IngestStage::Reading, 0.0, "start"));
        })
        .join()
        .expect("Thread should not panic");
        reporter.report(ProgressUpdate::complete("done"));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
