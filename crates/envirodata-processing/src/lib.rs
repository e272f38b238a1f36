//! Environmental Monitoring Data Library
//!
//! Ingestion, validation and statistical analysis of environmental
//! monitoring datasets, built with Rust and Polars.
//!
//! # Overview
//!
//! - **Field Normalization**: Heuristic header matching, tolerant numeric and
//!   date parsing, row-level cleaning into typed records
//! - **Batch Ingestion**: Location and pollutant resolution, row isolation,
//!   bulk persistence and an audited upload log
//! - **Statistical Analysis**: Descriptive statistics, t-tests, ANOVA with
//!   Tukey post-hoc, correlation, temporal trends, regulatory compliance,
//!   PCA and k-means clustering
//! - **Reporting**: One JSON report over any subset of analyses
//! - **Progress Reporting**: Stage updates while a file is ingested
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use envirodata_processing::{
//!     AnalysisRequest, BatchMetadata, IngestionPipeline, MemoryStore, ReadingFilter,
//!     ReportGenerator, StatisticalAnalyzer, UploadedFile,
//! };
//!
//! let mut store = MemoryStore::with_default_catalog();
//!
//! let pipeline = IngestionPipeline::builder()
//!     .on_progress(|update| println!("[{:.0}%] {}", update.progress * 100.0, update.message))
//!     .build()?;
//! let upload = UploadedFile::from_path("march.csv")?;
//! let metadata = BatchMetadata::new("March survey", sampling_date);
//! let result = pipeline.process(&mut store, "alice", &upload, metadata);
//! println!("{} of {} rows stored", result.successful, result.processed);
//!
//! let analyzer = StatisticalAnalyzer::new(&store, "alice");
//! let results = analyzer.run_all(&[
//!     AnalysisRequest::Descriptive { filter: ReadingFilter::default() },
//!     AnalysisRequest::Compliance { filter: ReadingFilter::default() },
//! ])?;
//! let report = ReportGenerator::build_report(&results)?;
//! ```
//!
//! # Configuration
//!
//! Use [`IngestConfig`] and [`AnalysisConfig`] to tune behavior:
//!
//! ```rust,ignore
//! use envirodata_processing::config::*;
//!
//! let ingest = IngestConfig::builder()
//!     .create_missing_locations(false)   // Unknown sites fail the row
//!     .skip_invalid_rows(false)          // Any bad row aborts the run
//!     .max_file_size_bytes(5 * 1024 * 1024)
//!     .build()?;
//!
//! let analysis = AnalysisConfig::builder()
//!     .significance_level(0.01)
//!     .max_clusters(6)
//!     .kmeans_seed(7)
//!     .build()?;
//! ```
//!
//! # Storage
//!
//! Ingestion and analysis talk to persistence through the
//! [`ReadingStore`] trait. [`MemoryStore`] is the bundled implementation
//! and can be snapshotted to JSON.

pub mod analysis;
pub mod config;
pub mod error;
pub mod ingest;
pub mod normalizer;
pub mod reporting;
pub mod store;
pub mod types;
pub mod utils;

// Re-exports for convenient access
pub use analysis::{
    Analysis, AnalysisRequest, AnalysisResults, AnovaGroup, StatisticalAnalyzer, TimeBucket,
};
pub use config::{
    AnalysisConfig, AnalysisConfigBuilder, ConfigValidationError, IngestConfig,
    IngestConfigBuilder,
};
pub use error::{ProcessingError, Result as ProcessingResult, ResultExt, RowError};
pub use ingest::{
    ClosureProgressReporter, FilePreview, IngestStage, IngestionPipeline, IngestionPipelineBuilder,
    IngestionResult, ProgressReporter, ProgressUpdate, UploadedFile, preview_file,
};
pub use normalizer::{CanonicalField, ColumnMapping, FieldNormalizer, NormalizedRow, NormalizedTable};
pub use reporting::{ReportGenerator, ReportSection, StatisticalReport};
pub use store::{MemoryStore, ReadingFilter, ReadingQuery, ReadingStore};
pub use types::{
    Authority, BatchMetadata, EnvironmentalReading, Location, PollutantCategory, PollutantType,
    QualityFlag, RegulatoryStandard, SampleBatch, SiteType, StudyType, UploadLog, UploadStatus,
};
