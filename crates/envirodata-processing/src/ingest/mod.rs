//! Batch ingestion: uploaded file to persisted readings.

pub mod pipeline;
pub mod progress;
pub mod reader;
pub mod resolver;

pub use pipeline::{IngestionPipeline, IngestionPipelineBuilder, IngestionResult};
pub use progress::{ClosureProgressReporter, IngestStage, ProgressReporter, ProgressUpdate};
pub use reader::{ColumnAssignment, FileFormat, FilePreview, UploadedFile, preview_file, read_table};
