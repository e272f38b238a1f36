//! Report aggregation.
//!
//! [`StatisticalReport`] gathers whichever analyses were run into one
//! document with a title, a generation timestamp and an ordered list of
//! sections. It is used for:
//! - JSON output to stdout (`--json` CLI flag)
//! - JSON file output (`--emit-report` CLI flag)
//! - Programmatic access in library mode
//!
//! # Example
//!
//! ```rust,ignore
//! use envirodata_processing::reporting::ReportGenerator;
//!
//! let report = ReportGenerator::build_report(&results)?;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//!
//! let generator = ReportGenerator::new(PathBuf::from("reports"), None);
//! generator.write_report_to_file(&report, "march")?;
//! ```

mod generator;

pub use generator::{REPORT_TITLE, ReportGenerator, ReportSection, StatisticalReport};
