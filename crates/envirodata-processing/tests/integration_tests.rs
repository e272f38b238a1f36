//! Integration tests for ingestion, analysis and reporting.
//!
//! These tests drive the public API end to end against the fixture files.

use chrono::{TimeZone, Utc};
use envirodata_processing::analysis::ComplianceStatus;
use envirodata_processing::store::ReadingQuery;
use envirodata_processing::types::{BatchReading, BatchStats, NewLocation};
use envirodata_processing::{
    AnalysisConfig, AnalysisRequest, AnovaGroup, BatchMetadata, EnvironmentalReading,
    IngestConfig, IngestStage, IngestionPipeline, IngestionResult, Location, MemoryStore,
    PollutantType, ProcessingError, ProcessingResult, ReadingFilter, ReadingStore, ReportGenerator,
    SampleBatch, StatisticalAnalyzer, TimeBucket, UploadLog, UploadStatus, UploadedFile,
    preview_file,
};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const OWNER: &str = "alice";

// ============================================================================
// Helper Functions
// ============================================================================

fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load_fixture(filename: &str) -> UploadedFile {
    UploadedFile::from_path(fixtures_path().join(filename)).expect("Failed to read fixture")
}

fn metadata() -> BatchMetadata {
    BatchMetadata::new(
        "Lagos Q1 survey",
        chrono::NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
    )
}

fn ingest(store: &mut MemoryStore, filename: &str, config: IngestConfig) -> IngestionResult {
    IngestionPipeline::builder()
        .config(config)
        .build()
        .unwrap()
        .process(store, OWNER, &load_fixture(filename), metadata())
}

fn ingested_store() -> MemoryStore {
    let mut store = MemoryStore::with_default_catalog();
    let result = ingest(&mut store, "monitoring_valid.csv", IngestConfig::default());
    assert!(result.success, "fixture ingestion failed: {:?}", result.error);
    store
}

fn location_filter(store: &MemoryStore, name: &str) -> ReadingFilter {
    let location = store.find_location_by_name(OWNER, name).unwrap().unwrap();
    ReadingFilter {
        locations: vec![location.id],
        ..Default::default()
    }
}

/// Delegates to a [`MemoryStore`] but fails selected operations.
struct FailingStore {
    inner: MemoryStore,
    fail_bulk_insert: bool,
    fail_pollutant_lookup: bool,
}

impl FailingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::with_default_catalog(),
            fail_bulk_insert: false,
            fail_pollutant_lookup: false,
        }
    }

    fn unavailable(operation: &str) -> ProcessingError {
        ProcessingError::Storage(format!("{} unavailable", operation))
    }
}

impl ReadingStore for FailingStore {
    fn find_location_by_name(&self, owner: &str, name: &str) -> ProcessingResult<Option<Location>> {
        self.inner.find_location_by_name(owner, name)
    }

    fn find_location_by_coordinates(
        &self,
        owner: &str,
        latitude: f64,
        longitude: f64,
    ) -> ProcessingResult<Option<Location>> {
        self.inner.find_location_by_coordinates(owner, latitude, longitude)
    }

    fn create_location(&mut self, location: NewLocation) -> ProcessingResult<Location> {
        self.inner.create_location(location)
    }

    fn find_pollutant_by_name(&self, name: &str) -> ProcessingResult<Option<PollutantType>> {
        if self.fail_pollutant_lookup {
            return Err(Self::unavailable("pollutant lookup"));
        }
        self.inner.find_pollutant_by_name(name)
    }

    fn find_pollutant_containing(&self, fragment: &str) -> ProcessingResult<Option<PollutantType>> {
        self.inner.find_pollutant_containing(fragment)
    }

    fn find_pollutant_by_formula(&self, formula: &str) -> ProcessingResult<Option<PollutantType>> {
        self.inner.find_pollutant_by_formula(formula)
    }

    fn create_batch(&mut self, batch: SampleBatch) -> ProcessingResult<SampleBatch> {
        self.inner.create_batch(batch)
    }

    fn bulk_insert_readings(
        &mut self,
        readings: Vec<EnvironmentalReading>,
    ) -> ProcessingResult<Vec<Uuid>> {
        if self.fail_bulk_insert {
            return Err(Self::unavailable("bulk insert"));
        }
        self.inner.bulk_insert_readings(readings)
    }

    fn bulk_link_batch(&mut self, links: Vec<BatchReading>) -> ProcessingResult<usize> {
        self.inner.bulk_link_batch(links)
    }

    fn save_upload_log(&mut self, log: &UploadLog) -> ProcessingResult<()> {
        self.inner.save_upload_log(log)
    }

    fn upload_log(&self, id: Uuid) -> ProcessingResult<Option<UploadLog>> {
        self.inner.upload_log(id)
    }

    fn query_readings(&self, query: &ReadingQuery<'_>) -> ProcessingResult<Vec<EnvironmentalReading>> {
        self.inner.query_readings(query)
    }

    fn location(&self, id: Uuid) -> ProcessingResult<Option<Location>> {
        self.inner.location(id)
    }

    fn pollutant_type(&self, id: Uuid) -> ProcessingResult<Option<PollutantType>> {
        self.inner.pollutant_type(id)
    }

    fn locations(&self, owner: &str) -> ProcessingResult<Vec<Location>> {
        self.inner.locations(owner)
    }

    fn pollutant_types(&self) -> ProcessingResult<Vec<PollutantType>> {
        self.inner.pollutant_types()
    }

    fn batch_stats(&self, batch_id: Uuid) -> ProcessingResult<BatchStats> {
        self.inner.batch_stats(batch_id)
    }
}

// ============================================================================
// Ingestion Tests
// ============================================================================

#[test]
fn test_ingest_well_formed_file() {
    let mut store = MemoryStore::with_default_catalog();
    let result = ingest(&mut store, "monitoring_valid.csv", IngestConfig::default());

    assert!(result.success);
    assert_eq!(
        (result.processed, result.successful, result.failed, result.skipped),
        (12, 12, 0, 0)
    );
    assert_eq!(result.status, UploadStatus::Completed);
    assert!(result.errors.is_empty());
    assert_eq!(store.readings().len(), 12);
    assert_eq!(store.batch_links().len(), 12);

    let batch = result.batch.unwrap();
    assert_eq!(batch.metadata.name, "Lagos Q1 survey");
    assert_eq!(store.batch_stats(batch.id).unwrap().reading_count, 12);

    let log = store.upload_log(result.upload_log_id).unwrap().unwrap();
    assert_eq!(log.status, UploadStatus::Completed);
    assert_eq!(log.batch_id, Some(batch.id));
    assert_eq!(log.success_rate(), 100.0);
}

#[test]
fn test_repeated_location_is_created_once() {
    let store = ingested_store();

    let locations = store.locations(OWNER).unwrap();
    assert_eq!(locations.len(), 2);
    let site_a = store.find_location_by_name(OWNER, "site a").unwrap().unwrap();
    assert_eq!(site_a.coordinates(), Some((6.5244, 3.3792)));
}

#[test]
fn test_comparison_glyph_concentration_is_stored_as_number() {
    let store = ingested_store();
    let site_b = store.find_location_by_name(OWNER, "Site B").unwrap().unwrap();
    let pm25 = store.find_pollutant_by_name("PM2.5").unwrap().unwrap();

    let first = store
        .readings()
        .iter()
        .filter(|r| r.location_id == site_b.id && r.pollutant_type_id == pm25.id)
        .min_by_key(|r| r.measured_at)
        .unwrap();
    assert_eq!(first.concentration, 5.2);
    assert_eq!(first.meteorology.temperature, Some(27.4));
}

#[test]
fn test_invalid_rows_are_skipped_and_reported() {
    let mut store = MemoryStore::with_default_catalog();
    let result = ingest(&mut store, "monitoring_with_errors.csv", IngestConfig::default());

    assert!(result.success);
    assert_eq!(
        (result.processed, result.successful, result.failed, result.skipped),
        (4, 2, 2, 0)
    );
    assert_eq!(
        result.errors,
        vec![
            "Row 3: Concentration cannot be negative: -3".to_string(),
            "Row 4: Pollutant type 'Radon' not found".to_string(),
        ]
    );
    assert!(
        result
            .warnings
            .contains(&"Dropped 1 rows with missing critical data".to_string())
    );
    assert!(
        result
            .warnings
            .contains(&"Dropped 1 rows with invalid dates or concentrations".to_string())
    );
    assert_eq!(result.status, UploadStatus::CompletedWithErrors);
    assert_eq!(store.readings().len(), 2);

    let log = store.upload_log(result.upload_log_id).unwrap().unwrap();
    assert_eq!(log.status, UploadStatus::CompletedWithErrors);
    assert_eq!(log.rows_failed, 2);
    assert!(log.error_log.contains("Row 4"));
}

#[test]
fn test_strict_mode_aborts_on_first_invalid_row() {
    let mut store = MemoryStore::with_default_catalog();
    let config = IngestConfig::builder().skip_invalid_rows(false).build().unwrap();
    let result = ingest(&mut store, "monitoring_with_errors.csv", config);

    assert!(!result.success);
    assert_eq!(result.status, UploadStatus::Failed);
    assert_eq!(result.error_code.as_deref(), Some("ROW_REJECTED"));
    assert_eq!(
        result.error.as_deref(),
        Some("Row 3: Concentration cannot be negative: -3")
    );
    assert!(store.readings().is_empty());

    let log = store.upload_log(result.upload_log_id).unwrap().unwrap();
    assert_eq!(log.status, UploadStatus::Failed);
}

#[test]
fn test_missing_required_column_is_fatal() {
    let mut store = MemoryStore::with_default_catalog();
    let result = ingest(&mut store, "missing_columns.csv", IngestConfig::default());

    assert!(!result.success);
    assert_eq!(result.error_code.as_deref(), Some("MISSING_COLUMNS"));
    assert_eq!(
        result.error.as_deref(),
        Some("Missing required columns: concentration")
    );
    assert!(result.batch.is_none());
    assert!(store.batches().is_empty());
    assert!(store.readings().is_empty());

    let log = store.upload_log(result.upload_log_id).unwrap().unwrap();
    assert_eq!(log.status, UploadStatus::Failed);
    assert!(log.error_log.contains("concentration"));
}

#[test]
fn test_unsupported_format_is_fatal() {
    let mut store = MemoryStore::with_default_catalog();
    let upload = UploadedFile::new("readings.txt", b"location,pollutant\n".to_vec());
    let result = IngestionPipeline::default().process(&mut store, OWNER, &upload, metadata());

    assert!(!result.success);
    assert_eq!(result.error_code.as_deref(), Some("UNSUPPORTED_FORMAT"));
    assert!(store.batches().is_empty());
}

#[test]
fn test_unknown_location_without_auto_create() {
    let mut store = MemoryStore::with_default_catalog();
    let config = IngestConfig::builder()
        .create_missing_locations(false)
        .build()
        .unwrap();
    let result = ingest(&mut store, "monitoring_valid.csv", config);

    assert!(result.success);
    assert_eq!((result.successful, result.failed), (0, 12));
    assert_eq!(result.status, UploadStatus::CompletedWithErrors);
    assert!(result.errors[0].starts_with("Row 2: Location 'Site A' not found"));
    assert!(store.locations(OWNER).unwrap().is_empty());
}

#[test]
fn test_store_failure_during_persistence_propagates() {
    let mut store = FailingStore::new();
    store.fail_bulk_insert = true;
    let result = IngestionPipeline::default().process(
        &mut store,
        OWNER,
        &load_fixture("monitoring_valid.csv"),
        metadata(),
    );

    assert!(!result.success);
    assert_eq!(result.error_code.as_deref(), Some("STORAGE_ERROR"));
    assert_eq!(result.successful, 0);
    assert!(store.inner.readings().is_empty());

    let log = store.upload_log(result.upload_log_id).unwrap().unwrap();
    assert_eq!(log.status, UploadStatus::Failed);
}

#[test]
fn test_store_failure_in_row_is_not_absorbed() {
    let mut store = FailingStore::new();
    store.fail_pollutant_lookup = true;
    let result = IngestionPipeline::default().process(
        &mut store,
        OWNER,
        &load_fixture("monitoring_valid.csv"),
        metadata(),
    );

    assert!(!result.success);
    assert_eq!(result.error_code.as_deref(), Some("STORAGE_ERROR"));
    assert_eq!(result.failed, 0);
    assert!(result.errors.is_empty());
}

#[test]
fn test_progress_reaches_complete() {
    let stages = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&stages);
    let pipeline = IngestionPipeline::builder()
        .on_progress(move |update| seen.lock().unwrap().push(update.stage))
        .build()
        .unwrap();

    let mut store = MemoryStore::with_default_catalog();
    let result = pipeline.process(
        &mut store,
        OWNER,
        &load_fixture("monitoring_valid.csv"),
        metadata(),
    );
    assert!(result.success);

    let stages = stages.lock().unwrap();
    assert_eq!(stages.first(), Some(&IngestStage::Reading));
    assert_eq!(stages.last(), Some(&IngestStage::Complete));
    assert!(stages.contains(&IngestStage::ProcessingRows));
}

#[test]
fn test_preview_does_not_persist() {
    let preview = preview_file(&load_fixture("monitoring_valid.csv"), 3).unwrap();

    assert_eq!(preview.row_count, 12);
    assert_eq!(preview.sample_rows.len(), 3);
    assert!(preview.missing_required.is_empty());
    assert_eq!(
        preview.sample_rows[0].get("Site Name").cloned().flatten().as_deref(),
        Some("Site A")
    );

    let preview = preview_file(&load_fixture("missing_columns.csv"), 10).unwrap();
    assert_eq!(preview.missing_required, vec!["concentration".to_string()]);
}

#[test]
fn test_store_snapshot_survives_reload() {
    let store = ingested_store();
    let path = std::env::temp_dir().join(format!("envirodata-store-{}.json", Uuid::new_v4()));
    store.save(&path).unwrap();

    let reloaded = MemoryStore::load(&path).unwrap();
    assert_eq!(reloaded.readings().len(), 12);
    assert_eq!(reloaded.locations(OWNER).unwrap().len(), 2);

    std::fs::remove_file(&path).unwrap();
}

// ============================================================================
// Analysis Tests
// ============================================================================

#[test]
fn test_descriptive_uses_valid_readings_only() {
    let store = ingested_store();
    let analyzer = StatisticalAnalyzer::new(&store, OWNER);

    let stats = analyzer
        .descriptive(&ReadingFilter::default())
        .unwrap()
        .into_completed()
        .unwrap();
    assert_eq!(stats.overall.total_readings, 11);
    assert_eq!(stats.overall.unique_locations, 2);
    assert_eq!(stats.overall.unique_pollutants, 2);

    let no2 = &stats.by_pollutant["NO2"];
    assert_eq!(no2.count, 6);
    assert!((no2.mean - 30.533_333).abs() < 1e-5);
    assert_eq!(no2.min, 22.8);
    assert_eq!(no2.max, 41.7);
    assert_eq!(stats.by_pollutant["PM2.5"].count, 5);
}

#[test]
fn test_other_owner_sees_no_data() {
    let store = ingested_store();
    let analyzer = StatisticalAnalyzer::new(&store, "bob");

    let result = analyzer.descriptive(&ReadingFilter::default()).unwrap();
    assert_eq!(result.error(), Some("No data available for analysis"));
}

#[test]
fn test_compliance_excludes_invalid_readings() {
    let store = ingested_store();
    let analyzer = StatisticalAnalyzer::new(&store, OWNER);

    let results = analyzer
        .compliance(&ReadingFilter::default())
        .unwrap()
        .into_completed()
        .unwrap();

    // The invalid 16.9 reading would otherwise be a third WHO exceedance
    let who = &results["PM2.5"].standards["who"];
    assert_eq!(who.total_measurements, 5);
    assert_eq!(who.exceedances, 2);
    assert_eq!(who.exceedance_rate_percent, 40.0);
    assert_eq!(who.max_concentration, 24.3);
    assert!((who.exceedance_factor - 1.62).abs() < 1e-12);
    assert_eq!(who.compliance_status, ComplianceStatus::NonCompliant);

    let nesrea = &results["PM2.5"].standards["nesrea"];
    assert_eq!(nesrea.exceedances, 0);
    assert_eq!(nesrea.compliance_status, ComplianceStatus::Compliant);

    assert_eq!(results["NO2"].standards["who"].exceedances, 1);
}

#[test]
fn test_monthly_trend() {
    let store = ingested_store();
    let analyzer = StatisticalAnalyzer::new(&store, OWNER);

    let results = analyzer
        .trend(&ReadingFilter::default(), TimeBucket::Monthly, None)
        .unwrap()
        .into_completed()
        .unwrap();

    let no2 = &results["NO2"];
    assert_eq!(no2.n_periods, 3);
    assert_eq!(no2.trend_direction, "increasing");
    assert_eq!(
        no2.trend_data.iter().map(|p| p.period.as_str()).collect::<Vec<_>>(),
        vec!["2024-01", "2024-02", "2024-03"]
    );
    assert!((no2.slope - 4.275).abs() < 1e-9);
    assert!(results.contains_key("PM2.5"));
}

#[test]
fn test_trend_on_two_periods_is_defined() {
    let store = ingested_store();
    let config = AnalysisConfig::builder().min_trend_periods(2).build().unwrap();
    let analyzer = StatisticalAnalyzer::new(&store, OWNER)
        .with_config(config)
        .unwrap();
    let filter = ReadingFilter {
        date_to: Some(Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap()),
        ..Default::default()
    };

    let results = analyzer
        .trend(&filter, TimeBucket::Monthly, Some("no2"))
        .unwrap()
        .into_completed()
        .unwrap();

    let no2 = &results["NO2"];
    assert_eq!(no2.n_periods, 2);
    assert_eq!(no2.p_value, 1.0);
    assert!(!no2.significant_trend);
    assert_eq!(results.len(), 1);
}

#[test]
fn test_t_test_between_sites() {
    let store = ingested_store();
    let analyzer = StatisticalAnalyzer::new(&store, OWNER);

    let results = analyzer
        .t_test(
            &location_filter(&store, "Site A"),
            &location_filter(&store, "Site B"),
            false,
        )
        .unwrap()
        .into_completed()
        .unwrap();

    assert_eq!(results.keys().collect::<Vec<_>>(), vec!["NO2", "PM2.5"]);
    assert_eq!(results["NO2"].group1_stats.n, 3);
    assert_eq!(results["NO2"].group2_stats.n, 3);
    // Site B's invalid March reading leaves two PM2.5 values
    assert_eq!(results["PM2.5"].group2_stats.n, 2);
    assert!(results["NO2"].cohens_d > 0.0);
}

#[test]
fn test_anova_with_two_sites_has_no_post_hoc() {
    let store = ingested_store();
    let analyzer = StatisticalAnalyzer::new(&store, OWNER);

    let groups = vec![
        AnovaGroup {
            name: Some("Site A".to_string()),
            filter: location_filter(&store, "Site A"),
        },
        AnovaGroup {
            name: None,
            filter: location_filter(&store, "Site B"),
        },
    ];
    let results = analyzer
        .anova(&groups, "Location")
        .unwrap()
        .into_completed()
        .unwrap();

    let no2 = &results["NO2"];
    assert_eq!(no2.factor_name, "Location");
    assert_eq!(
        no2.group_stats.iter().map(|g| g.group_name.as_str()).collect::<Vec<_>>(),
        vec!["Site A", "Group 2"]
    );
    assert!(no2.post_hoc.is_empty());
}

#[test]
fn test_batch_filter() {
    let mut store = ingested_store();
    let second = ingest(&mut store, "monitoring_with_errors.csv", IngestConfig::default());
    let analyzer = StatisticalAnalyzer::new(&store, OWNER);

    let filter = ReadingFilter {
        batches: vec![second.batch.unwrap().id],
        ..Default::default()
    };
    let stats = analyzer
        .descriptive(&filter)
        .unwrap()
        .into_completed()
        .unwrap();
    assert_eq!(stats.overall.total_readings, 2);
}

#[test]
fn test_inverted_date_range_is_rejected() {
    let store = ingested_store();
    let analyzer = StatisticalAnalyzer::new(&store, OWNER);
    let filter = ReadingFilter {
        date_from: Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()),
        date_to: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        ..Default::default()
    };

    let err = analyzer.descriptive(&filter).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_REQUEST");
}

// ============================================================================
// Report Tests
// ============================================================================

#[test]
fn test_full_report_from_requests() {
    let store = ingested_store();
    let analyzer = StatisticalAnalyzer::new(&store, OWNER);

    let requests: Vec<AnalysisRequest> = serde_json::from_value(serde_json::json!([
        {"analysis": "descriptive"},
        {"analysis": "correlation"},
        {"analysis": "trend", "period": "monthly"},
        {"analysis": "compliance"},
        {"analysis": "multivariate"},
    ]))
    .unwrap();
    let results = analyzer.run_all(&requests).unwrap();
    assert!(results.t_test.is_none());

    let report = ReportGenerator::build_report(&results).unwrap();
    assert_eq!(report.title, "Environmental Data Statistical Analysis Report");
    assert_eq!(
        report.sections.iter().map(|s| s.title.as_str()).collect::<Vec<_>>(),
        vec![
            "Descriptive Statistics",
            "Correlation Analysis",
            "Temporal Trend Analysis",
            "Regulatory Compliance Analysis",
            "Multivariate Analysis",
        ]
    );
    assert_eq!(
        report.sections[0].summary,
        "Analysis of 11 readings across 2 locations and 2 pollutants."
    );
    assert_eq!(
        report.sections[3].summary,
        "Analysis of compliance with WHO, NESREA, and EPA standards."
    );
    assert!(
        report.sections[3]
            .highlights
            .contains(&"PM2.5 exceeds the who standard in 2 of 5 readings (40.0%)".to_string())
    );

    // Every section's content is plain JSON
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"by_pollutant\""));
}

#[test]
fn test_report_written_to_directory() {
    let store = ingested_store();
    let results = StatisticalAnalyzer::new(&store, OWNER)
        .run_all(&[AnalysisRequest::Compliance {
            filter: ReadingFilter::default(),
        }])
        .unwrap();
    let report = ReportGenerator::build_report(&results).unwrap();

    let dir = std::env::temp_dir().join(format!("envirodata-reports-{}", Uuid::new_v4()));
    let path = ReportGenerator::new(dir.clone(), None)
        .write_report_to_file(&report, "q1")
        .unwrap();
    assert_eq!(path.file_name().unwrap(), "q1_report.json");

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["sections"][0]["title"], "Regulatory Compliance Analysis");

    std::fs::remove_dir_all(&dir).unwrap();
}
