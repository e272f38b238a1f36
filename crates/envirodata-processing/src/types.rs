//! Domain entities shared by the ingestion pipeline, the store and the
//! analysis engine.

use crate::error::{ProcessingError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Categorical enums
// ============================================================================

/// Categorical site type of a monitoring location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SiteType {
    Industrial,
    Residential,
    Agricultural,
    Forest,
    Urban,
    Rural,
    Coastal,
    #[default]
    Other,
}

impl SiteType {
    pub const ALL: [SiteType; 8] = [
        Self::Industrial,
        Self::Residential,
        Self::Agricultural,
        Self::Forest,
        Self::Urban,
        Self::Rural,
        Self::Coastal,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Industrial => "industrial",
            Self::Residential => "residential",
            Self::Agricultural => "agricultural",
            Self::Forest => "forest",
            Self::Urban => "urban",
            Self::Rural => "rural",
            Self::Coastal => "coastal",
            Self::Other => "other",
        }
    }

    /// Case-insensitive lookup by label.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        Self::ALL.into_iter().find(|site| site.as_str() == label)
    }
}

/// Broad pollutant category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollutantCategory {
    AirQuality,
    HeavyMetal,
    OrganicCompound,
    Particulate,
    Gas,
    Other,
}

/// Authority that publishes a regulatory threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authority {
    Who,
    Nesrea,
    Epa,
}

impl Authority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Who => "who",
            Self::Nesrea => "nesrea",
            Self::Epa => "epa",
        }
    }
}

/// Validity marker on a reading. Only [`QualityFlag::Valid`] readings take
/// part in statistics and compliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    #[default]
    Valid,
    Questionable,
    Invalid,
    BelowDetection,
    Calibration,
    Maintenance,
}

impl QualityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Questionable => "questionable",
            Self::Invalid => "invalid",
            Self::BelowDetection => "below_detection",
            Self::Calibration => "calibration",
            Self::Maintenance => "maintenance",
        }
    }

    /// Parse a flag as it appears in uploaded files. Accepts the canonical
    /// labels plus a few common spellings (`bdl`, `below detection limit`).
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "valid" | "ok" => Some(Self::Valid),
            "questionable" | "suspect" => Some(Self::Questionable),
            "invalid" => Some(Self::Invalid),
            "below_detection" | "below_detection_limit" | "bdl" => Some(Self::BelowDetection),
            "calibration" => Some(Self::Calibration),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Study type attached to a sample batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StudyType {
    Baseline,
    #[default]
    Monitoring,
    Compliance,
    Research,
    ImpactAssessment,
    Emergency,
    Other,
}

// ============================================================================
// Reference entities
// ============================================================================

/// A monitoring site owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub owner: String,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub site_type: SiteType,
    /// Distance to the nearest known emission source, in kilometres.
    pub distance_from_source: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Location {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

/// Attributes of a location about to be created.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewLocation {
    pub owner: String,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub site_type: SiteType,
}

/// A regulatory threshold for one pollutant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatoryStandard {
    pub authority: Authority,
    pub limit: f64,
    /// Averaging period the limit applies to, e.g. "24-hour" or "annual".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub averaging_time: Option<String>,
}

impl RegulatoryStandard {
    pub fn new(authority: Authority, limit: f64) -> Self {
        Self {
            authority,
            limit,
            averaging_time: None,
        }
    }

    pub fn with_averaging_time(mut self, averaging_time: impl Into<String>) -> Self {
        self.averaging_time = Some(averaging_time.into());
        self
    }

    /// Key used in compliance results, e.g. `who` or `who_24-hour`.
    pub fn key(&self) -> String {
        match &self.averaging_time {
            Some(period) => format!("{}_{}", self.authority.as_str(), period),
            None => self.authority.as_str().to_string(),
        }
    }
}

/// A measurable pollutant with its unit and regulatory thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollutantType {
    pub id: Uuid,
    pub name: String,
    pub formula: Option<String>,
    pub category: PollutantCategory,
    pub unit: String,
    #[serde(default)]
    pub standards: Vec<RegulatoryStandard>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl PollutantType {
    pub fn new(name: impl Into<String>, category: PollutantCategory, unit: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            formula: None,
            category,
            unit: unit.into(),
            standards: Vec::new(),
            is_active: true,
        }
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn with_standard(mut self, standard: RegulatoryStandard) -> Self {
        self.standards.push(standard);
        self
    }
}

// ============================================================================
// Readings
// ============================================================================

/// Meteorological covariates recorded alongside a reading.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Meteorology {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    /// Degrees clockwise from north.
    pub wind_direction: Option<f64>,
}

/// Where a reading came from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub sampling_method: Option<String>,
    pub equipment: Option<String>,
    pub operator: Option<String>,
    pub sample_id: Option<String>,
    pub notes: Option<String>,
}

/// One persisted measurement of a pollutant at a location and time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalReading {
    pub id: Uuid,
    pub owner: String,
    pub location_id: Uuid,
    pub pollutant_type_id: Uuid,
    /// Always non-negative.
    pub concentration: f64,
    pub measured_at: DateTime<Utc>,
    pub quality_flag: QualityFlag,
    #[serde(default)]
    pub meteorology: Meteorology,
    pub detection_limit: Option<f64>,
    pub uncertainty_percent: Option<f64>,
    #[serde(default)]
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
}

impl EnvironmentalReading {
    /// Concentration usable for compliance scoring, defined only for
    /// valid readings.
    pub fn compliance_concentration(&self) -> Option<f64> {
        (self.quality_flag == QualityFlag::Valid).then_some(self.concentration)
    }

    /// Whether this reading strictly exceeds `standard`. `None` when the
    /// reading is not valid.
    pub fn exceeds(&self, standard: &RegulatoryStandard) -> Option<bool> {
        self.compliance_concentration()
            .map(|value| value > standard.limit)
    }
}

// ============================================================================
// Batches and upload logs
// ============================================================================

/// Batch metadata supplied by the caller of an ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub name: String,
    pub sampling_date: NaiveDate,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub project_code: Option<String>,
    #[serde(default)]
    pub study_type: StudyType,
}

impl BatchMetadata {
    pub fn new(name: impl Into<String>, sampling_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            sampling_date,
            description: None,
            project_name: None,
            project_code: None,
            study_type: StudyType::default(),
        }
    }
}

/// The readings created by one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBatch {
    pub id: Uuid,
    pub owner: String,
    #[serde(flatten)]
    pub metadata: BatchMetadata,
    pub created_at: DateTime<Utc>,
}

impl SampleBatch {
    pub fn new(owner: impl Into<String>, metadata: BatchMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// Counts derived from a batch's readings. Computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub reading_count: usize,
    pub location_count: usize,
    pub pollutant_count: usize,
}

/// Membership link between a batch and a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchReading {
    pub batch_id: Uuid,
    pub reading_id: Uuid,
}

/// Processing status of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithErrors | Self::Failed
        )
    }
}

/// Final figures attached to an [`UploadLog`] when a run ends.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UploadTotals {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub error_log: String,
    pub warning_log: String,
    pub batch_id: Option<Uuid>,
}

/// Audit record of one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadLog {
    pub id: Uuid,
    pub owner: String,
    pub filename: String,
    pub file_size: u64,
    pub status: UploadStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rows_processed: usize,
    pub rows_successful: usize,
    pub rows_failed: usize,
    pub rows_skipped: usize,
    pub error_log: String,
    pub warning_log: String,
    pub batch_id: Option<Uuid>,
}

impl UploadLog {
    /// Open a log for a run that is starting now.
    pub fn start(owner: impl Into<String>, filename: impl Into<String>, file_size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            filename: filename.into(),
            file_size,
            status: UploadStatus::Processing,
            started_at: Utc::now(),
            completed_at: None,
            rows_processed: 0,
            rows_successful: 0,
            rows_failed: 0,
            rows_skipped: 0,
            error_log: String::new(),
            warning_log: String::new(),
            batch_id: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Attach the final counters and status. A log can only be finalized
    /// once; later calls fail and leave it unchanged.
    pub fn finalize(&mut self, status: UploadStatus, totals: UploadTotals) -> Result<()> {
        if self.is_finalized() {
            return Err(ProcessingError::AlreadyFinalized(self.id));
        }
        if !status.is_terminal() {
            return Err(ProcessingError::InvalidRequest(format!(
                "cannot finalize upload log with non-terminal status {:?}",
                status
            )));
        }

        self.status = status;
        self.completed_at = Some(Utc::now());
        self.rows_processed = totals.processed;
        self.rows_successful = totals.successful;
        self.rows_failed = totals.failed;
        self.rows_skipped = totals.skipped;
        self.error_log = totals.error_log;
        self.warning_log = totals.warning_log;
        self.batch_id = totals.batch_id;
        Ok(())
    }

    /// Percentage of processed rows that produced a reading.
    pub fn success_rate(&self) -> f64 {
        if self.rows_processed == 0 {
            return 0.0;
        }
        self.rows_successful as f64 / self.rows_processed as f64 * 100.0
    }
}
