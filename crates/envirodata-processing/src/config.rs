//! Configuration types for ingestion and analysis.
//!
//! Both configurations follow the builder pattern and validate on `build()`.
//! They also deserialize from partial JSON: missing keys take their defaults.

use serde::{Deserialize, Serialize};

/// Default upload size limit (10 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Options recognized by the ingestion pipeline.
///
/// # Example
///
/// ```rust,ignore
/// use envirodata_processing::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .create_missing_locations(false)
///     .skip_invalid_rows(true)
///     .build()?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Create a location when a row references one that does not exist.
    /// Default: true
    pub create_missing_locations: bool,

    /// Record row-scoped errors and continue instead of aborting the run.
    /// Default: true
    pub skip_invalid_rows: bool,

    /// Uploads larger than this are rejected before parsing.
    /// Default: 10 MiB
    pub max_file_size_bytes: u64,

    /// Upper bound on row errors kept in the upload log text.
    /// Default: 1000
    pub max_logged_errors: usize,

    /// Count exact duplicate rows within one file as skipped.
    /// Default: true
    pub skip_duplicate_rows: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            create_missing_locations: true,
            skip_invalid_rows: true,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE,
            max_logged_errors: 1000,
            skip_duplicate_rows: true,
        }
    }
}

impl IngestConfig {
    /// Create a new configuration builder.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_file_size_bytes == 0 {
            return Err(ConfigValidationError::ZeroLimit(
                "max_file_size_bytes".to_string(),
            ));
        }
        if self.max_logged_errors == 0 {
            return Err(ConfigValidationError::ZeroLimit(
                "max_logged_errors".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug, Default)]
pub struct IngestConfigBuilder {
    create_missing_locations: Option<bool>,
    skip_invalid_rows: Option<bool>,
    max_file_size_bytes: Option<u64>,
    max_logged_errors: Option<usize>,
    skip_duplicate_rows: Option<bool>,
}

impl IngestConfigBuilder {
    pub fn create_missing_locations(mut self, create: bool) -> Self {
        self.create_missing_locations = Some(create);
        self
    }

    /// When false, the first row-scoped error aborts the whole run and no
    /// readings from it are persisted.
    pub fn skip_invalid_rows(mut self, skip: bool) -> Self {
        self.skip_invalid_rows = Some(skip);
        self
    }

    pub fn max_file_size_bytes(mut self, limit: u64) -> Self {
        self.max_file_size_bytes = Some(limit);
        self
    }

    pub fn max_logged_errors(mut self, limit: usize) -> Self {
        self.max_logged_errors = Some(limit);
        self
    }

    pub fn skip_duplicate_rows(mut self, skip: bool) -> Self {
        self.skip_duplicate_rows = Some(skip);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<IngestConfig, ConfigValidationError> {
        let defaults = IngestConfig::default();
        let config = IngestConfig {
            create_missing_locations: self
                .create_missing_locations
                .unwrap_or(defaults.create_missing_locations),
            skip_invalid_rows: self.skip_invalid_rows.unwrap_or(defaults.skip_invalid_rows),
            max_file_size_bytes: self
                .max_file_size_bytes
                .unwrap_or(defaults.max_file_size_bytes),
            max_logged_errors: self.max_logged_errors.unwrap_or(defaults.max_logged_errors),
            skip_duplicate_rows: self
                .skip_duplicate_rows
                .unwrap_or(defaults.skip_duplicate_rows),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Tunables for the statistical analysis engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Threshold below which a p-value counts as significant.
    /// Default: 0.05
    pub significance_level: f64,

    /// Threshold on the variance-homogeneity pre-test. Above it the pooled
    /// (equal variance) t-test is used, otherwise Welch's.
    /// Default: 0.05
    pub variance_test_alpha: f64,

    /// Minimum number of time buckets for a trend fit.
    /// Default: 3
    pub min_trend_periods: usize,

    /// Upper bound of the elbow search range for k-means.
    /// Default: 10
    pub max_clusters: usize,

    /// Seed for k-means initialisation.
    /// Default: 42
    pub kmeans_seed: u64,

    /// Number of k-means restarts; the lowest inertia wins.
    /// Default: 10
    pub kmeans_restarts: usize,

    /// Lloyd iterations per restart.
    /// Default: 300
    pub kmeans_max_iterations: usize,

    /// Cumulative explained variance the PCA component count must reach.
    /// Default: 0.95
    pub variance_target: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            significance_level: 0.05,
            variance_test_alpha: 0.05,
            min_trend_periods: 3,
            max_clusters: 10,
            kmeans_seed: 42,
            kmeans_restarts: 10,
            kmeans_max_iterations: 300,
            variance_target: 0.95,
        }
    }
}

impl AnalysisConfig {
    /// Create a new configuration builder.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        for (field, value) in [
            ("significance_level", self.significance_level),
            ("variance_test_alpha", self.variance_test_alpha),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(ConfigValidationError::InvalidProbability {
                    field: field.to_string(),
                    value,
                });
            }
        }
        if !(self.variance_target > 0.0 && self.variance_target <= 1.0) {
            return Err(ConfigValidationError::InvalidProbability {
                field: "variance_target".to_string(),
                value: self.variance_target,
            });
        }
        if self.min_trend_periods < 2 {
            return Err(ConfigValidationError::TooSmall {
                field: "min_trend_periods".to_string(),
                value: self.min_trend_periods,
                minimum: 2,
            });
        }
        if self.max_clusters < 2 {
            return Err(ConfigValidationError::TooSmall {
                field: "max_clusters".to_string(),
                value: self.max_clusters,
                minimum: 2,
            });
        }
        if self.kmeans_restarts == 0 {
            return Err(ConfigValidationError::ZeroLimit(
                "kmeans_restarts".to_string(),
            ));
        }
        if self.kmeans_max_iterations == 0 {
            return Err(ConfigValidationError::ZeroLimit(
                "kmeans_max_iterations".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug, Default)]
pub struct AnalysisConfigBuilder {
    significance_level: Option<f64>,
    variance_test_alpha: Option<f64>,
    min_trend_periods: Option<usize>,
    max_clusters: Option<usize>,
    kmeans_seed: Option<u64>,
    kmeans_restarts: Option<usize>,
    kmeans_max_iterations: Option<usize>,
    variance_target: Option<f64>,
}

impl AnalysisConfigBuilder {
    pub fn significance_level(mut self, alpha: f64) -> Self {
        self.significance_level = Some(alpha);
        self
    }

    pub fn variance_test_alpha(mut self, alpha: f64) -> Self {
        self.variance_test_alpha = Some(alpha);
        self
    }

    pub fn min_trend_periods(mut self, periods: usize) -> Self {
        self.min_trend_periods = Some(periods);
        self
    }

    pub fn max_clusters(mut self, k: usize) -> Self {
        self.max_clusters = Some(k);
        self
    }

    pub fn kmeans_seed(mut self, seed: u64) -> Self {
        self.kmeans_seed = Some(seed);
        self
    }

    pub fn kmeans_restarts(mut self, restarts: usize) -> Self {
        self.kmeans_restarts = Some(restarts);
        self
    }

    pub fn kmeans_max_iterations(mut self, iterations: usize) -> Self {
        self.kmeans_max_iterations = Some(iterations);
        self
    }

    pub fn variance_target(mut self, target: f64) -> Self {
        self.variance_target = Some(target);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<AnalysisConfig, ConfigValidationError> {
        let defaults = AnalysisConfig::default();
        let config = AnalysisConfig {
            significance_level: self
                .significance_level
                .unwrap_or(defaults.significance_level),
            variance_test_alpha: self
                .variance_test_alpha
                .unwrap_or(defaults.variance_test_alpha),
            min_trend_periods: self.min_trend_periods.unwrap_or(defaults.min_trend_periods),
            max_clusters: self.max_clusters.unwrap_or(defaults.max_clusters),
            kmeans_seed: self.kmeans_seed.unwrap_or(defaults.kmeans_seed),
            kmeans_restarts: self.kmeans_restarts.unwrap_or(defaults.kmeans_restarts),
            kmeans_max_iterations: self
                .kmeans_max_iterations
                .unwrap_or(defaults.kmeans_max_iterations),
            variance_target: self.variance_target.unwrap_or(defaults.variance_target),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid value for '{field}': {value} (must be between 0.0 and 1.0)")]
    InvalidProbability { field: String, value: f64 },

    #[error("Invalid value for '{field}': {value} (must be at least {minimum})")]
    TooSmall {
        field: String,
        value: usize,
        minimum: usize,
    },

    #[error("'{0}' must be greater than zero")]
    ZeroLimit(String),
}

impl From<ConfigValidationError> for crate::error::ProcessingError {
    fn from(err: ConfigValidationError) -> Self {
        crate::error::ProcessingError::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ingest_config() {
        let config = IngestConfig::default();
        assert!(config.create_missing_locations);
        assert!(config.skip_invalid_rows);
        assert_eq!(config.max_file_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.max_logged_errors, 1000);
    }

    #[test]
    fn test_ingest_builder_custom_values() {
        let config = IngestConfig::builder()
            .create_missing_locations(false)
            .skip_invalid_rows(false)
            .max_file_size_bytes(1024)
            .build()
            .unwrap();

        assert!(!config.create_missing_locations);
        assert!(!config.skip_invalid_rows);
        assert_eq!(config.max_file_size_bytes, 1024);
        assert!(config.skip_duplicate_rows);
    }

    #[test]
    fn test_ingest_validation_rejects_zero_limit() {
        let result = IngestConfig::builder().max_file_size_bytes(0).build();
        assert!(matches!(
            result.unwrap_err(),
            ConfigValidationError::ZeroLimit(field) if field == "max_file_size_bytes"
        ));
    }

    #[test]
    fn test_ingest_config_from_partial_json() {
        let config: IngestConfig =
            serde_json::from_str(r#"{"skip_invalid_rows": false}"#).unwrap();
        assert!(!config.skip_invalid_rows);
        assert!(config.create_missing_locations);
        assert_eq!(config.max_file_size_bytes, DEFAULT_MAX_FILE_SIZE);
    }

    #[test]
    fn test_analysis_builder_defaults() {
        let config = AnalysisConfig::builder().build().unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.kmeans_seed, 42);
        assert_eq!(config.max_clusters, 10);
    }

    #[test]
    fn test_analysis_validation_invalid_alpha() {
        let result = AnalysisConfig::builder().significance_level(1.5).build();
        assert!(matches!(
            result.unwrap_err(),
            ConfigValidationError::InvalidProbability { .. }
        ));
    }

    #[test]
    fn test_analysis_validation_min_trend_periods() {
        let result = AnalysisConfig::builder().min_trend_periods(1).build();
        assert!(matches!(
            result.unwrap_err(),
            ConfigValidationError::TooSmall { minimum: 2, .. }
        ));
    }

    #[test]
    fn test_config_error_converts_to_processing_error() {
        let err: crate::error::ProcessingError = ConfigValidationError::ZeroLimit("x".into()).into();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }
}
