//! Statistical analysis over persisted readings.
//!
//! Every method reads the owner's valid readings through a [`ReadingFilter`],
//! flattens them into a [`ReadingFrame`] and computes. Nothing is written
//! back, so an analyzer can be shared freely between callers.
//!
//! Short or empty data never fails a method: the result is
//! [`Analysis::Unavailable`] carrying the reason. The outer `Result` is
//! reserved for store failures and malformed requests.
//!
//! # Example
//!
//! ```rust,ignore
//! use envirodata_processing::{AnalysisRequest, ReadingFilter, StatisticalAnalyzer};
//!
//! let analyzer = StatisticalAnalyzer::new(&store, "alice");
//! let results = analyzer.run_all(&[
//!     AnalysisRequest::Descriptive { filter: ReadingFilter::default() },
//!     AnalysisRequest::Compliance { filter: ReadingFilter::default() },
//! ])?;
//! ```

pub mod compliance;
pub mod correlation;
pub mod descriptive;
pub mod distributions;
pub mod frame;
pub mod hypothesis;
pub mod multivariate;
pub mod trend;

pub use compliance::{ComplianceStatus, PollutantCompliance, StandardCompliance};
pub use correlation::{CorrelationPair, CorrelationResults};
pub use descriptive::DescriptiveStatistics;
pub use frame::ReadingFrame;
pub use hypothesis::{AnovaOutcome, EffectSize, GroupValues, TTestOutcome};
pub use multivariate::{ClusterResult, MultivariateResults, PcaResult};
pub use trend::{TimeBucket, TrendOutcome};

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::store::{ReadingFilter, ReadingStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

pub type TTestResults = BTreeMap<String, TTestOutcome>;
pub type AnovaResults = BTreeMap<String, AnovaOutcome>;
pub type TrendResults = BTreeMap<String, TrendOutcome>;
pub type ComplianceResults = BTreeMap<String, PollutantCompliance>;

/// Outcome of one analysis: the result, or why it could not be computed.
///
/// Serialized untagged, so an unavailable analysis reads as
/// `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Analysis<T> {
    Unavailable { error: String },
    Completed(T),
}

impl<T> Analysis<T> {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            error: reason.into(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn into_completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Completed(_) => None,
            Self::Unavailable { error } => Some(error),
        }
    }
}

fn default_factor_name() -> String {
    "Group".to_string()
}

/// One group of an ANOVA request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnovaGroup {
    /// Display name; defaults to `Group {n}` by position.
    #[serde(default, alias = "group_name")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub filter: ReadingFilter,
}

/// A single analysis to run, as accepted from JSON request files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "analysis", rename_all = "snake_case")]
pub enum AnalysisRequest {
    Descriptive {
        #[serde(default)]
        filter: ReadingFilter,
    },
    TTest {
        group1: ReadingFilter,
        group2: ReadingFilter,
        #[serde(default)]
        paired: bool,
    },
    Anova {
        groups: Vec<AnovaGroup>,
        #[serde(default = "default_factor_name")]
        factor_name: String,
    },
    Correlation {
        #[serde(default)]
        filter: ReadingFilter,
    },
    Trend {
        #[serde(default)]
        filter: ReadingFilter,
        #[serde(default)]
        period: TimeBucket,
        #[serde(default)]
        pollutant: Option<String>,
    },
    Compliance {
        #[serde(default)]
        filter: ReadingFilter,
    },
    Multivariate {
        #[serde(default)]
        filter: ReadingFilter,
    },
}

impl AnalysisRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Descriptive { .. } => "descriptive",
            Self::TTest { .. } => "t_test",
            Self::Anova { .. } => "anova",
            Self::Correlation { .. } => "correlation",
            Self::Trend { .. } => "trend",
            Self::Compliance { .. } => "compliance",
            Self::Multivariate { .. } => "multivariate",
        }
    }
}

/// Results of a set of analyses; absent entries were not requested.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptive: Option<Analysis<DescriptiveStatistics>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t_test: Option<Analysis<TTestResults>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anova: Option<Analysis<AnovaResults>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<Analysis<CorrelationResults>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<Analysis<TrendResults>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance: Option<Analysis<ComplianceResults>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multivariate: Option<Analysis<MultivariateResults>>,
}

impl AnalysisResults {
    pub fn is_empty(&self) -> bool {
        self.descriptive.is_none()
            && self.t_test.is_none()
            && self.anova.is_none()
            && self.correlation.is_none()
            && self.trend.is_none()
            && self.compliance.is_none()
            && self.multivariate.is_none()
    }
}

/// Runs analyses for one owner against a store.
pub struct StatisticalAnalyzer<'a, S: ReadingStore + ?Sized> {
    store: &'a S,
    owner: String,
    config: AnalysisConfig,
}

impl<'a, S: ReadingStore + ?Sized> StatisticalAnalyzer<'a, S> {
    pub fn new(store: &'a S, owner: impl Into<String>) -> Self {
        Self {
            store,
            owner: owner.into(),
            config: AnalysisConfig::default(),
        }
    }

    /// Replace the default configuration after validating it.
    pub fn with_config(mut self, config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    fn load(&self, filter: &ReadingFilter) -> Result<ReadingFrame> {
        ReadingFrame::load(self.store, &self.owner, filter)
    }

    pub fn descriptive(&self, filter: &ReadingFilter) -> Result<Analysis<DescriptiveStatistics>> {
        descriptive::describe(&self.load(filter)?)
    }

    pub fn t_test(
        &self,
        group1: &ReadingFilter,
        group2: &ReadingFilter,
        paired: bool,
    ) -> Result<Analysis<TTestResults>> {
        let first = self.load(group1)?.values_by_pollutant()?;
        let second = self.load(group2)?.values_by_pollutant()?;
        Ok(hypothesis::t_test(&first, &second, paired, &self.config))
    }

    pub fn anova(&self, groups: &[AnovaGroup], factor_name: &str) -> Result<Analysis<AnovaResults>> {
        let mut samples = Vec::with_capacity(groups.len());
        for (idx, group) in groups.iter().enumerate() {
            let name = group
                .name
                .clone()
                .unwrap_or_else(|| format!("Group {}", idx + 1));
            let values = self.load(&group.filter)?.values_by_pollutant()?;
            if values.is_empty() {
                debug!("ANOVA group '{}' has no readings", name);
            }
            samples.push((name, values));
        }
        Ok(hypothesis::anova(&samples, factor_name, &self.config))
    }

    pub fn correlation(&self, filter: &ReadingFilter) -> Result<Analysis<CorrelationResults>> {
        correlation::correlate(&self.load(filter)?, &self.config)
    }

    pub fn trend(
        &self,
        filter: &ReadingFilter,
        period: TimeBucket,
        pollutant: Option<&str>,
    ) -> Result<Analysis<TrendResults>> {
        trend::analyze_trends(&self.load(filter)?, period, pollutant, &self.config)
    }

    pub fn compliance(&self, filter: &ReadingFilter) -> Result<Analysis<ComplianceResults>> {
        compliance::assess_compliance(&self.load(filter)?)
    }

    pub fn multivariate(&self, filter: &ReadingFilter) -> Result<Analysis<MultivariateResults>> {
        multivariate::analyze_multivariate(&self.load(filter)?, &self.config)
    }

    /// Run one request into `results`, replacing any earlier result of the
    /// same kind.
    pub fn run(&self, request: &AnalysisRequest, results: &mut AnalysisResults) -> Result<()> {
        let start = Instant::now();
        match request {
            AnalysisRequest::Descriptive { filter } => {
                results.descriptive = Some(self.descriptive(filter)?);
            }
            AnalysisRequest::TTest {
                group1,
                group2,
                paired,
            } => {
                results.t_test = Some(self.t_test(group1, group2, *paired)?);
            }
            AnalysisRequest::Anova {
                groups,
                factor_name,
            } => {
                results.anova = Some(self.anova(groups, factor_name)?);
            }
            AnalysisRequest::Correlation { filter } => {
                results.correlation = Some(self.correlation(filter)?);
            }
            AnalysisRequest::Trend {
                filter,
                period,
                pollutant,
            } => {
                results.trend = Some(self.trend(filter, *period, pollutant.as_deref())?);
            }
            AnalysisRequest::Compliance { filter } => {
                results.compliance = Some(self.compliance(filter)?);
            }
            AnalysisRequest::Multivariate { filter } => {
                results.multivariate = Some(self.multivariate(filter)?);
            }
        }
        info!(
            "Finished {} analysis in {:.1}ms",
            request.name(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }

    /// Run requests in order and collect their results.
    pub fn run_all(&self, requests: &[AnalysisRequest]) -> Result<AnalysisResults> {
        let mut results = AnalysisResults::default();
        for request in requests {
            self.run(request, &mut results)?;
        }
        Ok(results)
    }
}
