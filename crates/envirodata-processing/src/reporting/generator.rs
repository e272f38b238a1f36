use crate::analysis::{
    Analysis, AnalysisResults, AnovaResults, ComplianceResults, ComplianceStatus,
    CorrelationResults, DescriptiveStatistics, MultivariateResults, TTestResults, TrendResults,
};
use crate::error::Result;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};

pub const REPORT_TITLE: &str = "Environmental Data Statistical Analysis Report";

// ============================================================================
// Report Types
// ============================================================================

/// One analysis as presented in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub title: String,
    /// One line a reader can take away without opening `content`.
    pub summary: String,
    /// The analysis result exactly as the analyzer produced it.
    pub content: serde_json::Value,
    /// Significant pollutants, trends and non-compliant standards.
    #[serde(default)]
    pub highlights: Vec<String>,
}

/// Report over whichever analyses were supplied, in a fixed section order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalReport {
    pub title: String,
    /// Local time, `%Y-%m-%d %H:%M:%S`.
    pub generated_at: String,
    pub sections: Vec<ReportSection>,
}

impl StatisticalReport {
    pub fn section(&self, title: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|section| section.title == title)
    }
}

// ============================================================================
// Report Generator
// ============================================================================

pub struct ReportGenerator {
    output_dir: PathBuf,
    output_name: Option<String>,
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./reports"),
            output_name: None,
        }
    }
}

impl ReportGenerator {
    /// Create a generator writing into `output_dir`. When `output_name` is
    /// set it replaces the base name passed to
    /// [`write_report_to_file`](Self::write_report_to_file).
    pub fn new(output_dir: PathBuf, output_name: Option<String>) -> Self {
        Self {
            output_dir,
            output_name,
        }
    }

    /// Assemble a report. Analyses that were not run get no section;
    /// analyses that ran but could not compute get a section whose summary
    /// carries the reason.
    pub fn build_report(results: &AnalysisResults) -> Result<StatisticalReport> {
        let mut sections = Vec::new();

        if let Some(analysis) = &results.descriptive {
            sections.push(section("Descriptive Statistics", analysis, describe_descriptive)?);
        }
        if let Some(analysis) = &results.t_test {
            sections.push(section("T-Test Analysis", analysis, describe_t_test)?);
        }
        if let Some(analysis) = &results.anova {
            sections.push(section("ANOVA Analysis", analysis, describe_anova)?);
        }
        if let Some(analysis) = &results.correlation {
            sections.push(section("Correlation Analysis", analysis, describe_correlation)?);
        }
        if let Some(analysis) = &results.trend {
            sections.push(section("Temporal Trend Analysis", analysis, describe_trend)?);
        }
        if let Some(analysis) = &results.compliance {
            sections.push(section(
                "Regulatory Compliance Analysis",
                analysis,
                describe_compliance,
            )?);
        }
        if let Some(analysis) = &results.multivariate {
            sections.push(section("Multivariate Analysis", analysis, describe_multivariate)?);
        }

        debug!("Built report with {} sections", sections.len());

        Ok(StatisticalReport {
            title: REPORT_TITLE.to_string(),
            generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            sections,
        })
    }

    /// Write a report to `{output_dir}/{base}_report.json`.
    pub fn write_report_to_file(
        &self,
        report: &StatisticalReport,
        report_base_name: &str,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;

        let base = self.output_name.as_deref().unwrap_or(report_base_name);
        let report_path = self.output_dir.join(format!("{}_report.json", base));
        let mut file = File::create(&report_path)?;
        file.write_all(serde_json::to_string_pretty(report)?.as_bytes())?;

        info!("Report saved: {}", report_path.display());

        Ok(report_path)
    }
}

type Described = (String, Vec<String>);

fn section<T: Serialize>(
    title: &str,
    analysis: &Analysis<T>,
    describe: fn(&T) -> Described,
) -> Result<ReportSection> {
    let content = serde_json::to_value(analysis)?;
    let (summary, highlights) = match analysis {
        Analysis::Completed(result) => describe(result),
        Analysis::Unavailable { error } => (format!("{} unavailable: {}", title, error), Vec::new()),
    };
    Ok(ReportSection {
        title: title.to_string(),
        summary,
        content,
        highlights,
    })
}

fn describe_descriptive(stats: &DescriptiveStatistics) -> Described {
    let overall = &stats.overall;
    let summary = format!(
        "Analysis of {} readings across {} locations and {} pollutants.",
        overall.total_readings, overall.unique_locations, overall.unique_pollutants
    );

    let mut highlights = vec![format!(
        "Readings span {} to {}",
        overall.date_range.start, overall.date_range.end
    )];
    if let Some((name, pollutant)) = stats
        .by_pollutant
        .iter()
        .max_by(|a, b| a.1.mean.total_cmp(&b.1.mean))
    {
        highlights.push(format!(
            "Highest mean concentration: {} ({:.2})",
            name, pollutant.mean
        ));
    }
    (summary, highlights)
}

fn describe_t_test(results: &TTestResults) -> Described {
    let significant: Vec<String> = results
        .iter()
        .filter(|(_, outcome)| outcome.significant)
        .map(|(name, outcome)| {
            format!(
                "{}: {} (p={:.4}, {} effect)",
                name, outcome.test_type, outcome.p_value, outcome.effect_size
            )
        })
        .collect();
    let summary = format!(
        "Compared two groups across {} pollutants. {} pollutants showed significant differences.",
        results.len(),
        significant.len()
    );
    (summary, significant)
}

fn describe_anova(results: &AnovaResults) -> Described {
    let groups = results
        .values()
        .map(|outcome| outcome.group_stats.len())
        .max()
        .unwrap_or(0);
    let significant: Vec<String> = results
        .iter()
        .filter(|(_, outcome)| outcome.significant)
        .map(|(name, outcome)| {
            format!(
                "{}: differs by {} (p={:.4}, {} effect)",
                name, outcome.factor_name, outcome.p_value, outcome.effect_size
            )
        })
        .collect();
    let summary = format!(
        "Compared {} groups across {} pollutants. {} pollutants showed significant differences.",
        groups,
        results.len(),
        significant.len()
    );
    (summary, significant)
}

fn describe_correlation(results: &CorrelationResults) -> Described {
    let mut highlights: Vec<String> = results
        .pollutant_correlations
        .iter()
        .filter(|(_, pair)| pair.significant && pair.correlation_coefficient.abs() >= 0.7)
        .map(|(name, pair)| format!("{}: {}", name, pair.interpretation))
        .collect();
    for (pollutant, factors) in &results.environmental_correlations {
        for (factor, pair) in factors {
            if pair.significant && pair.correlation_coefficient.abs() >= 0.7 {
                highlights.push(format!(
                    "{} vs {}: {}",
                    pollutant, factor, pair.interpretation
                ));
            }
        }
    }
    (
        "Analysis of relationships between pollutants and environmental factors.".to_string(),
        highlights,
    )
}

fn describe_trend(results: &TrendResults) -> Described {
    let significant: Vec<String> = results
        .iter()
        .filter(|(_, outcome)| outcome.significant_trend)
        .map(|(name, outcome)| {
            format!(
                "{}: {} {} trend (slope={:.4}, p={:.4})",
                name, outcome.trend_direction, outcome.time_period, outcome.slope, outcome.p_value
            )
        })
        .collect();
    let summary = format!(
        "Analyzed temporal trends for {} pollutants. {} pollutants showed significant trends over time.",
        results.len(),
        significant.len()
    );
    (summary, significant)
}

fn describe_compliance(results: &ComplianceResults) -> Described {
    let mut highlights = Vec::new();
    for (pollutant, compliance) in results {
        for (standard, scored) in &compliance.standards {
            if scored.compliance_status == ComplianceStatus::NonCompliant {
                highlights.push(format!(
                    "{} exceeds the {} standard in {} of {} readings ({:.1}%)",
                    pollutant,
                    standard,
                    scored.exceedances,
                    scored.total_measurements,
                    scored.exceedance_rate_percent
                ));
            }
        }
    }
    (
        "Analysis of compliance with WHO, NESREA, and EPA standards.".to_string(),
        highlights,
    )
}

fn describe_multivariate(results: &MultivariateResults) -> Described {
    let summary = format!(
        "Principal component and cluster analysis of {} observations across {} pollutants.",
        results.n_observations,
        results.feature_names.len()
    );

    let mut highlights = Vec::new();
    if let Some(pca) = results.pca.completed() {
        if let Some(first) = pca.explained_variance_ratio.first() {
            highlights.push(format!(
                "First component explains {:.1}% of variance",
                first * 100.0
            ));
        }
        highlights.push(format!(
            "{} components reach 95% cumulative variance",
            pca.n_components_95_variance
        ));
    }
    if let Some(clusters) = results.clustering.completed() {
        highlights.push(format!("{} clusters selected", clusters.optimal_k));
    }
    (summary, highlights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::compliance::assess_compliance;
    use crate::analysis::descriptive::describe;
    use crate::analysis::frame::tests::FrameBuilder;
    use crate::analysis::hypothesis::t_test;
    use crate::analysis::trend::{TimeBucket, analyze_trends};
    use crate::config::AnalysisConfig;
    use crate::types::{Authority, PollutantCategory, PollutantType, RegulatoryStandard};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    // ==================== build_report tests ====================

    #[test]
    fn test_empty_results_give_no_sections() {
        let report = ReportGenerator::build_report(&AnalysisResults::default()).unwrap();
        assert_eq!(report.title, REPORT_TITLE);
        assert!(report.sections.is_empty());
        assert_eq!(report.generated_at.len(), "2024-01-01 00:00:00".len());
    }

    #[test]
    fn test_sections_follow_fixed_order() {
        let no2 = PollutantType::new("NO2", PollutantCategory::Gas, "µg/m³")
            .with_standard(RegulatoryStandard::new(Authority::Who, 25.0));
        let mut builder = FrameBuilder::new().with_pollutant(no2);
        for day in 0..4 {
            builder = builder.reading("A", "NO2", day * 40, 10.0 + 10.0 * day as f64);
        }
        let frame = builder.build();
        let config = AnalysisConfig::default();

        let results = AnalysisResults {
            compliance: Some(assess_compliance(&frame).unwrap()),
            trend: Some(analyze_trends(&frame, TimeBucket::Monthly, None, &config).unwrap()),
            descriptive: Some(describe(&frame).unwrap()),
            ..Default::default()
        };
        let report = ReportGenerator::build_report(&results).unwrap();

        let titles: Vec<&str> = report.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Descriptive Statistics",
                "Temporal Trend Analysis",
                "Regulatory Compliance Analysis"
            ]
        );
        assert_eq!(
            report.sections[0].summary,
            "Analysis of 4 readings across 1 locations and 1 pollutants."
        );
        assert_eq!(
            report.section("Regulatory Compliance Analysis").unwrap().highlights,
            vec!["NO2 exceeds the who standard in 2 of 4 readings (50.0%)".to_string()]
        );
    }

    #[test]
    fn test_unavailable_analysis_becomes_section_with_reason() {
        let results = AnalysisResults {
            t_test: Some(Analysis::unavailable("Insufficient data for t-test analysis")),
            ..Default::default()
        };
        let report = ReportGenerator::build_report(&results).unwrap();

        let section = &report.sections[0];
        assert_eq!(section.title, "T-Test Analysis");
        assert_eq!(
            section.summary,
            "T-Test Analysis unavailable: Insufficient data for t-test analysis"
        );
        assert_eq!(
            section.content,
            serde_json::json!({"error": "Insufficient data for t-test analysis"})
        );
        assert!(section.highlights.is_empty());
    }

    #[test]
    fn test_t_test_summary_counts_significant_pollutants() {
        let first = BTreeMap::from([
            ("NO2".to_string(), vec![10.0, 11.0, 12.0, 10.5, 11.5]),
            ("SO2".to_string(), vec![5.0, 6.0, 7.0]),
        ]);
        let second = BTreeMap::from([
            ("NO2".to_string(), vec![30.0, 31.0, 32.0, 30.5, 31.5]),
            ("SO2".to_string(), vec![5.5, 6.5, 6.0]),
        ]);
        let results = AnalysisResults {
            t_test: Some(t_test(&first, &second, false, &AnalysisConfig::default())),
            ..Default::default()
        };
        let report = ReportGenerator::build_report(&results).unwrap();

        let section = &report.sections[0];
        assert_eq!(
            section.summary,
            "Compared two groups across 2 pollutants. 1 pollutants showed significant differences."
        );
        assert_eq!(section.highlights.len(), 1);
        assert!(section.highlights[0].starts_with("NO2: "));
    }

    // ==================== write_report_to_file tests ====================

    #[test]
    fn test_write_report_to_file() {
        let dir = std::env::temp_dir().join(format!("envirodata-report-{}", uuid::Uuid::new_v4()));
        let generator = ReportGenerator::new(dir.clone(), None);
        let report = ReportGenerator::build_report(&AnalysisResults::default()).unwrap();

        let path = generator.write_report_to_file(&report, "march").unwrap();
        assert_eq!(path, dir.join("march_report.json"));

        let back: StatisticalReport =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, report);

        let named = ReportGenerator::new(dir.clone(), Some("custom".to_string()));
        let path = named.write_report_to_file(&report, "march").unwrap();
        assert_eq!(path, dir.join("custom_report.json"));

        fs::remove_dir_all(&dir).unwrap();
    }
}
