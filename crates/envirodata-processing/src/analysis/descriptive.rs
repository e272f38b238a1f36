//! Descriptive statistics: overall, per pollutant and per location.

use super::Analysis;
use super::frame::{LOCATION, POLLUTANT, ReadingFrame};
use crate::error::Result;
use crate::utils::{mean, quantile_sorted, sample_std, sorted};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallSummary {
    pub total_readings: usize,
    pub unique_locations: usize,
    pub unique_pollutants: usize,
    pub date_range: DateRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollutantSummary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub q25: f64,
    pub q75: f64,
    pub skewness: f64,
    pub kurtosis: f64,
}

/// Concentration summary across every pollutant measured at one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSummary {
    #[serde(flatten)]
    pub concentration: PollutantSummary,
    /// Pollutant names, sorted.
    pub pollutants_measured: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptiveStatistics {
    pub overall: OverallSummary,
    pub by_pollutant: BTreeMap<String, PollutantSummary>,
    pub by_location: BTreeMap<String, LocationSummary>,
}

/// Bias-corrected sample skewness (G1). Zero below three values or when
/// the values are constant.
pub fn skewness(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 3 {
        return 0.0;
    }
    let m = mean(values);
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
    if m2 <= (f64::EPSILON * m.abs().max(1.0)).powi(2) {
        return 0.0;
    }
    let m3 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / n;
    let g1 = m3 / m2.powf(1.5);
    (n * (n - 1.0)).sqrt() / (n - 2.0) * g1
}

/// Bias-corrected excess kurtosis (G2). Zero below four values or when the
/// values are constant.
pub fn excess_kurtosis(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 4 {
        return 0.0;
    }
    let m = mean(values);
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
    if m2 <= (f64::EPSILON * m.abs().max(1.0)).powi(2) {
        return 0.0;
    }
    let m4 = values.iter().map(|v| (v - m).powi(4)).sum::<f64>() / n;
    let g2 = m4 / (m2 * m2) - 3.0;
    ((n + 1.0) * g2 + 6.0) * (n - 1.0) / ((n - 2.0) * (n - 3.0))
}

fn summarize(values: &[f64]) -> PollutantSummary {
    let ordered = sorted(values);
    PollutantSummary {
        count: values.len(),
        mean: mean(values),
        median: quantile_sorted(&ordered, 0.5),
        std: sample_std(values),
        min: ordered.first().copied().unwrap_or(0.0),
        max: ordered.last().copied().unwrap_or(0.0),
        q25: quantile_sorted(&ordered, 0.25),
        q75: quantile_sorted(&ordered, 0.75),
        skewness: skewness(values),
        kurtosis: excess_kurtosis(values),
    }
}

fn format_day(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Summaries of the whole frame.
pub fn describe(frame: &ReadingFrame) -> Result<Analysis<DescriptiveStatistics>> {
    if frame.is_empty() {
        return Ok(Analysis::unavailable("No data available for analysis"));
    }

    let timestamps = frame.timestamps()?;
    let start = timestamps.iter().min().copied().unwrap_or_default();
    let end = timestamps.iter().max().copied().unwrap_or_default();

    let by_pollutant: BTreeMap<String, PollutantSummary> = frame
        .values_by_pollutant()?
        .into_iter()
        .map(|(name, values)| (name, summarize(&values)))
        .collect();

    let mut pollutants_at: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (location, pollutant) in frame
        .strings(LOCATION)?
        .into_iter()
        .zip(frame.strings(POLLUTANT)?)
    {
        pollutants_at.entry(location).or_default().insert(pollutant);
    }

    let by_location: BTreeMap<String, LocationSummary> = frame
        .group_values(LOCATION)?
        .into_iter()
        .map(|(name, values)| {
            let summary = LocationSummary {
                concentration: summarize(&values),
                pollutants_measured: pollutants_at
                    .remove(&name)
                    .map(|names| names.into_iter().collect())
                    .unwrap_or_default(),
            };
            (name, summary)
        })
        .collect();

    Ok(Analysis::Completed(DescriptiveStatistics {
        overall: OverallSummary {
            total_readings: frame.len(),
            unique_locations: by_location.len(),
            unique_pollutants: by_pollutant.len(),
            date_range: DateRange {
                start: format_day(start),
                end: format_day(end),
            },
        },
        by_pollutant,
        by_location,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::frame::tests::FrameBuilder;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_skewness_matches_adjusted_estimator() {
        // [1, 2, 3, 10]: g1 = 45 / 12.5^1.5, G1 = sqrt(12) / 2 * g1
        let value = skewness(&[1.0, 2.0, 3.0, 10.0]);
        assert!((value - 1.763_632).abs() < 1e-5, "skewness = {}", value);
        assert_eq!(skewness(&[1.0, 2.0]), 0.0);
        assert_eq!(skewness(&[4.0, 4.0, 4.0]), 0.0);
    }

    #[test]
    fn test_kurtosis_matches_adjusted_estimator() {
        let value = excess_kurtosis(&[1.0, 2.0, 3.0, 10.0]);
        assert!((value - 3.228).abs() < 1e-5, "kurtosis = {}", value);
        assert_eq!(excess_kurtosis(&[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn test_describe_empty_frame() {
        let frame = FrameBuilder::new().build();
        let result = describe(&frame).unwrap();
        assert_eq!(result.error(), Some("No data available for analysis"));
    }

    #[test]
    fn test_describe_breakdowns() {
        let frame = FrameBuilder::new()
            .reading("Site A", "NO2", 0, 10.0)
            .reading("Site A", "NO2", 1, 20.0)
            .reading("Site A", "PM2.5", 1, 30.0)
            .reading("Site B", "NO2", 9, 40.0)
            .build();

        let stats = describe(&frame).unwrap().into_completed().unwrap();
        assert_eq!(stats.overall.total_readings, 4);
        assert_eq!(stats.overall.unique_locations, 2);
        assert_eq!(stats.overall.unique_pollutants, 2);
        assert_eq!(
            stats.overall.date_range,
            DateRange {
                start: "2024-01-01".to_string(),
                end: "2024-01-10".to_string(),
            }
        );

        let no2 = &stats.by_pollutant["NO2"];
        assert_eq!(no2.count, 3);
        assert_eq!(no2.mean, 70.0 / 3.0);
        assert_eq!(no2.median, 20.0);
        assert_eq!(no2.min, 10.0);
        assert_eq!(no2.max, 40.0);
        assert_eq!(no2.q25, 15.0);
        assert_eq!(no2.q75, 30.0);

        let pm = &stats.by_pollutant["PM2.5"];
        assert_eq!(pm.std, 0.0);
        assert_eq!(pm.skewness, 0.0);

        let site_a = &stats.by_location["Site A"];
        assert_eq!(site_a.concentration.count, 3);
        assert_eq!(site_a.concentration.min, 10.0);
        assert_eq!(site_a.concentration.max, 30.0);
        assert_eq!(site_a.concentration.q25, 15.0);
        assert_eq!(site_a.concentration.q75, 25.0);
        assert_eq!(site_a.concentration.skewness, 0.0);
        assert_eq!(site_a.concentration.kurtosis, 0.0);
        assert_eq!(
            site_a.pollutants_measured,
            vec!["NO2".to_string(), "PM2.5".to_string()]
        );
        assert_eq!(
            stats.by_location["Site B"].pollutants_measured,
            vec!["NO2".to_string()]
        );
    }

    #[test]
    fn test_location_summary_serializes_flat() {
        let frame = FrameBuilder::new()
            .reading("Site A", "NO2", 0, 10.0)
            .reading("Site A", "PM2.5", 1, 30.0)
            .build();

        let stats = describe(&frame).unwrap().into_completed().unwrap();
        let json = serde_json::to_value(&stats.by_location["Site A"]).unwrap();
        for key in ["count", "mean", "median", "std", "min", "max", "q25", "q75", "skewness", "kurtosis"] {
            assert!(json.get(key).is_some(), "missing key {}", key);
        }
        assert_eq!(json["pollutants_measured"], serde_json::json!(["NO2", "PM2.5"]));
    }
}
