//! Linear trends over time-bucketed means.

use super::Analysis;
use super::distributions::t_two_sided_p;
use super::frame::ReadingFrame;
use crate::config::AnalysisConfig;
use crate::error::{ProcessingError, Result};
use crate::utils::{mean, sample_std};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Granularity of the time buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    Daily,
    Weekly,
    #[default]
    Monthly,
    Quarterly,
    Yearly,
}

impl TimeBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }

    /// Bucket label of a timestamp. Labels sort chronologically within a
    /// granularity: `2024-01-15`, `2024-W03` (ISO week), `2024-01`,
    /// `2024-Q1`, `2024`.
    pub fn label(&self, at: DateTime<Utc>) -> String {
        match self {
            Self::Daily => at.format("%Y-%m-%d").to_string(),
            Self::Weekly => {
                let week = at.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Self::Monthly => at.format("%Y-%m").to_string(),
            Self::Quarterly => format!("{}-Q{}", at.year(), (at.month() - 1) / 3 + 1),
            Self::Yearly => at.year().to_string(),
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeBucket {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "daily" | "day" => Ok(Self::Daily),
            "weekly" | "week" => Ok(Self::Weekly),
            "monthly" | "month" => Ok(Self::Monthly),
            "quarterly" | "quarter" => Ok(Self::Quarterly),
            "yearly" | "year" | "annual" => Ok(Self::Yearly),
            other => Err(ProcessingError::InvalidRequest(format!(
                "Unknown time period '{}'",
                other
            ))),
        }
    }
}

/// Ordinary least squares of values against their index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    /// Absent for a perfect fit with non-zero slope.
    pub t_statistic: Option<f64>,
    pub p_value: f64,
}

/// Fit `y = intercept + slope * i` for `i = 0..n`. Needs two points; with
/// exactly two the slope test is reported as t = 0, p = 1.
pub fn fit_linear_trend(y: &[f64]) -> Option<LinearFit> {
    let n = y.len();
    if n < 2 {
        return None;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(y);

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for (i, value) in y.iter().enumerate() {
        let dx = i as f64 - x_mean;
        let dy = value - y_mean;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    let r_squared = if syy > 0.0 {
        ((sxy * sxy) / (sxx * syy)).clamp(0.0, 1.0)
    } else {
        0.0
    };

    if n == 2 {
        return Some(LinearFit {
            slope,
            intercept,
            r_squared,
            t_statistic: Some(0.0),
            p_value: 1.0,
        });
    }

    let df = (n - 2) as f64;
    let residual_ss = (syy - slope * sxy).max(0.0);
    let slope_se = (residual_ss / df / sxx).sqrt();
    let tolerance = f64::EPSILON * syy.max(1.0) * n as f64;

    let (t_statistic, p_value) = if slope == 0.0 || syy <= tolerance {
        (Some(0.0), 1.0)
    } else if residual_ss <= tolerance {
        (None, 0.0)
    } else {
        let t = slope / slope_se;
        (Some(t), t_two_sided_p(t, df).unwrap_or(1.0))
    };

    Some(LinearFit {
        slope,
        intercept,
        r_squared,
        t_statistic,
        p_value,
    })
}

/// Fit quality label from R² (cutoffs 0.25 / 0.5 / 0.75).
pub fn fit_quality(r_squared: f64) -> &'static str {
    if r_squared < 0.25 {
        "poor"
    } else if r_squared < 0.5 {
        "moderate"
    } else if r_squared < 0.75 {
        "good"
    } else {
        "excellent"
    }
}

fn direction(slope: f64) -> &'static str {
    if slope > 0.0 {
        "increasing"
    } else if slope < 0.0 {
        "decreasing"
    } else {
        "stable"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub period: String,
    pub mean_concentration: f64,
    pub std_concentration: f64,
    pub n_observations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendOutcome {
    pub time_period: TimeBucket,
    pub n_periods: usize,
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub t_statistic: Option<f64>,
    pub p_value: f64,
    pub significant_trend: bool,
    pub trend_direction: String,
    pub model_fit: String,
    pub trend_data: Vec<TrendPoint>,
    pub interpretation: String,
}

/// Bucket each pollutant's readings and fit a trend over the bucket means.
/// Pollutants with fewer buckets than `min_trend_periods` are skipped.
pub fn analyze_trends(
    frame: &ReadingFrame,
    period: TimeBucket,
    pollutant: Option<&str>,
    config: &AnalysisConfig,
) -> Result<Analysis<BTreeMap<String, TrendOutcome>>> {
    if frame.is_empty() {
        return Ok(Analysis::unavailable("No data available for trend analysis"));
    }

    let concentrations = frame.concentrations()?;
    let timestamps = frame.timestamps()?;
    let mut results = BTreeMap::new();

    for (name, rows) in frame.rows_by_pollutant()? {
        if pollutant.is_some_and(|wanted| !wanted.eq_ignore_ascii_case(&name)) {
            continue;
        }

        let mut buckets: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for row in rows {
            let Some(at) = DateTime::<Utc>::from_timestamp_millis(timestamps[row]) else {
                continue;
            };
            buckets.entry(period.label(at)).or_default().push(concentrations[row]);
        }
        if buckets.len() < config.min_trend_periods {
            continue;
        }

        let trend_data: Vec<TrendPoint> = buckets
            .into_iter()
            .map(|(label, values)| TrendPoint {
                period: label,
                mean_concentration: mean(&values),
                std_concentration: sample_std(&values),
                n_observations: values.len(),
            })
            .collect();
        let means: Vec<f64> = trend_data.iter().map(|p| p.mean_concentration).collect();
        let Some(fit) = fit_linear_trend(&means) else {
            continue;
        };

        let significant = fit.p_value < config.significance_level;
        let trend_direction = direction(fit.slope);
        let model_fit = fit_quality(fit.r_squared);
        let interpretation = format!(
            "There is a {} {} trend (p={:.4}) with {} model fit (R²={:.3}).",
            if significant { "significant" } else { "not significant" },
            trend_direction,
            fit.p_value,
            model_fit,
            fit.r_squared
        );

        results.insert(
            name,
            TrendOutcome {
                time_period: period,
                n_periods: trend_data.len(),
                slope: fit.slope,
                intercept: fit.intercept,
                r_squared: fit.r_squared,
                t_statistic: fit.t_statistic,
                p_value: fit.p_value,
                significant_trend: significant,
                trend_direction: trend_direction.to_string(),
                model_fit: model_fit.to_string(),
                trend_data,
                interpretation,
            },
        );
    }

    if results.is_empty() {
        return Ok(Analysis::unavailable(format!(
            "No pollutant has at least {} {} periods of data",
            config.min_trend_periods, period
        )));
    }
    Ok(Analysis::Completed(results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::frame::tests::FrameBuilder;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bucket_labels() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap();
        assert_eq!(TimeBucket::Daily.label(at), "2024-01-15");
        assert_eq!(TimeBucket::Weekly.label(at), "2024-W03");
        assert_eq!(TimeBucket::Monthly.label(at), "2024-01");
        assert_eq!(TimeBucket::Quarterly.label(at), "2024-Q1");
        assert_eq!(TimeBucket::Yearly.label(at), "2024");

        // ISO week of 2024-12-30 belongs to 2025
        let year_end = Utc.with_ymd_and_hms(2024, 12, 30, 0, 0, 0).unwrap();
        assert_eq!(TimeBucket::Weekly.label(year_end), "2025-W01");
        assert_eq!(TimeBucket::Quarterly.label(year_end), "2024-Q4");
    }

    #[test]
    fn test_bucket_from_str() {
        assert_eq!("Weekly".parse::<TimeBucket>().unwrap(), TimeBucket::Weekly);
        assert_eq!("year".parse::<TimeBucket>().unwrap(), TimeBucket::Yearly);
        assert!("hourly".parse::<TimeBucket>().is_err());
    }

    #[test]
    fn test_fit_noisy_line() {
        let fit = fit_linear_trend(&[1.0, 3.0, 2.0, 5.0, 4.0]).unwrap();
        assert!((fit.slope - 0.8).abs() < 1e-12);
        assert!((fit.intercept - 1.4).abs() < 1e-12);
        assert!((fit.r_squared - 0.64).abs() < 1e-12);
        let t = fit.t_statistic.unwrap();
        assert!((t - 2.309_401).abs() < 1e-5, "t = {}", t);
        assert!((fit.p_value - 0.104_088).abs() < 1e-4);
    }

    #[test]
    fn test_fit_edge_cases() {
        assert_eq!(fit_linear_trend(&[1.0]), None);

        let two = fit_linear_trend(&[1.0, 3.0]).unwrap();
        assert_eq!(two.slope, 2.0);
        assert_eq!(two.t_statistic, Some(0.0));
        assert_eq!(two.p_value, 1.0);

        let flat = fit_linear_trend(&[2.0, 2.0, 2.0]).unwrap();
        assert_eq!(flat.slope, 0.0);
        assert_eq!(flat.r_squared, 0.0);
        assert_eq!(flat.p_value, 1.0);

        let perfect = fit_linear_trend(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(perfect.t_statistic, None);
        assert_eq!(perfect.p_value, 0.0);
        assert_eq!(perfect.r_squared, 1.0);
    }

    #[test]
    fn test_fit_quality_labels() {
        assert_eq!(fit_quality(0.1), "poor");
        assert_eq!(fit_quality(0.3), "moderate");
        assert_eq!(fit_quality(0.6), "good");
        assert_eq!(fit_quality(0.9), "excellent");
    }

    #[test]
    fn test_daily_trend_per_pollutant() {
        let mut builder = FrameBuilder::new();
        for day in 0..6u32 {
            builder = builder
                .reading("A", "NO2", day, 10.0 + 2.0 * day as f64)
                .reading("B", "NO2", day, 12.0 + 2.0 * day as f64);
        }
        // only two days of SO2
        builder = builder.reading("A", "SO2", 0, 1.0).reading("A", "SO2", 1, 2.0);
        let frame = builder.build();

        let results = analyze_trends(&frame, TimeBucket::Daily, None, &AnalysisConfig::default())
            .unwrap()
            .into_completed()
            .unwrap();
        assert_eq!(results.keys().collect::<Vec<_>>(), vec!["NO2"]);

        let no2 = &results["NO2"];
        assert_eq!(no2.n_periods, 6);
        assert_eq!(no2.slope, 2.0);
        assert_eq!(no2.trend_direction, "increasing");
        assert!(no2.significant_trend);
        assert_eq!(no2.trend_data[0].period, "2024-01-01");
        assert_eq!(no2.trend_data[0].mean_concentration, 11.0);
        assert_eq!(no2.trend_data[0].n_observations, 2);
        assert!((no2.trend_data[0].std_concentration - 2.0_f64.sqrt()).abs() < 1e-12);
        assert!(no2.interpretation.starts_with("There is a significant increasing trend"));
    }

    #[test]
    fn test_trend_unavailable_when_too_few_periods() {
        let frame = FrameBuilder::new()
            .reading("A", "NO2", 0, 1.0)
            .reading("A", "NO2", 3, 2.0)
            .build();
        let result =
            analyze_trends(&frame, TimeBucket::Monthly, None, &AnalysisConfig::default()).unwrap();
        assert_eq!(
            result.error(),
            Some("No pollutant has at least 3 monthly periods of data")
        );
    }

    #[test]
    fn test_trend_pollutant_selection() {
        let mut builder = FrameBuilder::new();
        for day in 0..4u32 {
            builder = builder
                .reading("A", "NO2", day, day as f64)
                .reading("A", "SO2", day, 1.0);
        }
        let frame = builder.build();
        let results = analyze_trends(
            &frame,
            TimeBucket::Daily,
            Some("so2"),
            &AnalysisConfig::default(),
        )
        .unwrap()
        .into_completed()
        .unwrap();
        assert_eq!(results.keys().collect::<Vec<_>>(), vec!["SO2"]);
        assert_eq!(results["SO2"].trend_direction, "stable");
    }
}
