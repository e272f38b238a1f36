//! Pearson correlation between pollutants and against meteorology.

use super::Analysis;
use super::distributions::t_two_sided_p;
use super::frame::{COVARIATES, ReadingFrame};
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::utils::mean;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Strength label for |r| (cutoffs 0.1 / 0.3 / 0.5 / 0.7).
pub fn strength_label(r: f64) -> &'static str {
    let r = r.abs();
    if r < 0.1 {
        "negligible"
    } else if r < 0.3 {
        "weak"
    } else if r < 0.5 {
        "moderate"
    } else if r < 0.7 {
        "strong"
    } else {
        "very strong"
    }
}

/// Pearson's r and its two-sided p-value. `None` below three pairs or when
/// either side has zero variance.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let n = x.len().min(y.len());
    if n < 3 {
        return None;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let (mx, my) = (mean(x), mean(y));

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if !(sxx > 0.0 && syy > 0.0) {
        return None;
    }

    let r = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);
    let df = (n - 2) as f64;
    if 1.0 - r.abs() < 1e-12 {
        return Some((r, 0.0));
    }
    let t = r * (df / (1.0 - r * r)).sqrt();
    Some((r, t_two_sided_p(t, df).unwrap_or(1.0)))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationPair {
    pub correlation_coefficient: f64,
    pub p_value: f64,
    pub n_observations: usize,
    pub significant: bool,
    pub strength: String,
    pub interpretation: String,
}

impl CorrelationPair {
    fn new(r: f64, p_value: f64, n_observations: usize, config: &AnalysisConfig) -> Self {
        let significant = p_value < config.significance_level;
        let strength = strength_label(r);
        let direction = if r >= 0.0 { "positive" } else { "negative" };
        Self {
            correlation_coefficient: r,
            p_value,
            n_observations,
            significant,
            strength: strength.to_string(),
            interpretation: format!(
                "{} {} correlation (r={:.3}, p={:.4}){}",
                capitalize(strength),
                direction,
                r,
                p_value,
                if significant { "" } else { ", not significant" }
            ),
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Keep only positions where both sides have a value.
fn complete_pairs(x: &[Option<f64>], y: &[Option<f64>]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y)
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .unzip()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CorrelationResults {
    /// Keyed `"{a}_vs_{b}"` with `a` before `b` in name order.
    pub pollutant_correlations: BTreeMap<String, CorrelationPair>,
    /// Pollutant, then covariate name.
    pub environmental_correlations: BTreeMap<String, BTreeMap<String, CorrelationPair>>,
}

/// Pairwise pollutant correlations over the (location, timestamp) pivot,
/// plus each pollutant against each meteorological covariate.
pub fn correlate(
    frame: &ReadingFrame,
    config: &AnalysisConfig,
) -> Result<Analysis<CorrelationResults>> {
    if frame.is_empty() {
        return Ok(Analysis::unavailable(
            "No data available for correlation analysis",
        ));
    }

    let mut results = CorrelationResults::default();

    let pivot = frame.pivot()?;
    let columns: Vec<Vec<Option<f64>>> = (0..pivot.pollutants.len())
        .map(|idx| pivot.column(idx))
        .collect();
    for i in 0..columns.len() {
        for j in (i + 1)..columns.len() {
            let (x, y) = complete_pairs(&columns[i], &columns[j]);
            if let Some((r, p)) = pearson(&x, &y) {
                results.pollutant_correlations.insert(
                    format!("{}_vs_{}", pivot.pollutants[i], pivot.pollutants[j]),
                    CorrelationPair::new(r, p, x.len(), config),
                );
            }
        }
    }

    let concentrations = frame.concentrations()?;
    let covariates: Vec<(&str, Vec<Option<f64>>)> = COVARIATES
        .iter()
        .map(|name| Ok((*name, frame.covariate(name)?)))
        .collect::<Result<_>>()?;

    for (pollutant, rows) in frame.rows_by_pollutant()? {
        let values: Vec<Option<f64>> = rows.iter().map(|&row| Some(concentrations[row])).collect();
        let mut factors = BTreeMap::new();
        for (name, covariate) in &covariates {
            let column: Vec<Option<f64>> = rows.iter().map(|&row| covariate[row]).collect();
            let (x, y) = complete_pairs(&values, &column);
            if let Some((r, p)) = pearson(&x, &y) {
                factors.insert(name.to_string(), CorrelationPair::new(r, p, x.len(), config));
            }
        }
        if !factors.is_empty() {
            results.environmental_correlations.insert(pollutant, factors);
        }
    }

    Ok(Analysis::Completed(results))
}
