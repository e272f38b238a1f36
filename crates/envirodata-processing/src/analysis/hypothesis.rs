//! Two-group and multi-group comparisons of pollutant concentrations.

use super::Analysis;
use super::distributions::{f_upper_p, studentized_range_p, t_two_sided_p};
use crate::config::AnalysisConfig;
use crate::utils::{mean, quantile_sorted, sample_std, sample_variance, sorted};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// Concentrations of one group, keyed by pollutant name.
pub type GroupValues = BTreeMap<String, Vec<f64>>;

// =============================================================================
// Effect sizes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectSize {
    Negligible,
    Small,
    Medium,
    Large,
}

impl EffectSize {
    /// Label for Cohen's d (cutoffs 0.2 / 0.5 / 0.8 on |d|).
    pub fn from_cohens_d(d: f64) -> Self {
        Self::from_cutoffs(d.abs(), [0.2, 0.5, 0.8])
    }

    /// Label for eta-squared (cutoffs 0.01 / 0.06 / 0.14).
    pub fn from_eta_squared(eta: f64) -> Self {
        Self::from_cutoffs(eta, [0.01, 0.06, 0.14])
    }

    fn from_cutoffs(value: f64, [small, medium, large]: [f64; 3]) -> Self {
        if value < small {
            Self::Negligible
        } else if value < medium {
            Self::Small
        } else if value < large {
            Self::Medium
        } else {
            Self::Large
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Negligible => "negligible",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

impl fmt::Display for EffectSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn significance_word(significant: bool) -> &'static str {
    if significant {
        "significant"
    } else {
        "not significant"
    }
}

// =============================================================================
// Variance homogeneity
// =============================================================================

/// Brown-Forsythe test for equal variances (Levene's test centred on the
/// median). Returns `(statistic, p_value)`, or `None` when the test is
/// undefined, e.g. a group with fewer than two values or zero spread of
/// the absolute deviations.
pub fn brown_forsythe<G: AsRef<[f64]>>(groups: &[G]) -> Option<(f64, f64)> {
    if groups.len() < 2 || groups.iter().any(|group| group.as_ref().len() < 2) {
        return None;
    }

    let deviations: Vec<Vec<f64>> = groups
        .iter()
        .map(|group| {
            let group = group.as_ref();
            let median = quantile_sorted(&sorted(group), 0.5);
            group.iter().map(|value| (value - median).abs()).collect()
        })
        .collect();

    let n_total: usize = deviations.iter().map(Vec::len).sum();
    let k = groups.len();
    if n_total <= k {
        return None;
    }

    let z_means: Vec<f64> = deviations.iter().map(|values| mean(values)).collect();
    let z_grand_mean = deviations.iter().flatten().sum::<f64>() / n_total as f64;

    let ss_between: f64 = deviations
        .iter()
        .zip(&z_means)
        .map(|(values, &m)| values.len() as f64 * (m - z_grand_mean).powi(2))
        .sum();
    let ss_within: f64 = deviations
        .iter()
        .zip(&z_means)
        .map(|(values, &m)| values.iter().map(|z| (z - m).powi(2)).sum::<f64>())
        .sum();

    let df1 = (k - 1) as f64;
    let df2 = (n_total - k) as f64;
    let ms_within = ss_within / df2;
    if !ms_within.is_finite() || ms_within <= 0.0 {
        return None;
    }

    let statistic = (ss_between / df1) / ms_within;
    let p_value = f_upper_p(statistic, df1, df2)?;
    Some((statistic, p_value))
}

// =============================================================================
// t-test
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TTestKind {
    EqualVariances,
    UnequalVariances,
    Paired,
}

impl TTestKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::EqualVariances => "Independent t-test (equal variances)",
            Self::UnequalVariances => "Independent t-test (unequal variances)",
            Self::Paired => "Paired t-test",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub n: usize,
    pub mean: f64,
    pub std: f64,
}

impl GroupStats {
    fn of(values: &[f64]) -> Self {
        Self {
            n: values.len(),
            mean: mean(values),
            std: sample_std(values),
        }
    }
}

/// t-test outcome for one pollutant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TTestOutcome {
    pub test_type: String,
    pub kind: TTestKind,
    pub group1_stats: GroupStats,
    pub group2_stats: GroupStats,
    /// Absent when the standard error is zero but the means differ.
    pub t_statistic: Option<f64>,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
    /// p-value of the variance-homogeneity pre-test, if it could be run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variance_test_p_value: Option<f64>,
    pub cohens_d: f64,
    pub effect_size: EffectSize,
    pub significant: bool,
    pub interpretation: String,
}

/// Raw t statistic, degrees of freedom and p-value.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TStatistic {
    t: Option<f64>,
    df: f64,
    p: f64,
}

/// Turn a mean difference and standard error into a statistic. A zero
/// standard error gives t = 0, p = 1 for equal means and an undefined t
/// with p = 0 otherwise.
fn t_from(diff: f64, se: f64, df: f64) -> TStatistic {
    if !(se > 0.0) || !se.is_finite() {
        if diff.abs() <= f64::EPSILON * 8.0 {
            return TStatistic { t: Some(0.0), df, p: 1.0 };
        }
        return TStatistic { t: None, df, p: 0.0 };
    }
    let t = diff / se;
    TStatistic {
        t: Some(t),
        df,
        p: t_two_sided_p(t, df).unwrap_or(1.0),
    }
}

fn pooled_t(a: &[f64], b: &[f64]) -> TStatistic {
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let df = n1 + n2 - 2.0;
    let pooled = ((n1 - 1.0) * sample_variance(a) + (n2 - 1.0) * sample_variance(b)) / df;
    let se = (pooled * (1.0 / n1 + 1.0 / n2)).sqrt();
    t_from(mean(a) - mean(b), se, df)
}

fn welch_t(a: &[f64], b: &[f64]) -> TStatistic {
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let v1 = sample_variance(a) / n1;
    let v2 = sample_variance(b) / n2;
    let se = (v1 + v2).sqrt();
    let denom = v1.powi(2) / (n1 - 1.0) + v2.powi(2) / (n2 - 1.0);
    let df = if denom > 0.0 {
        (v1 + v2).powi(2) / denom
    } else {
        n1 + n2 - 2.0
    };
    t_from(mean(a) - mean(b), se, df)
}

fn paired_t(a: &[f64], b: &[f64]) -> TStatistic {
    let diffs: Vec<f64> = a.iter().zip(b).map(|(x, y)| x - y).collect();
    let n = diffs.len() as f64;
    let se = sample_std(&diffs) / n.sqrt();
    t_from(mean(&diffs), se, n - 1.0)
}

/// Cohen's d with the pooled standard deviation; zero when that is zero.
pub fn cohens_d(a: &[f64], b: &[f64]) -> f64 {
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    if n1 + n2 <= 2.0 {
        return 0.0;
    }
    let pooled_std = (((n1 - 1.0) * sample_variance(a) + (n2 - 1.0) * sample_variance(b))
        / (n1 + n2 - 2.0))
        .sqrt();
    if pooled_std > 0.0 {
        (mean(a) - mean(b)) / pooled_std
    } else {
        0.0
    }
}

/// Compare two groups for a single pollutant. Both groups need at least two
/// values.
pub fn compare_two_groups(
    a: &[f64],
    b: &[f64],
    paired: bool,
    config: &AnalysisConfig,
) -> Option<TTestOutcome> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }

    let (kind, stat, variance_test_p_value) = if paired {
        let len = a.len().min(b.len());
        (TTestKind::Paired, paired_t(&a[..len], &b[..len]), None)
    } else {
        let homogeneity = brown_forsythe(&[a, b]).map(|(_, p)| p);
        // An undefined pre-test counts as unequal variances.
        if homogeneity.is_some_and(|p| p > config.variance_test_alpha) {
            (TTestKind::EqualVariances, pooled_t(a, b), homogeneity)
        } else {
            (TTestKind::UnequalVariances, welch_t(a, b), homogeneity)
        }
    };

    let group1_stats = GroupStats::of(a);
    let group2_stats = GroupStats::of(b);
    let d = cohens_d(a, b);
    let effect_size = EffectSize::from_cohens_d(d);
    let significant = stat.p < config.significance_level;
    let direction = if group1_stats.mean > group2_stats.mean {
        "higher"
    } else {
        "lower"
    };

    Some(TTestOutcome {
        test_type: kind.display_name().to_string(),
        kind,
        group1_stats,
        group2_stats,
        t_statistic: stat.t,
        degrees_of_freedom: stat.df,
        p_value: stat.p,
        variance_test_p_value,
        cohens_d: d,
        effect_size,
        significant,
        interpretation: format!(
            "The difference is {} (p={:.4}) with a {} effect size (d={:.3}). Group 1 has {} concentrations than Group 2.",
            significance_word(significant),
            stat.p,
            effect_size,
            d,
            direction
        ),
    })
}

/// t-tests for every pollutant present in both groups.
pub fn t_test(
    group1: &GroupValues,
    group2: &GroupValues,
    paired: bool,
    config: &AnalysisConfig,
) -> Analysis<BTreeMap<String, TTestOutcome>> {
    if group1.is_empty() || group2.is_empty() {
        return Analysis::unavailable("Insufficient data for t-test analysis");
    }

    let results: BTreeMap<String, TTestOutcome> = group1
        .iter()
        .filter_map(|(pollutant, a)| {
            let b = group2.get(pollutant)?;
            let outcome = compare_two_groups(a, b, paired, config);
            if outcome.is_none() {
                debug!("Skipping t-test for {}: fewer than 2 values in a group", pollutant);
            }
            outcome.map(|outcome| (pollutant.clone(), outcome))
        })
        .collect();

    if results.is_empty() {
        return Analysis::unavailable(
            "No pollutant has at least 2 observations in both groups",
        );
    }
    Analysis::Completed(results)
}

// =============================================================================
// ANOVA
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnovaGroupStats {
    pub group_name: String,
    pub n: usize,
    pub mean: f64,
    pub std: f64,
}

/// One pairwise Tukey-Kramer comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostHocComparison {
    pub group1: String,
    pub group2: String,
    pub mean_difference: f64,
    pub p_value: f64,
    pub significant: bool,
}

/// One-way ANOVA outcome for one pollutant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnovaOutcome {
    pub test_type: String,
    pub factor_name: String,
    pub group_stats: Vec<AnovaGroupStats>,
    /// Absent when within-group variance is zero but the means differ.
    pub f_statistic: Option<f64>,
    pub df_between: f64,
    pub df_within: f64,
    pub p_value: f64,
    pub eta_squared: f64,
    pub effect_size: EffectSize,
    pub significant: bool,
    pub interpretation: String,
    /// Pairwise comparisons, run when significant with more than two groups.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_hoc: Vec<PostHocComparison>,
    /// Why the post-hoc comparison produced no rows, when it was attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_hoc_error: Option<String>,
}

/// Tukey-Kramer comparison of every pair of groups.
pub fn tukey_hsd(
    names: &[String],
    groups: &[&[f64]],
    alpha: f64,
) -> Result<Vec<PostHocComparison>, String> {
    let k = groups.len();
    let n_total: usize = groups.iter().map(|group| group.len()).sum();
    if k < 2 || n_total <= k {
        return Err("Not enough observations for pairwise comparison".to_string());
    }

    let df = (n_total - k) as f64;
    let ss_within: f64 = groups
        .iter()
        .map(|group| {
            let m = mean(group);
            group.iter().map(|v| (v - m).powi(2)).sum::<f64>()
        })
        .sum();
    let mse = ss_within / df;
    if !(mse > 0.0) {
        return Err("Within-group variance is zero".to_string());
    }

    let mut comparisons = Vec::with_capacity(k * (k - 1) / 2);
    for i in 0..k {
        for j in (i + 1)..k {
            let diff = mean(groups[i]) - mean(groups[j]);
            let se = (mse / 2.0 * (1.0 / groups[i].len() as f64 + 1.0 / groups[j].len() as f64))
                .sqrt();
            let q = diff.abs() / se;
            let p_value = studentized_range_p(q, k, df).ok_or_else(|| {
                format!("Studentized range distribution undefined for df={}", df)
            })?;
            comparisons.push(PostHocComparison {
                group1: names[i].clone(),
                group2: names[j].clone(),
                mean_difference: diff,
                p_value,
                significant: p_value < alpha,
            });
        }
    }
    Ok(comparisons)
}

/// One-way ANOVA over already extracted groups. Needs at least two groups.
pub fn one_way_anova(
    names: &[String],
    groups: &[&[f64]],
    factor_name: &str,
    config: &AnalysisConfig,
) -> Option<AnovaOutcome> {
    let k = groups.len();
    if k < 2 {
        return None;
    }

    let all: Vec<f64> = groups.iter().flat_map(|group| group.iter().copied()).collect();
    let n_total = all.len();
    if n_total <= k {
        return None;
    }
    let grand_mean = mean(&all);
    let ss_total: f64 = all.iter().map(|v| (v - grand_mean).powi(2)).sum();
    let ss_between: f64 = groups
        .iter()
        .map(|group| group.len() as f64 * (mean(group) - grand_mean).powi(2))
        .sum();
    let ss_within = (ss_total - ss_between).max(0.0);

    let df_between = (k - 1) as f64;
    let df_within = (n_total - k) as f64;
    let ms_between = ss_between / df_between;
    let ms_within = ss_within / df_within;

    let scale = ss_total.max(1.0) * f64::EPSILON * n_total as f64;
    let (f_statistic, p_value) = if ms_within > scale {
        let f = ms_between / ms_within;
        (Some(f), f_upper_p(f, df_between, df_within).unwrap_or(1.0))
    } else if ss_between > scale {
        (None, 0.0)
    } else {
        (Some(0.0), 1.0)
    };

    let eta_squared = if ss_total > 0.0 {
        ss_between / ss_total
    } else {
        0.0
    };
    let effect_size = EffectSize::from_eta_squared(eta_squared);
    let significant = p_value < config.significance_level;

    let (post_hoc, post_hoc_error) = if significant && k > 2 {
        match tukey_hsd(names, groups, config.significance_level) {
            Ok(rows) => (rows, None),
            Err(reason) => {
                debug!("Post-hoc comparison skipped: {}", reason);
                (Vec::new(), Some(reason))
            }
        }
    } else {
        (Vec::new(), None)
    };

    Some(AnovaOutcome {
        test_type: "One-way ANOVA".to_string(),
        factor_name: factor_name.to_string(),
        group_stats: names
            .iter()
            .zip(groups)
            .map(|(name, group)| AnovaGroupStats {
                group_name: name.clone(),
                n: group.len(),
                mean: mean(group),
                std: sample_std(group),
            })
            .collect(),
        f_statistic,
        df_between,
        df_within,
        p_value,
        eta_squared,
        effect_size,
        significant,
        interpretation: format!(
            "The difference between {} groups is {} (p={:.4}) with a {} effect size (η²={:.3}).",
            k,
            significance_word(significant),
            p_value,
            effect_size,
            eta_squared
        ),
        post_hoc,
        post_hoc_error,
    })
}

/// ANOVA for every pollutant present in all non-empty groups. Within a
/// pollutant, groups with fewer than two values sit out.
pub fn anova(
    groups: &[(String, GroupValues)],
    factor_name: &str,
    config: &AnalysisConfig,
) -> Analysis<BTreeMap<String, AnovaOutcome>> {
    let populated: Vec<&(String, GroupValues)> =
        groups.iter().filter(|(_, values)| !values.is_empty()).collect();
    if populated.len() < 2 {
        return Analysis::unavailable("Need at least 2 groups for ANOVA analysis");
    }

    let mut common: BTreeSet<&String> = populated[0].1.keys().collect();
    for (_, values) in &populated[1..] {
        common.retain(|pollutant| values.contains_key(*pollutant));
    }

    let mut results = BTreeMap::new();
    for pollutant in common {
        let (names, samples): (Vec<String>, Vec<&[f64]>) = populated
            .iter()
            .filter_map(|(name, values)| {
                let sample = values.get(pollutant)?;
                (sample.len() >= 2).then(|| (name.clone(), sample.as_slice()))
            })
            .unzip();

        if let Some(outcome) = one_way_anova(&names, &samples, factor_name, config) {
            results.insert(pollutant.clone(), outcome);
        }
    }

    if results.is_empty() {
        return Analysis::unavailable(
            "No pollutant has at least 2 observations in at least 2 groups",
        );
    }
    Analysis::Completed(results)
}
