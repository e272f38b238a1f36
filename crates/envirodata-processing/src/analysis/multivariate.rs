//! Principal components and k-means clustering over the pollutant pivot.
//!
//! Rows are (location, timestamp) pairs, columns are pollutants. Missing
//! cells are filled with zero and every column is standardized before
//! either method runs.

use super::Analysis;
use super::frame::ReadingFrame;
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::utils::cmp_f64;
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaResult {
    pub explained_variance_ratio: Vec<f64>,
    pub cumulative_variance: Vec<f64>,
    /// One row per component, one loading per feature.
    pub components: Vec<Vec<f64>>,
    pub feature_names: Vec<String>,
    pub n_components_95_variance: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResult {
    pub optimal_k: usize,
    /// Centers in standardized units.
    pub cluster_centers: Vec<Vec<f64>>,
    pub cluster_labels: Vec<usize>,
    pub inertia: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultivariateResults {
    pub n_observations: usize,
    pub feature_names: Vec<String>,
    pub pca: Analysis<PcaResult>,
    pub clustering: Analysis<ClusterResult>,
}

// =============================================================================
// Preprocessing
// =============================================================================

/// Center each column and divide by its population standard deviation.
/// Constant columns are only centered.
pub fn standardize(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let Some(width) = rows.first().map(Vec::len) else {
        return Vec::new();
    };
    let n = rows.len() as f64;

    let mut means = vec![0.0; width];
    for row in rows {
        for (m, value) in means.iter_mut().zip(row) {
            *m += value / n;
        }
    }
    let mut scales = vec![0.0; width];
    for row in rows {
        for ((s, value), m) in scales.iter_mut().zip(row).zip(&means) {
            *s += (value - m).powi(2) / n;
        }
    }
    for s in &mut scales {
        *s = if *s > 0.0 { s.sqrt() } else { 1.0 };
    }

    rows.iter()
        .map(|row| {
            row.iter()
                .zip(&means)
                .zip(&scales)
                .map(|((value, m), s)| (value - m) / s)
                .collect()
        })
        .collect()
}

// =============================================================================
// PCA
// =============================================================================

/// PCA of already standardized rows via the eigen decomposition of the
/// sample covariance matrix. Each component's largest loading is positive.
pub fn principal_components(
    rows: &[Vec<f64>],
    feature_names: &[String],
    variance_target: f64,
) -> Analysis<PcaResult> {
    let n = rows.len();
    let p = feature_names.len();
    if n < 2 || p == 0 {
        return Analysis::unavailable("Need at least 2 observations for PCA");
    }

    let data = DMatrix::from_fn(n, p, |i, j| rows[i][j]);
    let centered = {
        let means = data.row_mean();
        DMatrix::from_fn(n, p, |i, j| data[(i, j)] - means[j])
    };
    let covariance = (centered.transpose() * &centered) / (n as f64 - 1.0);

    let eigen = covariance.symmetric_eigen();
    let mut order: Vec<usize> = (0..p).collect();
    order.sort_by(|&a, &b| cmp_f64(&eigen.eigenvalues[b], &eigen.eigenvalues[a]));

    let eigenvalues: Vec<f64> = order
        .iter()
        .map(|&idx| eigen.eigenvalues[idx].max(0.0))
        .collect();
    let total: f64 = eigenvalues.iter().sum();
    if !(total > 0.0) {
        return Analysis::unavailable("Data has no variance to decompose");
    }

    let n_components = n.min(p);
    let explained_variance_ratio: Vec<f64> = eigenvalues
        .iter()
        .take(n_components)
        .map(|value| value / total)
        .collect();
    let cumulative_variance: Vec<f64> = explained_variance_ratio
        .iter()
        .scan(0.0, |acc, ratio| {
            *acc += ratio;
            Some(*acc)
        })
        .collect();

    let components: Vec<Vec<f64>> = order
        .iter()
        .take(n_components)
        .map(|&idx| {
            let mut loadings: Vec<f64> = eigen.eigenvectors.column(idx).iter().copied().collect();
            let dominant = loadings
                .iter()
                .copied()
                .max_by(|a, b| cmp_f64(&a.abs(), &b.abs()))
                .unwrap_or(0.0);
            if dominant < 0.0 {
                loadings.iter_mut().for_each(|v| *v = -*v);
            }
            loadings
        })
        .collect();

    let n_components_95_variance = cumulative_variance
        .iter()
        .position(|&c| c >= variance_target - 1e-12)
        .map_or(cumulative_variance.len(), |idx| idx + 1);

    Analysis::Completed(PcaResult {
        explained_variance_ratio,
        cumulative_variance,
        components,
        feature_names: feature_names.to_vec(),
        n_components_95_variance,
    })
}

// =============================================================================
// k-means
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    pub centers: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
    pub inertia: f64,
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

fn nearest(point: &[f64], centers: &[Vec<f64>]) -> (usize, f64) {
    centers
        .iter()
        .enumerate()
        .map(|(idx, center)| (idx, squared_distance(point, center)))
        .min_by(|a, b| cmp_f64(&a.1, &b.1))
        .unwrap_or((0, 0.0))
}

/// k-means++ seeding.
fn seed_centers(rows: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centers = vec![rows[rng.gen_range(0..rows.len())].clone()];
    while centers.len() < k {
        let distances: Vec<f64> = rows.iter().map(|row| nearest(row, &centers).1).collect();
        let total: f64 = distances.iter().sum();
        let pick = if total > 0.0 {
            let target = rng.r#gen::<f64>() * total;
            let mut acc = 0.0;
            distances
                .iter()
                .position(|d| {
                    acc += d;
                    acc >= target
                })
                .unwrap_or(rows.len() - 1)
        } else {
            rng.gen_range(0..rows.len())
        };
        centers.push(rows[pick].clone());
    }
    centers
}

fn lloyd(rows: &[Vec<f64>], mut centers: Vec<Vec<f64>>, max_iterations: usize) -> KMeansFit {
    let width = rows[0].len();
    let mut labels: Vec<usize> = rows.iter().map(|row| nearest(row, &centers).0).collect();

    for _ in 0..max_iterations {
        let mut sums = vec![vec![0.0; width]; centers.len()];
        let mut counts = vec![0usize; centers.len()];
        for (row, &label) in rows.iter().zip(&labels) {
            counts[label] += 1;
            for (s, value) in sums[label].iter_mut().zip(row) {
                *s += value;
            }
        }
        for ((center, sum), count) in centers.iter_mut().zip(sums).zip(counts) {
            // an emptied cluster keeps its previous center
            if count > 0 {
                *center = sum.into_iter().map(|s| s / count as f64).collect();
            }
        }

        let mut changed = false;
        for (row, label) in rows.iter().zip(labels.iter_mut()) {
            let (idx, _) = nearest(row, &centers);
            if *label != idx {
                *label = idx;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let inertia = rows
        .iter()
        .zip(&labels)
        .map(|(row, &label)| squared_distance(row, &centers[label]))
        .sum();
    KMeansFit {
        centers,
        labels,
        inertia,
    }
}

/// Seeded k-means with restarts; the fit with the lowest inertia wins.
pub fn kmeans(rows: &[Vec<f64>], k: usize, config: &AnalysisConfig) -> Option<KMeansFit> {
    if k == 0 || rows.len() < k || rows.first().is_none_or(Vec::is_empty) {
        return None;
    }
    let mut rng = StdRng::seed_from_u64(config.kmeans_seed);
    (0..config.kmeans_restarts.max(1))
        .map(|_| {
            let centers = seed_centers(rows, k, &mut rng);
            lloyd(rows, centers, config.kmeans_max_iterations)
        })
        .min_by(|a, b| cmp_f64(&a.inertia, &b.inertia))
}

/// Pick k from an inertia curve for k = 1, 2, ...: the k after the point
/// where the drop in inertia slows the most. A flat step (zero denominator)
/// scores as an infinitely sharp elbow when the preceding drop is positive,
/// and as no elbow otherwise.
pub fn elbow_k(inertias: &[f64], max_k: usize) -> usize {
    if inertias.len() < 3 {
        return 2;
    }
    let rates: Vec<f64> = (1..inertias.len() - 1)
        .map(|i| {
            let before = inertias[i - 1] - inertias[i];
            let after = inertias[i] - inertias[i + 1];
            if after.abs() > 1e-12 {
                before / after
            } else if before > 1e-12 {
                f64::MAX
            } else {
                0.0
            }
        })
        .collect();
    let best = rates
        .iter()
        .enumerate()
        .max_by(|a, b| cmp_f64(a.1, b.1).then(b.0.cmp(&a.0)))
        .map_or(0, |(idx, _)| idx);
    (best + 2).min(max_k)
}

/// Choose k by the elbow heuristic and fit the final clustering.
pub fn cluster(rows: &[Vec<f64>], config: &AnalysisConfig) -> Analysis<ClusterResult> {
    let n = rows.len();
    if n < 2 {
        return Analysis::unavailable("Need at least 2 observations for clustering");
    }

    let optimal_k = if n < 4 {
        2
    } else {
        let max_k = config.max_clusters.min(n - 1);
        let inertias: Vec<f64> = (1..=max_k)
            .filter_map(|k| kmeans(rows, k, config).map(|fit| fit.inertia))
            .collect();
        debug!("Elbow inertias: {:?}", inertias);
        elbow_k(&inertias, max_k)
    };

    match kmeans(rows, optimal_k, config) {
        Some(fit) => Analysis::Completed(ClusterResult {
            optimal_k,
            cluster_centers: fit.centers,
            cluster_labels: fit.labels,
            inertia: fit.inertia,
        }),
        None => Analysis::unavailable(format!("Could not fit {} clusters", optimal_k)),
    }
}

/// PCA and clustering over the frame's pollutant pivot.
pub fn analyze_multivariate(
    frame: &ReadingFrame,
    config: &AnalysisConfig,
) -> Result<Analysis<MultivariateResults>> {
    if frame.is_empty() {
        return Ok(Analysis::unavailable(
            "No data available for multivariate analysis",
        ));
    }

    let pivot = frame.pivot()?;
    if pivot.pollutants.len() < 2 {
        return Ok(Analysis::unavailable(
            "Need at least 2 pollutants for multivariate analysis",
        ));
    }

    let filled: Vec<Vec<f64>> = pivot
        .cells
        .iter()
        .map(|row| row.iter().map(|cell| cell.unwrap_or(0.0)).collect())
        .collect();
    let scaled = standardize(&filled);

    Ok(Analysis::Completed(MultivariateResults {
        n_observations: scaled.len(),
        pca: principal_components(&scaled, &pivot.pollutants, config.variance_target),
        clustering: cluster(&scaled, config),
        feature_names: pivot.pollutants,
    }))
}
