//! Shared helpers for reading polars columns and working with float slices.

use crate::error::Result;
use polars::prelude::*;
use std::cmp::Ordering;

// =============================================================================
// Missing value markers
// =============================================================================

/// Cell contents treated as "no value" before any parsing is attempted.
pub const MISSING_MARKERS: [&str; 11] = [
    "", "-", "na", "n/a", "#n/a", "nan", "null", "none", "missing", "unknown", "error",
];

/// Check if a cell is empty or one of the [`MISSING_MARKERS`].
pub fn is_missing_marker(s: &str) -> bool {
    let lower = s.trim().to_lowercase();
    MISSING_MARKERS.iter().any(|&marker| lower == marker)
}

// =============================================================================
// Column extraction
// =============================================================================

/// Read a column as optional strings, casting non-string columns first.
pub fn string_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = df.column(name)?.as_materialized_series();
    let casted = if series.dtype() == &DataType::String {
        series.clone()
    } else {
        series.cast(&DataType::String)?
    };
    Ok(casted
        .str()?
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect())
}

/// Read a column as optional floats, casting non-float columns first.
pub fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = df.column(name)?.as_materialized_series();
    let casted = series.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

/// Read an `Int64` column as optional integers.
pub fn i64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    let series = df.column(name)?.as_materialized_series();
    let casted = series.cast(&DataType::Int64)?;
    Ok(casted.i64()?.into_iter().collect())
}

/// Keep only the rows where `keep` is true.
pub fn filter_rows(df: &DataFrame, keep: &[bool]) -> Result<DataFrame> {
    let mask = BooleanChunked::from_slice("mask".into(), keep);
    Ok(df.filter(&mask)?)
}

// =============================================================================
// Float helpers
// =============================================================================

/// Total order on floats for sorting; NaN compares equal to everything.
#[inline]
pub fn cmp_f64(a: &f64, b: &f64) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

/// Sorted copy of a slice.
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(cmp_f64);
    out
}

/// Linear-interpolated quantile of an already sorted slice.
pub fn quantile_sorted(values: &[f64], quantile: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let pos = quantile.clamp(0.0, 1.0) * (values.len() as f64 - 1.0);
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        return values[lower];
    }
    let weight = pos - lower as f64;
    values[lower] + (values[upper] - values[lower]) * weight
}

/// Arithmetic mean; 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n - 1 denominator); 0.0 below two values.
pub fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n as f64 - 1.0)
}

/// Sample standard deviation.
pub fn sample_std(values: &[f64]) -> f64 {
    sample_variance(values).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_missing_marker() {
        assert!(is_missing_marker("  "));
        assert!(is_missing_marker("N/A"));
        assert!(is_missing_marker("NaN"));
        assert!(!is_missing_marker("0"));
        assert!(!is_missing_marker("Site A"));
    }

    #[test]
    fn test_quantile_sorted_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_sorted(&values, 0.5), 2.5);
        assert_eq!(quantile_sorted(&values, 0.25), 1.75);
        assert_eq!(quantile_sorted(&values, 1.0), 4.0);
        assert_eq!(quantile_sorted(&[], 0.5), 0.0);
    }

    #[test]
    fn test_sample_variance() {
        assert_eq!(sample_variance(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 32.0 / 7.0);
        assert_eq!(sample_variance(&[3.0]), 0.0);
    }

    #[test]
    fn test_string_values_casts_numbers() {
        let df = df![
            "a" => [1i64, 2],
            "b" => ["x", "y"],
        ]
        .unwrap();
        assert_eq!(
            string_values(&df, "a").unwrap(),
            vec![Some("1".to_string()), Some("2".to_string())]
        );
        assert_eq!(string_values(&df, "b").unwrap()[1].as_deref(), Some("y"));
    }

    #[test]
    fn test_filter_rows() {
        let df = df!["a" => [1.0, 2.0, 3.0]].unwrap();
        let filtered = filter_rows(&df, &[true, false, true]).unwrap();
        assert_eq!(f64_values(&filtered, "a").unwrap(), vec![Some(1.0), Some(3.0)]);
    }
}
