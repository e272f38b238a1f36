//! Header reconciliation: mapping messy input headers onto canonical fields.
//!
//! # Matching order
//!
//! Headers are normalized first (trimmed, lowercased, runs of whitespace
//! replaced by `_`). Matching then runs in two passes over [`FIELD_ALIASES`]:
//!
//! 1. **Exact pass.** For every field in declaration order, for every alias
//!    in order (both the `contains` and the `exact` lists), the first
//!    unclaimed header equal to the alias is claimed.
//! 2. **Substring pass.** For every field still unmatched, in declaration
//!    order, for every `contains` alias in order, the first unclaimed header
//!    (in file order) containing the alias is claimed.
//!
//! A header is claimed by at most one field and a field claims at most one
//! header. Required fields are declared first, so they win any tie against
//! an optional field in the substring pass.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Invalid regex: whitespace"));

/// A canonical field of a normalized reading row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Location,
    Pollutant,
    Concentration,
    Date,
    Latitude,
    Longitude,
    Elevation,
    SiteType,
    Temperature,
    Humidity,
    Pressure,
    WindSpeed,
    WindDirection,
    DetectionLimit,
    Uncertainty,
    SamplingMethod,
    Equipment,
    Operator,
    SampleId,
    Notes,
    QualityFlag,
}

impl CanonicalField {
    /// Fields every upload must provide.
    pub const REQUIRED: [CanonicalField; 4] = [
        Self::Location,
        Self::Pollutant,
        Self::Concentration,
        Self::Date,
    ];

    pub fn is_required(&self) -> bool {
        Self::REQUIRED.contains(self)
    }

    /// Canonical column name in the normalized table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Pollutant => "pollutant",
            Self::Concentration => "concentration",
            Self::Date => "date",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
            Self::Elevation => "elevation",
            Self::SiteType => "site_type",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
            Self::WindSpeed => "wind_speed",
            Self::WindDirection => "wind_direction",
            Self::DetectionLimit => "detection_limit",
            Self::Uncertainty => "uncertainty",
            Self::SamplingMethod => "sampling_method",
            Self::Equipment => "equipment",
            Self::Operator => "operator",
            Self::SampleId => "sample_id",
            Self::Notes => "notes",
            Self::QualityFlag => "quality_flag",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepted aliases for one canonical field.
#[derive(Debug, Clone, Copy)]
pub struct FieldAliases {
    pub field: CanonicalField,
    /// Matched exactly or as a substring of the header.
    pub contains: &'static [&'static str],
    /// Matched only when the header equals the alias. Used for short
    /// aliases (`lat`, `rh`) that would otherwise hit unrelated headers.
    pub exact: &'static [&'static str],
}

const fn aliases(
    field: CanonicalField,
    contains: &'static [&'static str],
    exact: &'static [&'static str],
) -> FieldAliases {
    FieldAliases {
        field,
        contains,
        exact,
    }
}

/// Alias table in match order. Required fields come first.
pub const FIELD_ALIASES: [FieldAliases; 21] = [
    aliases(
        CanonicalField::Location,
        &["location", "site", "location_name", "site_name"],
        &["station"],
    ),
    aliases(
        CanonicalField::Pollutant,
        &["pollutant", "parameter", "pollutant_name", "parameter_name"],
        &["analyte"],
    ),
    aliases(
        CanonicalField::Concentration,
        &["concentration", "value", "result", "measurement"],
        &["conc"],
    ),
    aliases(
        CanonicalField::Date,
        &["date", "sampling_date", "measurement_date", "datetime"],
        &["timestamp", "time"],
    ),
    aliases(CanonicalField::Latitude, &["latitude"], &["lat"]),
    aliases(CanonicalField::Longitude, &["longitude"], &["lon", "lng", "long"]),
    aliases(CanonicalField::Elevation, &["elevation", "altitude"], &["elev"]),
    aliases(
        CanonicalField::SiteType,
        &["site_type", "site_category"],
        &["land_use"],
    ),
    aliases(CanonicalField::Temperature, &["temperature"], &["temp"]),
    aliases(CanonicalField::Humidity, &["humidity"], &["rh"]),
    aliases(CanonicalField::Pressure, &["pressure"], &["press"]),
    aliases(CanonicalField::WindSpeed, &["wind_speed", "windspeed"], &["ws"]),
    aliases(
        CanonicalField::WindDirection,
        &["wind_direction", "winddirection"],
        &["wd", "wind_dir"],
    ),
    aliases(
        CanonicalField::DetectionLimit,
        &["detection_limit"],
        &["dl", "lod", "mdl"],
    ),
    aliases(CanonicalField::Uncertainty, &["uncertainty"], &["error_percent"]),
    aliases(
        CanonicalField::SamplingMethod,
        &["sampling_method"],
        &["method"],
    ),
    aliases(CanonicalField::Equipment, &["equipment", "instrument"], &[]),
    aliases(CanonicalField::Operator, &["operator", "analyst"], &[]),
    aliases(CanonicalField::SampleId, &["sample_id", "sample_code"], &["sample"]),
    aliases(CanonicalField::Notes, &["notes", "comment", "remarks"], &[]),
    aliases(
        CanonicalField::QualityFlag,
        &["quality_flag", "qc_flag", "quality"],
        &["flag", "qa"],
    ),
];

/// Normalize a raw header: trim, lowercase, collapse whitespace into `_`.
pub fn normalize_header(header: &str) -> String {
    WHITESPACE
        .replace_all(header.trim(), "_")
        .to_lowercase()
}

/// Result of reconciling a header row.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ColumnMapping {
    /// `(field, original header)` pairs in [`FIELD_ALIASES`] order.
    pub assignments: Vec<(CanonicalField, String)>,
    /// Required fields no header matched.
    pub missing_required: Vec<CanonicalField>,
    /// Headers no field claimed.
    pub unmapped: Vec<String>,
}

impl ColumnMapping {
    /// Original header assigned to `field`, if any.
    pub fn source_for(&self, field: CanonicalField) -> Option<&str> {
        self.assignments
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, header)| header.as_str())
    }

    pub fn is_complete(&self) -> bool {
        self.missing_required.is_empty()
    }

    /// Names of the missing required fields.
    pub fn missing_names(&self) -> Vec<String> {
        self.missing_required
            .iter()
            .map(|f| f.as_str().to_string())
            .collect()
    }
}

/// Reconcile `headers` against [`FIELD_ALIASES`].
pub fn reconcile_headers<S: AsRef<str>>(headers: &[S]) -> ColumnMapping {
    let normalized: Vec<String> = headers
        .iter()
        .map(|h| normalize_header(h.as_ref()))
        .collect();
    let mut claimed_by: Vec<Option<CanonicalField>> = vec![None; headers.len()];

    // Exact pass
    for spec in &FIELD_ALIASES {
        let hit = spec.contains.iter().chain(spec.exact).find_map(|alias| {
            normalized
                .iter()
                .enumerate()
                .position(|(idx, header)| claimed_by[idx].is_none() && header == alias)
        });
        if let Some(idx) = hit {
            claimed_by[idx] = Some(spec.field);
        }
    }

    // Substring pass
    for spec in &FIELD_ALIASES {
        if claimed_by.contains(&Some(spec.field)) {
            continue;
        }
        let hit = spec.contains.iter().find_map(|alias| {
            normalized
                .iter()
                .enumerate()
                .position(|(idx, header)| claimed_by[idx].is_none() && header.contains(alias))
        });
        if let Some(idx) = hit {
            claimed_by[idx] = Some(spec.field);
        }
    }

    let assignments: Vec<(CanonicalField, String)> = FIELD_ALIASES
        .iter()
        .filter_map(|spec| {
            claimed_by
                .iter()
                .position(|f| *f == Some(spec.field))
                .map(|idx| (spec.field, headers[idx].as_ref().to_string()))
        })
        .collect();

    let missing_required = CanonicalField::REQUIRED
        .into_iter()
        .filter(|field| !claimed_by.contains(&Some(*field)))
        .collect();

    let unmapped = headers
        .iter()
        .zip(&claimed_by)
        .filter(|(_, field)| field.is_none())
        .map(|(header, _)| header.as_ref().to_string())
        .collect();

    ColumnMapping {
        assignments,
        missing_required,
        unmapped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("  Sampling   Date "), "sampling_date");
        assert_eq!(normalize_header("Concentration (µg/m³)"), "concentration_(µg/m³)");
    }

    #[test]
    fn test_exact_headers_map_directly() {
        let mapping = reconcile_headers(&["location", "pollutant", "concentration", "date"]);
        assert!(mapping.is_complete());
        assert_eq!(mapping.source_for(CanonicalField::Date), Some("date"));
        assert!(mapping.unmapped.is_empty());
    }

    #[test]
    fn test_messy_headers_map_by_substring() {
        let mapping = reconcile_headers(&[
            "Monitoring Site",
            "Parameter Name",
            "Result (mg/L)",
            "Sampling Date",
            "Air Temperature",
        ]);
        assert!(mapping.is_complete());
        assert_eq!(mapping.source_for(CanonicalField::Location), Some("Monitoring Site"));
        assert_eq!(mapping.source_for(CanonicalField::Pollutant), Some("Parameter Name"));
        assert_eq!(mapping.source_for(CanonicalField::Concentration), Some("Result (mg/L)"));
        assert_eq!(mapping.source_for(CanonicalField::Date), Some("Sampling Date"));
        assert_eq!(mapping.source_for(CanonicalField::Temperature), Some("Air Temperature"));
    }

    #[test]
    fn test_exact_match_beats_earlier_substring_match() {
        // "measurement_date" contains the concentration alias "measurement",
        // but it is an exact date alias, so the exact pass assigns it first.
        let mapping = reconcile_headers(&["site", "pollutant", "measurement_date", "measurement"]);
        assert_eq!(mapping.source_for(CanonicalField::Date), Some("measurement_date"));
        assert_eq!(mapping.source_for(CanonicalField::Concentration), Some("measurement"));
    }

    #[test]
    fn test_site_type_is_not_taken_as_location() {
        let mapping = reconcile_headers(&["Site Type", "Site Name", "Pollutant", "Value", "Date"]);
        assert_eq!(mapping.source_for(CanonicalField::Location), Some("Site Name"));
        assert_eq!(mapping.source_for(CanonicalField::SiteType), Some("Site Type"));
    }

    #[test]
    fn test_short_aliases_are_exact_only() {
        let mapping =
            reconcile_headers(&["location", "pollutant", "value", "date", "relative_humidity", "lat"]);
        assert_eq!(mapping.source_for(CanonicalField::Latitude), Some("lat"));
        assert_eq!(mapping.source_for(CanonicalField::Humidity), Some("relative_humidity"));
    }

    #[test]
    fn test_missing_required_fields_are_reported() {
        let mapping = reconcile_headers(&["location", "concentration", "notes"]);
        assert!(!mapping.is_complete());
        assert_eq!(mapping.missing_names(), vec!["pollutant", "date"]);
    }

    #[test]
    fn test_each_header_claimed_once() {
        let mapping = reconcile_headers(&["site", "site", "pollutant", "value", "date"]);
        assert_eq!(mapping.unmapped, vec!["site".to_string()]);
    }
}
