//! Field normalization: turn an arbitrary uploaded table into canonical,
//! typed reading rows.
//!
//! The normalizer reconciles headers (see [`columns`]), cleans every cell
//! independently (see [`values`]) and drops rows whose required fields are
//! missing or unparsable. Dropped rows are reported as warnings, never as
//! errors. Only missing required columns abort normalization.

pub mod columns;
pub mod values;

pub use columns::{CanonicalField, ColumnMapping, FIELD_ALIASES, normalize_header, reconcile_headers};
pub use values::{clean_numeric_value, clean_text, parse_flexible_datetime, parse_wind_direction};

use crate::error::{ProcessingError, Result};
use crate::types::{Meteorology, Provenance};
use crate::utils::{f64_values, filter_rows, i64_values, is_missing_marker, string_values};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use tracing::{debug, info, warn};

/// Offset between a zero-based data row index and the row number a user
/// sees in a spreadsheet (1-based, plus the header row).
pub const HEADER_ROW_OFFSET: usize = 2;

const SOURCE_ROW: &str = "source_row";
const MEASURED_AT: &str = "measured_at";

const TEXT_FIELDS: [CanonicalField; 9] = [
    CanonicalField::Location,
    CanonicalField::Pollutant,
    CanonicalField::SiteType,
    CanonicalField::SamplingMethod,
    CanonicalField::Equipment,
    CanonicalField::Operator,
    CanonicalField::SampleId,
    CanonicalField::Notes,
    CanonicalField::QualityFlag,
];

const NUMERIC_FIELDS: [CanonicalField; 10] = [
    CanonicalField::Concentration,
    CanonicalField::Latitude,
    CanonicalField::Longitude,
    CanonicalField::Elevation,
    CanonicalField::Temperature,
    CanonicalField::Humidity,
    CanonicalField::Pressure,
    CanonicalField::WindSpeed,
    CanonicalField::DetectionLimit,
    CanonicalField::Uncertainty,
];

/// One cleaned input row. Required fields are guaranteed present; every
/// optional field is either a parsed value or `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    /// Zero-based index of the row in the uploaded table.
    pub source_row: usize,
    pub location: String,
    pub pollutant: String,
    /// As cleaned; may still be negative. Sign is validated per row by the
    /// ingestion pipeline.
    pub concentration: f64,
    pub measured_at: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub site_type: Option<String>,
    pub meteorology: Meteorology,
    pub detection_limit: Option<f64>,
    pub uncertainty: Option<f64>,
    pub provenance: Provenance,
    /// Raw quality flag text, interpreted by the pipeline.
    pub quality_flag: Option<String>,
}

impl NormalizedRow {
    /// Row number as shown to users in error messages.
    pub fn row_number(&self) -> usize {
        self.source_row + HEADER_ROW_OFFSET
    }
}

/// Output of [`FieldNormalizer::normalize`].
#[derive(Debug, Clone)]
pub struct NormalizedTable {
    /// Cleaned frame with canonical column names, a `source_row` column and
    /// `measured_at` as epoch milliseconds.
    pub frame: DataFrame,
    pub mapping: ColumnMapping,
    pub warnings: Vec<String>,
    /// Row count of the input before any row was dropped.
    pub input_rows: usize,
}

impl NormalizedTable {
    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn dropped_rows(&self) -> usize {
        self.input_rows - self.frame.height()
    }

    /// Materialize the cleaned frame as typed rows, in input order.
    pub fn rows(&self) -> Result<Vec<NormalizedRow>> {
        let height = self.frame.height();
        let text = |field: CanonicalField| -> Result<Vec<Option<String>>> {
            if self.has(field) {
                string_values(&self.frame, field.as_str())
            } else {
                Ok(vec![None; height])
            }
        };
        let number = |field: CanonicalField| -> Result<Vec<Option<f64>>> {
            if self.has(field) {
                f64_values(&self.frame, field.as_str())
            } else {
                Ok(vec![None; height])
            }
        };

        let source_rows = i64_values(&self.frame, SOURCE_ROW)?;
        let measured_at = i64_values(&self.frame, MEASURED_AT)?;
        let locations = text(CanonicalField::Location)?;
        let pollutants = text(CanonicalField::Pollutant)?;
        let concentrations = number(CanonicalField::Concentration)?;
        let latitudes = number(CanonicalField::Latitude)?;
        let longitudes = number(CanonicalField::Longitude)?;
        let elevations = number(CanonicalField::Elevation)?;
        let site_types = text(CanonicalField::SiteType)?;
        let temperatures = number(CanonicalField::Temperature)?;
        let humidities = number(CanonicalField::Humidity)?;
        let pressures = number(CanonicalField::Pressure)?;
        let wind_speeds = number(CanonicalField::WindSpeed)?;
        let wind_directions = number(CanonicalField::WindDirection)?;
        let detection_limits = number(CanonicalField::DetectionLimit)?;
        let uncertainties = number(CanonicalField::Uncertainty)?;
        let methods = text(CanonicalField::SamplingMethod)?;
        let equipment = text(CanonicalField::Equipment)?;
        let operators = text(CanonicalField::Operator)?;
        let sample_ids = text(CanonicalField::SampleId)?;
        let notes = text(CanonicalField::Notes)?;
        let flags = text(CanonicalField::QualityFlag)?;

        let mut rows = Vec::with_capacity(height);
        for i in 0..height {
            // Required columns are non-null after both drop passes
            let (
                Some(source_row),
                Some(location),
                Some(pollutant),
                Some(concentration),
                Some(millis),
            ) = (
                source_rows[i],
                locations[i].clone(),
                pollutants[i].clone(),
                concentrations[i],
                measured_at[i],
            )
            else {
                continue;
            };
            let Some(measured_at) = DateTime::<Utc>::from_timestamp_millis(millis) else {
                continue;
            };

            rows.push(NormalizedRow {
                source_row: source_row as usize,
                location,
                pollutant,
                concentration,
                measured_at,
                latitude: latitudes[i],
                longitude: longitudes[i],
                elevation: elevations[i],
                site_type: site_types[i].clone(),
                meteorology: Meteorology {
                    temperature: temperatures[i],
                    humidity: humidities[i],
                    pressure: pressures[i],
                    wind_speed: wind_speeds[i],
                    wind_direction: wind_directions[i],
                },
                detection_limit: detection_limits[i],
                uncertainty: uncertainties[i],
                provenance: Provenance {
                    sampling_method: methods[i].clone(),
                    equipment: equipment[i].clone(),
                    operator: operators[i].clone(),
                    sample_id: sample_ids[i].clone(),
                    notes: notes[i].clone(),
                },
                quality_flag: flags[i].clone(),
            });
        }
        Ok(rows)
    }

    fn has(&self, field: CanonicalField) -> bool {
        self.mapping.source_for(field).is_some()
    }
}

/// Maps messy uploaded tables onto the canonical reading schema.
pub struct FieldNormalizer;

impl FieldNormalizer {
    /// Normalize an uploaded table.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::MissingColumns`] naming every required
    /// field no header matched. Cell-level problems never error.
    pub fn normalize(df: &DataFrame) -> Result<NormalizedTable> {
        let headers: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        let mapping = reconcile_headers(&headers);
        debug!("Column mapping: {:?}", mapping.assignments);

        if !mapping.is_complete() {
            return Err(ProcessingError::MissingColumns(mapping.missing_names()));
        }

        let input_rows = df.height();
        let raw = |field: CanonicalField| -> Result<Vec<Option<String>>> {
            match mapping.source_for(field) {
                Some(header) => string_values(df, header),
                None => Ok(vec![None; input_rows]),
            }
        };

        let mut columns: Vec<Column> = Vec::new();
        let source_rows: Vec<u32> = (0..input_rows as u32).collect();
        columns.push(Series::new(SOURCE_ROW.into(), source_rows).into_column());

        let mut cleaned_text: Vec<(CanonicalField, Vec<Option<String>>)> = Vec::new();
        for field in TEXT_FIELDS {
            if mapping.source_for(field).is_none() {
                continue;
            }
            let values: Vec<Option<String>> = raw(field)?
                .into_iter()
                .map(|cell| cell.as_deref().and_then(clean_text))
                .collect();
            cleaned_text.push((field, values));
        }

        let mut cleaned_numbers: Vec<(CanonicalField, Vec<Option<f64>>)> = Vec::new();
        for field in NUMERIC_FIELDS {
            if mapping.source_for(field).is_none() {
                continue;
            }
            let values: Vec<Option<f64>> = raw(field)?
                .into_iter()
                .map(|cell| cell.as_deref().and_then(clean_numeric_value))
                .collect();
            cleaned_numbers.push((field, values));
        }
        if mapping.source_for(CanonicalField::WindDirection).is_some() {
            let values = raw(CanonicalField::WindDirection)?
                .into_iter()
                .map(|cell| cell.as_deref().and_then(parse_wind_direction))
                .collect();
            cleaned_numbers.push((CanonicalField::WindDirection, values));
        }

        let raw_concentration = raw(CanonicalField::Concentration)?;
        let raw_date = raw(CanonicalField::Date)?;
        let measured_at: Vec<Option<i64>> = raw_date
            .iter()
            .map(|cell| {
                cell.as_deref()
                    .and_then(parse_flexible_datetime)
                    .map(|dt| dt.timestamp_millis())
            })
            .collect();

        let text_of = |field: CanonicalField| {
            cleaned_text
                .iter()
                .find(|(f, _)| *f == field)
                .map(|(_, values)| values.as_slice())
                .unwrap_or(&[])
        };
        let concentration = cleaned_numbers
            .iter()
            .find(|(f, _)| *f == CanonicalField::Concentration)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[]);
        let locations = text_of(CanonicalField::Location);
        let pollutants = text_of(CanonicalField::Pollutant);

        let is_blank = |cell: &Option<String>| cell.as_deref().is_none_or(is_missing_marker);

        // Pass 1: required cells that are empty before any parsing
        let has_critical: Vec<bool> = (0..input_rows)
            .map(|i| {
                locations.get(i).is_some_and(Option::is_some)
                    && pollutants.get(i).is_some_and(Option::is_some)
                    && !is_blank(&raw_concentration[i])
                    && !is_blank(&raw_date[i])
            })
            .collect();

        // Pass 2: present but unparsable dates or concentrations
        let parses: Vec<bool> = (0..input_rows)
            .map(|i| concentration.get(i).is_some_and(Option::is_some) && measured_at[i].is_some())
            .collect();

        for (field, values) in cleaned_text {
            columns.push(Series::new(field.as_str().into(), values).into_column());
        }
        for (field, values) in cleaned_numbers {
            columns.push(Series::new(field.as_str().into(), values).into_column());
        }
        columns.push(Series::new(MEASURED_AT.into(), measured_at).into_column());

        let frame = DataFrame::new(columns)?;
        let mut warnings = Vec::new();

        let missing_critical = has_critical.iter().filter(|keep| !**keep).count();
        if missing_critical > 0 {
            let message = format!("Dropped {} rows with missing critical data", missing_critical);
            warn!("{}", message);
            warnings.push(message);
        }

        let unparsable = has_critical
            .iter()
            .zip(&parses)
            .filter(|(critical, parsed)| **critical && !**parsed)
            .count();
        if unparsable > 0 {
            let message = format!(
                "Dropped {} rows with invalid dates or concentrations",
                unparsable
            );
            warn!("{}", message);
            warnings.push(message);
        }

        let keep: Vec<bool> = has_critical
            .iter()
            .zip(&parses)
            .map(|(critical, parsed)| *critical && *parsed)
            .collect();
        let frame = filter_rows(&frame, &keep)?;

        info!(
            "Normalized {} of {} rows ({} columns mapped)",
            frame.height(),
            input_rows,
            mapping.assignments.len()
        );

        Ok(NormalizedTable {
            frame,
            mapping,
            warnings,
            input_rows,
        })
    }
}
