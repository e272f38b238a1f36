//! Tabular view over a filtered reading set.
//!
//! Readings are joined with their location and pollutant names and laid
//! out as a polars frame. Timestamps are kept as epoch milliseconds.

use crate::error::{ProcessingError, Result};
use crate::store::{ReadingFilter, ReadingQuery, ReadingStore};
use crate::types::{EnvironmentalReading, Location, PollutantType};
use crate::utils::{f64_values, i64_values, string_values};
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;
use uuid::Uuid;

pub const LOCATION: &str = "location";
pub const POLLUTANT: &str = "pollutant";
pub const UNIT: &str = "unit";
pub const CONCENTRATION: &str = "concentration";
pub const MEASURED_AT: &str = "measured_at";
pub const QUALITY_FLAG: &str = "quality_flag";

/// Meteorological covariates used by the correlation analysis, in report
/// order.
pub const COVARIATES: [&str; 4] = ["temperature", "humidity", "pressure", "wind_speed"];

/// One row of the (location, timestamp) by pollutant pivot.
pub type PivotKey = (String, i64);

/// Mean concentration per (location, timestamp) and pollutant.
#[derive(Debug, Clone, PartialEq)]
pub struct Pivot {
    pub keys: Vec<PivotKey>,
    pub pollutants: Vec<String>,
    /// Row-major cells, one row per key and one column per pollutant.
    pub cells: Vec<Vec<Option<f64>>>,
}

impl Pivot {
    pub fn column(&self, idx: usize) -> Vec<Option<f64>> {
        self.cells.iter().map(|row| row[idx]).collect()
    }
}

/// Readings of one owner, flattened for analysis.
#[derive(Debug, Clone)]
pub struct ReadingFrame {
    frame: DataFrame,
    pollutants: BTreeMap<String, PollutantType>,
}

impl ReadingFrame {
    /// Query valid readings matching `filter` and join their references.
    pub fn load<S: ReadingStore + ?Sized>(
        store: &S,
        owner: &str,
        filter: &ReadingFilter,
    ) -> Result<Self> {
        if let (Some(from), Some(to)) = (filter.date_from, filter.date_to)
            && from > to
        {
            return Err(ProcessingError::InvalidRequest(format!(
                "date_from ({}) is after date_to ({})",
                from, to
            )));
        }

        let readings = store.query_readings(&ReadingQuery::valid_for(owner, filter))?;
        let locations: HashMap<Uuid, Location> = store
            .locations(owner)?
            .into_iter()
            .map(|location| (location.id, location))
            .collect();

        let mut pollutants: HashMap<Uuid, PollutantType> = HashMap::new();
        for reading in &readings {
            if !pollutants.contains_key(&reading.pollutant_type_id)
                && let Some(pollutant) = store.pollutant_type(reading.pollutant_type_id)?
            {
                pollutants.insert(pollutant.id, pollutant);
            }
        }

        debug!("Loaded {} readings for analysis", readings.len());
        Self::from_readings(&readings, &locations, &pollutants)
    }

    /// Build the frame from readings and lookup tables. Readings whose
    /// location or pollutant cannot be resolved are left out.
    pub fn from_readings(
        readings: &[EnvironmentalReading],
        locations: &HashMap<Uuid, Location>,
        pollutants: &HashMap<Uuid, PollutantType>,
    ) -> Result<Self> {
        let mut location_col = Vec::with_capacity(readings.len());
        let mut pollutant_col = Vec::with_capacity(readings.len());
        let mut unit_col = Vec::with_capacity(readings.len());
        let mut concentration_col = Vec::with_capacity(readings.len());
        let mut measured_col = Vec::with_capacity(readings.len());
        let mut flag_col = Vec::with_capacity(readings.len());
        let mut covariate_cols: [Vec<Option<f64>>; 4] = Default::default();
        let mut used = BTreeMap::new();

        for reading in readings {
            let (Some(location), Some(pollutant)) = (
                locations.get(&reading.location_id),
                pollutants.get(&reading.pollutant_type_id),
            ) else {
                debug!("Skipping reading {} with dangling references", reading.id);
                continue;
            };

            location_col.push(location.name.clone());
            pollutant_col.push(pollutant.name.clone());
            unit_col.push(pollutant.unit.clone());
            concentration_col.push(reading.concentration);
            measured_col.push(reading.measured_at.timestamp_millis());
            flag_col.push(reading.quality_flag.as_str());

            let met = &reading.meteorology;
            for (col, value) in covariate_cols
                .iter_mut()
                .zip([met.temperature, met.humidity, met.pressure, met.wind_speed])
            {
                col.push(value);
            }
            used.entry(pollutant.name.clone())
                .or_insert_with(|| pollutant.clone());
        }

        let mut columns = vec![
            Series::new(LOCATION.into(), location_col).into_column(),
            Series::new(POLLUTANT.into(), pollutant_col).into_column(),
            Series::new(UNIT.into(), unit_col).into_column(),
            Series::new(CONCENTRATION.into(), concentration_col).into_column(),
            Series::new(MEASURED_AT.into(), measured_col).into_column(),
            Series::new(QUALITY_FLAG.into(), flag_col).into_column(),
        ];
        for (name, values) in COVARIATES.iter().zip(covariate_cols) {
            columns.push(Series::new((*name).into(), values).into_column());
        }

        Ok(Self {
            frame: DataFrame::new(columns)?,
            pollutants: used,
        })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Pollutant type by name, with its unit and standards.
    pub fn pollutant(&self, name: &str) -> Option<&PollutantType> {
        self.pollutants.get(name)
    }

    /// Distinct pollutant names, sorted.
    pub fn pollutant_names(&self) -> Vec<String> {
        self.pollutants.keys().cloned().collect()
    }

    pub fn locations(&self) -> Result<Vec<String>> {
        Ok(self.strings(LOCATION)?.into_iter().collect::<BTreeSet<_>>().into_iter().collect())
    }

    /// Non-null values of a text column.
    pub fn strings(&self, column: &str) -> Result<Vec<String>> {
        Ok(string_values(&self.frame, column)?
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect())
    }

    pub fn concentrations(&self) -> Result<Vec<f64>> {
        Ok(f64_values(&self.frame, CONCENTRATION)?
            .into_iter()
            .map(|value| value.unwrap_or(f64::NAN))
            .collect())
    }

    pub fn timestamps(&self) -> Result<Vec<i64>> {
        Ok(i64_values(&self.frame, MEASURED_AT)?
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect())
    }

    pub fn covariate(&self, name: &str) -> Result<Vec<Option<f64>>> {
        f64_values(&self.frame, name)
    }

    /// Concentrations grouped by pollutant name.
    pub fn values_by_pollutant(&self) -> Result<BTreeMap<String, Vec<f64>>> {
        self.group_values(POLLUTANT)
    }

    /// Concentrations grouped by the values of a text column.
    pub fn group_values(&self, column: &str) -> Result<BTreeMap<String, Vec<f64>>> {
        let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for (key, value) in self.strings(column)?.into_iter().zip(self.concentrations()?) {
            groups.entry(key).or_default().push(value);
        }
        Ok(groups)
    }

    /// Row indices per pollutant, in frame order.
    pub fn rows_by_pollutant(&self) -> Result<BTreeMap<String, Vec<usize>>> {
        let mut rows: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, name) in self.strings(POLLUTANT)?.into_iter().enumerate() {
            rows.entry(name).or_default().push(idx);
        }
        Ok(rows)
    }

    /// Pivot to one row per (location, timestamp) and one column per
    /// pollutant, averaging duplicate cells.
    pub fn pivot(&self) -> Result<Pivot> {
        let locations = self.strings(LOCATION)?;
        let pollutants = self.strings(POLLUTANT)?;
        let timestamps = self.timestamps()?;
        let values = self.concentrations()?;

        let names = self.pollutant_names();
        let index: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();

        let mut sums: BTreeMap<PivotKey, Vec<(f64, usize)>> = BTreeMap::new();
        for (((location, pollutant), ts), value) in locations
            .into_iter()
            .zip(pollutants.iter())
            .zip(timestamps)
            .zip(values)
        {
            let Some(&col) = index.get(pollutant.as_str()) else {
                continue;
            };
            let row = sums
                .entry((location, ts))
                .or_insert_with(|| vec![(0.0, 0); names.len()]);
            row[col].0 += value;
            row[col].1 += 1;
        }

        let mut keys = Vec::with_capacity(sums.len());
        let mut cells = Vec::with_capacity(sums.len());
        for (key, row) in sums {
            keys.push(key);
            cells.push(
                row.into_iter()
                    .map(|(sum, count)| (count > 0).then(|| sum / count as f64))
                    .collect(),
            );
        }

        Ok(Pivot {
            keys,
            pollutants: names,
            cells,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{Meteorology, PollutantCategory, QualityFlag, SiteType};
    use chrono::{TimeZone, Utc};

    /// Small fixture builder shared by the analysis tests.
    pub(crate) struct FrameBuilder {
        readings: Vec<EnvironmentalReading>,
        locations: HashMap<Uuid, Location>,
        pollutants: HashMap<Uuid, PollutantType>,
    }

    impl FrameBuilder {
        pub(crate) fn new() -> Self {
            Self {
                readings: Vec::new(),
                locations: HashMap::new(),
                pollutants: HashMap::new(),
            }
        }

        pub(crate) fn with_pollutant(mut self, pollutant: PollutantType) -> Self {
            self.pollutants.insert(pollutant.id, pollutant);
            self
        }

        fn location_id(&mut self, name: &str) -> Uuid {
            if let Some(location) = self.locations.values().find(|l| l.name == name) {
                return location.id;
            }
            let location = Location {
                id: Uuid::new_v4(),
                owner: "alice".to_string(),
                name: name.to_string(),
                latitude: None,
                longitude: None,
                elevation: None,
                site_type: SiteType::Other,
                distance_from_source: None,
                created_at: Utc::now(),
            };
            let id = location.id;
            self.locations.insert(id, location);
            id
        }

        fn pollutant_id(&mut self, name: &str) -> Uuid {
            if let Some(pollutant) = self.pollutants.values().find(|p| p.name == name) {
                return pollutant.id;
            }
            let pollutant = PollutantType::new(name, PollutantCategory::Other, "µg/m³");
            let id = pollutant.id;
            self.pollutants.insert(id, pollutant);
            id
        }

        pub(crate) fn reading(
            self,
            location: &str,
            pollutant: &str,
            day: u32,
            concentration: f64,
        ) -> Self {
            self.reading_with(location, pollutant, day, concentration, Meteorology::default())
        }

        pub(crate) fn reading_with(
            mut self,
            location: &str,
            pollutant: &str,
            day: u32,
            concentration: f64,
            meteorology: Meteorology,
        ) -> Self {
            let location_id = self.location_id(location);
            let pollutant_type_id = self.pollutant_id(pollutant);
            let measured_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::days(day as i64);
            self.readings.push(EnvironmentalReading {
                id: Uuid::new_v4(),
                owner: "alice".to_string(),
                location_id,
                pollutant_type_id,
                concentration,
                measured_at,
                quality_flag: QualityFlag::Valid,
                meteorology,
                detection_limit: None,
                uncertainty_percent: None,
                provenance: Default::default(),
                created_at: Utc::now(),
            });
            self
        }

        pub(crate) fn build(self) -> ReadingFrame {
            ReadingFrame::from_readings(&self.readings, &self.locations, &self.pollutants).unwrap()
        }
    }

    #[test]
    fn test_frame_columns_and_groups() {
        let frame = FrameBuilder::new()
            .reading("A", "NO2", 0, 10.0)
            .reading("A", "PM2.5", 0, 20.0)
            .reading("B", "NO2", 1, 30.0)
            .build();

        assert_eq!(frame.len(), 3);
        assert_eq!(frame.pollutant_names(), vec!["NO2", "PM2.5"]);
        assert_eq!(frame.locations().unwrap(), vec!["A", "B"]);

        let groups = frame.values_by_pollutant().unwrap();
        assert_eq!(groups["NO2"], vec![10.0, 30.0]);
        assert_eq!(frame.frame().column(COVARIATES[0]).unwrap().null_count(), 3);
    }

    #[test]
    fn test_pivot_averages_duplicate_cells() {
        let frame = FrameBuilder::new()
            .reading("A", "NO2", 0, 10.0)
            .reading("A", "NO2", 0, 20.0)
            .reading("A", "SO2", 0, 5.0)
            .reading("B", "SO2", 0, 7.0)
            .build();

        let pivot = frame.pivot().unwrap();
        assert_eq!(pivot.pollutants, vec!["NO2", "SO2"]);
        assert_eq!(pivot.keys.len(), 2);
        assert_eq!(pivot.cells[0], vec![Some(15.0), Some(5.0)]);
        assert_eq!(pivot.cells[1], vec![None, Some(7.0)]);
        assert_eq!(pivot.column(1), vec![Some(5.0), Some(7.0)]);
    }

    #[test]
    fn test_dangling_references_are_dropped() {
        let mut builder = FrameBuilder::new().reading("A", "NO2", 0, 10.0);
        builder.locations.clear();
        let frame = builder.build();
        assert!(frame.is_empty());
        assert!(frame.pollutant_names().is_empty());
    }

    #[test]
    fn test_load_rejects_inverted_date_range() {
        let store = crate::store::MemoryStore::new();
        let filter = ReadingFilter {
            date_from: Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
            date_to: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        let err = ReadingFrame::load(&store, "alice", &filter).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_REQUEST");
    }
}
