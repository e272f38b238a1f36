//! In-memory [`ReadingStore`] with JSON snapshot persistence.

use super::{ReadingQuery, ReadingStore, default_pollutant_catalog};
use crate::error::{ProcessingError, Result, ResultExt};
use crate::types::{
    BatchReading, BatchStats, EnvironmentalReading, Location, NewLocation, PollutantType,
    SampleBatch, UploadLog,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// A complete store held in memory.
///
/// # Example
///
/// ```rust,ignore
/// use envirodata_processing::MemoryStore;
///
/// let mut store = MemoryStore::load("store.json")?;
/// // ... ingest or analyze ...
/// store.save("store.json")?;
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStore {
    locations: Vec<Location>,
    pollutant_types: Vec<PollutantType>,
    batches: Vec<SampleBatch>,
    readings: Vec<EnvironmentalReading>,
    batch_readings: Vec<BatchReading>,
    upload_logs: Vec<UploadLog>,
}

static_assertions::assert_impl_all!(MemoryStore: Send, Sync);

impl MemoryStore {
    /// An empty store with no pollutant types.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty store seeded with [`default_pollutant_catalog`].
    pub fn with_default_catalog() -> Self {
        Self {
            pollutant_types: default_pollutant_catalog(),
            ..Self::default()
        }
    }

    /// Load a snapshot written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(ProcessingError::from)
            .context(format!("Reading store snapshot {}", path.display()))?;
        let store: Self = serde_json::from_str(&content)?;
        info!(
            "Loaded store with {} readings, {} locations, {} pollutant types",
            store.readings.len(),
            store.locations.len(),
            store.pollutant_types.len()
        );
        Ok(store)
    }

    /// Write the whole store as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .map_err(ProcessingError::from)
            .context(format!("Writing store snapshot {}", path.display()))?;
        debug!("Saved store to {}", path.display());
        Ok(())
    }

    /// Register a pollutant type. Names are unique, ignoring case.
    pub fn add_pollutant_type(&mut self, pollutant: PollutantType) -> Result<()> {
        if self
            .pollutant_types
            .iter()
            .any(|p| p.name.eq_ignore_ascii_case(&pollutant.name))
        {
            return Err(ProcessingError::Storage(format!(
                "Pollutant type '{}' already exists",
                pollutant.name
            )));
        }
        self.pollutant_types.push(pollutant);
        Ok(())
    }

    pub fn batches(&self) -> &[SampleBatch] {
        &self.batches
    }

    pub fn readings(&self) -> &[EnvironmentalReading] {
        &self.readings
    }

    pub fn upload_logs(&self) -> &[UploadLog] {
        &self.upload_logs
    }

    pub fn batch_links(&self) -> &[BatchReading] {
        &self.batch_readings
    }

    fn active_pollutants_sorted(&self) -> Vec<&PollutantType> {
        let mut active: Vec<&PollutantType> =
            self.pollutant_types.iter().filter(|p| p.is_active).collect();
        active.sort_by(|a, b| a.name.cmp(&b.name));
        active
    }
}

impl ReadingStore for MemoryStore {
    fn find_location_by_name(&self, owner: &str, name: &str) -> Result<Option<Location>> {
        let needle = name.trim().to_lowercase();
        Ok(self
            .locations
            .iter()
            .find(|l| l.owner == owner && l.name.to_lowercase() == needle)
            .cloned())
    }

    fn find_location_by_coordinates(
        &self,
        owner: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<Location>> {
        Ok(self
            .locations
            .iter()
            .find(|l| l.owner == owner && l.coordinates() == Some((latitude, longitude)))
            .cloned())
    }

    fn create_location(&mut self, location: NewLocation) -> Result<Location> {
        if let (Some(lat), Some(lon)) = (location.latitude, location.longitude)
            && self
                .find_location_by_coordinates(&location.owner, lat, lon)?
                .is_some()
        {
            return Err(ProcessingError::Storage(format!(
                "A location at ({}, {}) already exists",
                lat, lon
            )));
        }

        let created = Location {
            id: Uuid::new_v4(),
            owner: location.owner,
            name: location.name.trim().to_string(),
            latitude: location.latitude,
            longitude: location.longitude,
            elevation: location.elevation,
            site_type: location.site_type,
            distance_from_source: None,
            created_at: Utc::now(),
        };
        self.locations.push(created.clone());
        Ok(created)
    }

    fn find_pollutant_by_name(&self, name: &str) -> Result<Option<PollutantType>> {
        let needle = name.trim().to_lowercase();
        Ok(self
            .active_pollutants_sorted()
            .into_iter()
            .find(|p| p.name.to_lowercase() == needle)
            .cloned())
    }

    fn find_pollutant_containing(&self, fragment: &str) -> Result<Option<PollutantType>> {
        let needle = fragment.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }
        Ok(self
            .active_pollutants_sorted()
            .into_iter()
            .find(|p| p.name.to_lowercase().contains(&needle))
            .cloned())
    }

    fn find_pollutant_by_formula(&self, formula: &str) -> Result<Option<PollutantType>> {
        let needle = formula.trim().to_lowercase();
        Ok(self
            .active_pollutants_sorted()
            .into_iter()
            .find(|p| {
                p.formula
                    .as_deref()
                    .is_some_and(|f| f.to_lowercase() == needle)
            })
            .cloned())
    }

    fn create_batch(&mut self, batch: SampleBatch) -> Result<SampleBatch> {
        if self.batches.iter().any(|b| b.id == batch.id) {
            return Err(ProcessingError::Storage(format!(
                "Batch {} already exists",
                batch.id
            )));
        }
        self.batches.push(batch.clone());
        Ok(batch)
    }

    fn bulk_insert_readings(&mut self, readings: Vec<EnvironmentalReading>) -> Result<Vec<Uuid>> {
        let location_ids: HashSet<Uuid> = self.locations.iter().map(|l| l.id).collect();
        let pollutant_ids: HashSet<Uuid> = self.pollutant_types.iter().map(|p| p.id).collect();
        let mut seen: HashSet<Uuid> = self.readings.iter().map(|r| r.id).collect();

        // Validate everything before touching the store
        for reading in &readings {
            if !(reading.concentration.is_finite() && reading.concentration >= 0.0) {
                return Err(ProcessingError::Storage(format!(
                    "Reading {} has invalid concentration {}",
                    reading.id, reading.concentration
                )));
            }
            if !location_ids.contains(&reading.location_id) {
                return Err(ProcessingError::Storage(format!(
                    "Reading {} references unknown location {}",
                    reading.id, reading.location_id
                )));
            }
            if !pollutant_ids.contains(&reading.pollutant_type_id) {
                return Err(ProcessingError::Storage(format!(
                    "Reading {} references unknown pollutant type {}",
                    reading.id, reading.pollutant_type_id
                )));
            }
            if !seen.insert(reading.id) {
                return Err(ProcessingError::Storage(format!(
                    "Duplicate reading id {}",
                    reading.id
                )));
            }
        }

        let ids = readings.iter().map(|r| r.id).collect();
        self.readings.extend(readings);
        Ok(ids)
    }

    fn bulk_link_batch(&mut self, links: Vec<BatchReading>) -> Result<usize> {
        let batch_ids: HashSet<Uuid> = self.batches.iter().map(|b| b.id).collect();
        let reading_ids: HashSet<Uuid> = self.readings.iter().map(|r| r.id).collect();

        for link in &links {
            if !batch_ids.contains(&link.batch_id) {
                return Err(ProcessingError::Storage(format!(
                    "Unknown batch {}",
                    link.batch_id
                )));
            }
            if !reading_ids.contains(&link.reading_id) {
                return Err(ProcessingError::Storage(format!(
                    "Unknown reading {}",
                    link.reading_id
                )));
            }
        }

        let count = links.len();
        self.batch_readings.extend(links);
        Ok(count)
    }

    fn save_upload_log(&mut self, log: &UploadLog) -> Result<()> {
        match self.upload_logs.iter_mut().find(|l| l.id == log.id) {
            Some(existing) => *existing = log.clone(),
            None => self.upload_logs.push(log.clone()),
        }
        Ok(())
    }

    fn upload_log(&self, id: Uuid) -> Result<Option<UploadLog>> {
        Ok(self.upload_logs.iter().find(|l| l.id == id).cloned())
    }

    fn query_readings(&self, query: &ReadingQuery<'_>) -> Result<Vec<EnvironmentalReading>> {
        let in_batches: Option<HashSet<Uuid>> = if query.filter.batches.is_empty() {
            None
        } else {
            Some(
                self.batch_readings
                    .iter()
                    .filter(|link| query.filter.batches.contains(&link.batch_id))
                    .map(|link| link.reading_id)
                    .collect(),
            )
        };

        let mut matched: Vec<EnvironmentalReading> = self
            .readings
            .iter()
            .filter(|r| r.owner == query.owner)
            .filter(|r| query.quality.is_none_or(|flag| r.quality_flag == flag))
            .filter(|r| query.filter.matches(r))
            .filter(|r| in_batches.as_ref().is_none_or(|ids| ids.contains(&r.id)))
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.measured_at);
        Ok(matched)
    }

    fn location(&self, id: Uuid) -> Result<Option<Location>> {
        Ok(self.locations.iter().find(|l| l.id == id).cloned())
    }

    fn pollutant_type(&self, id: Uuid) -> Result<Option<PollutantType>> {
        Ok(self.pollutant_types.iter().find(|p| p.id == id).cloned())
    }

    fn locations(&self, owner: &str) -> Result<Vec<Location>> {
        Ok(self
            .locations
            .iter()
            .filter(|l| l.owner == owner)
            .cloned()
            .collect())
    }

    fn pollutant_types(&self) -> Result<Vec<PollutantType>> {
        Ok(self.pollutant_types.clone())
    }

    fn batch_stats(&self, batch_id: Uuid) -> Result<BatchStats> {
        let members: HashSet<Uuid> = self
            .batch_readings
            .iter()
            .filter(|link| link.batch_id == batch_id)
            .map(|link| link.reading_id)
            .collect();
        let readings: Vec<&EnvironmentalReading> = self
            .readings
            .iter()
            .filter(|r| members.contains(&r.id))
            .collect();

        Ok(BatchStats {
            reading_count: readings.len(),
            location_count: readings
                .iter()
                .map(|r| r.location_id)
                .collect::<HashSet<_>>()
                .len(),
            pollutant_count: readings
                .iter()
                .map(|r| r.pollutant_type_id)
                .collect::<HashSet<_>>()
                .len(),
        })
    }
}
