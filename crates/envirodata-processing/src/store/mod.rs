//! Persistence collaborator used by ingestion (writes) and analysis (reads).
//!
//! The core only needs a narrow set of lookups and bulk writes, captured by
//! [`ReadingStore`]. [`MemoryStore`] is an in-process implementation with
//! JSON snapshots, used by the CLI and the tests.
//!
//! Location and pollutant resolution is read-then-create without locking.
//! Concurrent ingestion runs for the same owner must be serialized by the
//! caller or they may race on get-or-create.

pub mod catalog;
pub mod memory;

pub use catalog::default_pollutant_catalog;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::types::{
    BatchReading, BatchStats, EnvironmentalReading, Location, NewLocation, PollutantType,
    QualityFlag, SampleBatch, UploadLog,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Optional predicates narrowing a reading query. Empty sets mean "any".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingFilter {
    pub pollutant_types: Vec<Uuid>,
    pub locations: Vec<Uuid>,
    /// Inclusive lower bound on `measured_at`.
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `measured_at`.
    pub date_to: Option<DateTime<Utc>>,
    pub batches: Vec<Uuid>,
}

impl ReadingFilter {
    /// Check the non-batch predicates against a reading. Batch membership is
    /// resolved by the store.
    pub fn matches(&self, reading: &EnvironmentalReading) -> bool {
        (self.pollutant_types.is_empty() || self.pollutant_types.contains(&reading.pollutant_type_id))
            && (self.locations.is_empty() || self.locations.contains(&reading.location_id))
            && self.date_from.is_none_or(|from| reading.measured_at >= from)
            && self.date_to.is_none_or(|to| reading.measured_at <= to)
    }
}

/// A full reading query: owner, optional quality restriction and filter.
#[derive(Debug, Clone, Copy)]
pub struct ReadingQuery<'a> {
    pub owner: &'a str,
    pub quality: Option<QualityFlag>,
    pub filter: &'a ReadingFilter,
}

impl<'a> ReadingQuery<'a> {
    /// Readings the analysis engine works on: one owner, valid flag only.
    pub fn valid_for(owner: &'a str, filter: &'a ReadingFilter) -> Self {
        Self {
            owner,
            quality: Some(QualityFlag::Valid),
            filter,
        }
    }
}

/// Storage operations required by the ingestion pipeline and the analysis
/// engine.
pub trait ReadingStore {
    /// Case-insensitive name lookup among the owner's locations.
    fn find_location_by_name(&self, owner: &str, name: &str) -> Result<Option<Location>>;

    /// Exact coordinate lookup among the owner's locations.
    fn find_location_by_coordinates(
        &self,
        owner: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<Location>>;

    /// Create a location. Fails if the owner already has one at the same
    /// coordinate pair.
    fn create_location(&mut self, location: NewLocation) -> Result<Location>;

    /// Active pollutant whose name equals `name`, ignoring case.
    fn find_pollutant_by_name(&self, name: &str) -> Result<Option<PollutantType>>;

    /// First active pollutant (by name order) whose name contains `fragment`,
    /// ignoring case.
    fn find_pollutant_containing(&self, fragment: &str) -> Result<Option<PollutantType>>;

    /// Active pollutant whose formula equals `formula`, ignoring case.
    fn find_pollutant_by_formula(&self, formula: &str) -> Result<Option<PollutantType>>;

    fn create_batch(&mut self, batch: SampleBatch) -> Result<SampleBatch>;

    /// Persist readings in one operation. Either all are stored or none.
    fn bulk_insert_readings(&mut self, readings: Vec<EnvironmentalReading>) -> Result<Vec<Uuid>>;

    /// Persist batch membership links in one operation.
    fn bulk_link_batch(&mut self, links: Vec<BatchReading>) -> Result<usize>;

    /// Insert or replace an upload log by id.
    fn save_upload_log(&mut self, log: &UploadLog) -> Result<()>;

    fn upload_log(&self, id: Uuid) -> Result<Option<UploadLog>>;

    /// Readings matching `query`, ordered by measurement time.
    fn query_readings(&self, query: &ReadingQuery<'_>) -> Result<Vec<EnvironmentalReading>>;

    fn location(&self, id: Uuid) -> Result<Option<Location>>;

    fn pollutant_type(&self, id: Uuid) -> Result<Option<PollutantType>>;

    fn locations(&self, owner: &str) -> Result<Vec<Location>>;

    fn pollutant_types(&self) -> Result<Vec<PollutantType>>;

    /// Counts derived from a batch's readings.
    fn batch_stats(&self, batch_id: Uuid) -> Result<BatchStats>;
}
