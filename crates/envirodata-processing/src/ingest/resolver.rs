//! Resolution of row references to stored locations and pollutant types.
//!
//! The outer `Result` carries store failures, which abort ingestion. The
//! inner one carries the row-scoped [`RowError`] the pipeline may absorb.

use crate::error::{Result, RowError};
use crate::normalizer::NormalizedRow;
use crate::store::ReadingStore;
use crate::types::{Location, NewLocation, PollutantType, SiteType};
use tracing::{debug, info};

/// Outcome of resolving one reference for one row.
pub type RowResult<T> = std::result::Result<T, RowError>;

/// Whether a coordinate pair lies on the globe.
pub fn valid_coordinates(latitude: f64, longitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude)
}

/// Find the row's location by name, then by coordinates, then create it if
/// allowed.
///
/// Out-of-range coordinates never match and are left off a newly created
/// location; a warning is pushed in that case.
pub fn resolve_location<S: ReadingStore + ?Sized>(
    store: &mut S,
    owner: &str,
    row: &NormalizedRow,
    create_missing: bool,
    warnings: &mut Vec<String>,
) -> Result<RowResult<Location>> {
    if let Some(location) = store.find_location_by_name(owner, &row.location)? {
        return Ok(Ok(location));
    }

    let coordinates = row.latitude.zip(row.longitude);
    let valid = coordinates.filter(|(lat, lon)| valid_coordinates(*lat, *lon));

    if let Some((lat, lon)) = valid
        && let Some(location) = store.find_location_by_coordinates(owner, lat, lon)?
    {
        debug!(
            "Row {}: matched '{}' to location '{}' by coordinates",
            row.row_number(),
            row.location,
            location.name
        );
        return Ok(Ok(location));
    }

    if !create_missing {
        return Ok(Err(RowError::UnknownLocation(row.location.clone())));
    }

    if let (Some((latitude, longitude)), None) = (coordinates, valid) {
        warnings.push(format!(
            "Row {}: {}; location '{}' created without coordinates",
            row.row_number(),
            RowError::InvalidCoordinates {
                latitude,
                longitude
            },
            row.location
        ));
    }

    let site_type = match row.site_type.as_deref() {
        None => SiteType::default(),
        Some(label) => SiteType::from_label(label).unwrap_or_else(|| {
            debug!("Unknown site type '{}', using 'other'", label);
            SiteType::Other
        }),
    };

    let location = store.create_location(NewLocation {
        owner: owner.to_string(),
        name: row.location.clone(),
        latitude: valid.map(|(lat, _)| lat),
        longitude: valid.map(|(_, lon)| lon),
        elevation: row.elevation,
        site_type,
    })?;
    info!("Created new location: {}", location.name);
    Ok(Ok(location))
}

/// Resolve a pollutant by exact name, then substring, then formula.
pub fn resolve_pollutant<S: ReadingStore + ?Sized>(
    store: &S,
    name: &str,
) -> Result<RowResult<PollutantType>> {
    let found = match store.find_pollutant_by_name(name)? {
        Some(pollutant) => Some(pollutant),
        None => match store.find_pollutant_containing(name)? {
            Some(pollutant) => Some(pollutant),
            None => store.find_pollutant_by_formula(name)?,
        },
    };
    Ok(found.ok_or_else(|| RowError::UnknownPollutant(name.to_string())))
}

/// Reject unusable concentrations.
pub fn validate_concentration(value: f64) -> RowResult<f64> {
    if !value.is_finite() {
        return Err(RowError::InvalidConcentration(value.to_string()));
    }
    if value < 0.0 {
        return Err(RowError::NegativeConcentration(value));
    }
    Ok(value)
}
