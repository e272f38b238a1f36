//! Default pollutant catalog with WHO guideline and NESREA limits.

use crate::types::{Authority, PollutantCategory, PollutantType, RegulatoryStandard};

const UG_M3: &str = "µg/m³";
const MG_M3: &str = "mg/m³";

struct CatalogEntry {
    name: &'static str,
    formula: Option<&'static str>,
    category: PollutantCategory,
    unit: &'static str,
    who: Option<f64>,
    nesrea: Option<f64>,
}

const fn entry(
    name: &'static str,
    formula: Option<&'static str>,
    category: PollutantCategory,
    unit: &'static str,
    who: Option<f64>,
    nesrea: Option<f64>,
) -> CatalogEntry {
    CatalogEntry {
        name,
        formula,
        category,
        unit,
        who,
        nesrea,
    }
}

const CATALOG: [CatalogEntry; 17] = [
    entry("PM2.5", None, PollutantCategory::Particulate, UG_M3, Some(15.0), Some(35.0)),
    entry("PM10", None, PollutantCategory::Particulate, UG_M3, Some(45.0), Some(150.0)),
    entry("TSP", None, PollutantCategory::Particulate, UG_M3, None, Some(250.0)),
    entry("NO2", Some("NO2"), PollutantCategory::AirQuality, UG_M3, Some(40.0), Some(100.0)),
    entry("SO2", Some("SO2"), PollutantCategory::AirQuality, UG_M3, Some(20.0), Some(365.0)),
    entry("CO", Some("CO"), PollutantCategory::AirQuality, MG_M3, Some(10.0), Some(10.0)),
    entry("O3", Some("O3"), PollutantCategory::AirQuality, UG_M3, Some(100.0), Some(157.0)),
    entry("H2S", Some("H2S"), PollutantCategory::Gas, UG_M3, Some(150.0), None),
    entry("NH3", Some("NH3"), PollutantCategory::Gas, UG_M3, Some(200.0), None),
    entry("Lead", Some("Pb"), PollutantCategory::HeavyMetal, UG_M3, Some(0.5), Some(1.5)),
    entry("Mercury", Some("Hg"), PollutantCategory::HeavyMetal, UG_M3, Some(1.0), None),
    entry("Cadmium", Some("Cd"), PollutantCategory::HeavyMetal, UG_M3, Some(5.0), None),
    entry("Arsenic", Some("As"), PollutantCategory::HeavyMetal, UG_M3, Some(6.6), None),
    entry("Benzene", Some("C6H6"), PollutantCategory::OrganicCompound, UG_M3, Some(1.7), None),
    entry("Toluene", Some("C7H8"), PollutantCategory::OrganicCompound, UG_M3, Some(260.0), None),
    entry("Xylene", Some("C8H10"), PollutantCategory::OrganicCompound, UG_M3, Some(870.0), None),
    entry("Formaldehyde", Some("CH2O"), PollutantCategory::OrganicCompound, UG_M3, Some(100.0), None),
];

/// Build the default catalog. Every call returns fresh ids.
pub fn default_pollutant_catalog() -> Vec<PollutantType> {
    CATALOG
        .iter()
        .map(|e| {
            let mut pollutant = PollutantType::new(e.name, e.category, e.unit);
            if let Some(formula) = e.formula {
                pollutant = pollutant.with_formula(formula);
            }
            if let Some(limit) = e.who {
                pollutant = pollutant.with_standard(RegulatoryStandard::new(Authority::Who, limit));
            }
            if let Some(limit) = e.nesrea {
                pollutant =
                    pollutant.with_standard(RegulatoryStandard::new(Authority::Nesrea, limit));
            }
            pollutant
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names_are_unique() {
        let catalog = default_pollutant_catalog();
        let mut names: Vec<_> = catalog.iter().map(|p| p.name.to_lowercase()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), catalog.len());
    }

    #[test]
    fn test_pm25_standards() {
        let catalog = default_pollutant_catalog();
        let pm25 = catalog.iter().find(|p| p.name == "PM2.5").unwrap();
        let keys: Vec<_> = pm25.standards.iter().map(|s| (s.key(), s.limit)).collect();
        assert_eq!(keys, vec![("who".to_string(), 15.0), ("nesrea".to_string(), 35.0)]);
    }
}
