//! Exceedance of regulatory standards.

use super::Analysis;
use super::frame::{QUALITY_FLAG, ReadingFrame};
use crate::error::Result;
use crate::types::{QualityFlag, RegulatoryStandard};
use crate::utils::mean;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    NonCompliant,
}

/// Exceedance figures for one pollutant against one standard.
///
/// `max_exceedance` and `mean_exceedance` are taken over the exceeding
/// readings only and are zero when there are none, as is
/// `exceedance_factor` (max exceeding value over the limit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardCompliance {
    pub standard_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub averaging_time: Option<String>,
    pub total_measurements: usize,
    pub exceedances: usize,
    pub exceedance_rate_percent: f64,
    pub max_concentration: f64,
    pub max_exceedance: f64,
    pub mean_exceedance: f64,
    pub exceedance_factor: f64,
    pub compliance_status: ComplianceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollutantCompliance {
    pub unit: String,
    /// Keyed by [`RegulatoryStandard::key`].
    pub standards: BTreeMap<String, StandardCompliance>,
}

/// Score a set of concentrations against one standard. Exceedance is
/// strict: a value equal to the limit complies.
pub fn score_standard(values: &[f64], standard: &RegulatoryStandard) -> StandardCompliance {
    let exceeding: Vec<f64> = values
        .iter()
        .copied()
        .filter(|&value| value > standard.limit)
        .collect();
    let max_concentration = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let max_exceedance = exceeding.iter().copied().fold(0.0, f64::max);
    let exceedance_factor = if !exceeding.is_empty() && standard.limit > 0.0 {
        max_exceedance / standard.limit
    } else {
        0.0
    };

    StandardCompliance {
        standard_value: standard.limit,
        averaging_time: standard.averaging_time.clone(),
        total_measurements: values.len(),
        exceedances: exceeding.len(),
        exceedance_rate_percent: if values.is_empty() {
            0.0
        } else {
            exceeding.len() as f64 / values.len() as f64 * 100.0
        },
        max_concentration: if values.is_empty() { 0.0 } else { max_concentration },
        max_exceedance,
        mean_exceedance: mean(&exceeding),
        exceedance_factor,
        compliance_status: if exceeding.is_empty() {
            ComplianceStatus::Compliant
        } else {
            ComplianceStatus::NonCompliant
        },
    }
}

/// Compliance of every pollutant that has at least one standard. Only
/// readings flagged valid are scored.
pub fn assess_compliance(
    frame: &ReadingFrame,
) -> Result<Analysis<BTreeMap<String, PollutantCompliance>>> {
    if frame.is_empty() {
        return Ok(Analysis::unavailable(
            "No data available for compliance analysis",
        ));
    }

    let concentrations = frame.concentrations()?;
    let flags = frame.strings(QUALITY_FLAG)?;
    let mut results = BTreeMap::new();

    for (name, rows) in frame.rows_by_pollutant()? {
        let Some(pollutant) = frame.pollutant(&name) else {
            continue;
        };
        if pollutant.standards.is_empty() {
            continue;
        }

        let values: Vec<f64> = rows
            .into_iter()
            .filter(|&row| flags[row] == QualityFlag::Valid.as_str())
            .map(|row| concentrations[row])
            .collect();
        if values.is_empty() {
            continue;
        }

        let standards = pollutant
            .standards
            .iter()
            .map(|standard| (standard.key(), score_standard(&values, standard)))
            .collect();
        results.insert(
            name,
            PollutantCompliance {
                unit: pollutant.unit.clone(),
                standards,
            },
        );
    }

    if results.is_empty() {
        return Ok(Analysis::unavailable(
            "No pollutant with a regulatory standard in the selected data",
        ));
    }
    Ok(Analysis::Completed(results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::frame::tests::FrameBuilder;
    use crate::types::{Authority, PollutantCategory, PollutantType};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_score_standard_strict_exceedance() {
        let standard = RegulatoryStandard::new(Authority::Who, 25.0);
        let scored = score_standard(&[10.0, 25.0, 30.0, 50.0], &standard);

        assert_eq!(scored.total_measurements, 4);
        assert_eq!(scored.exceedances, 2);
        assert_eq!(scored.exceedance_rate_percent, 50.0);
        assert_eq!(scored.max_concentration, 50.0);
        assert_eq!(scored.max_exceedance, 50.0);
        assert_eq!(scored.mean_exceedance, 40.0);
        assert_eq!(scored.exceedance_factor, 2.0);
        assert_eq!(scored.compliance_status, ComplianceStatus::NonCompliant);
    }

    #[test]
    fn test_score_standard_compliant() {
        let standard = RegulatoryStandard::new(Authority::Nesrea, 40.0);
        let scored = score_standard(&[10.0, 40.0], &standard);
        assert_eq!(scored.exceedances, 0);
        assert_eq!(scored.max_exceedance, 0.0);
        assert_eq!(scored.mean_exceedance, 0.0);
        assert_eq!(scored.exceedance_factor, 0.0);
        assert_eq!(scored.compliance_status, ComplianceStatus::Compliant);
        assert_eq!(
            serde_json::to_value(scored.compliance_status).unwrap(),
            serde_json::json!("compliant")
        );
    }

    #[test]
    fn test_assess_compliance_keys_by_standard() {
        let pm = PollutantType::new("PM2.5", PollutantCategory::Particulate, "µg/m³")
            .with_standard(RegulatoryStandard::new(Authority::Who, 15.0).with_averaging_time("24-hour"))
            .with_standard(RegulatoryStandard::new(Authority::Nesrea, 40.0));
        let frame = FrameBuilder::new()
            .with_pollutant(pm)
            .reading("A", "PM2.5", 0, 12.0)
            .reading("A", "PM2.5", 1, 20.0)
            .reading("A", "Dust", 1, 999.0)
            .build();

        let results = assess_compliance(&frame).unwrap().into_completed().unwrap();
        assert_eq!(results.keys().collect::<Vec<_>>(), vec!["PM2.5"]);

        let pm = &results["PM2.5"];
        assert_eq!(pm.unit, "µg/m³");
        assert_eq!(
            pm.standards.keys().collect::<Vec<_>>(),
            vec!["nesrea", "who_24-hour"]
        );
        assert_eq!(pm.standards["who_24-hour"].exceedances, 1);
        assert_eq!(pm.standards["nesrea"].compliance_status, ComplianceStatus::Compliant);
    }

    #[test]
    fn test_no_standards_is_unavailable() {
        let frame = FrameBuilder::new().reading("A", "Dust", 0, 5.0).build();
        assert!(assess_compliance(&frame).unwrap().error().is_some());
    }
}
