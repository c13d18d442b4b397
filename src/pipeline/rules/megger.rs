//! Megger (insulation resistance) test checks.

use crate::models::{NonConformity, PhaseCombination, Severity};
use crate::pipeline::extraction::types::NormalizedExtraction;

/// Minimum acceptable insulation resistance per combination.
pub const MIN_INSULATION_MEGOHMS: f64 = 100.0;
/// Minimum acceptable dielectric absorption index.
pub const MIN_ABSORPTION_INDEX: f64 = 1.4;

pub fn check(extraction: &NormalizedExtraction) -> Vec<NonConformity> {
    let mut findings = Vec::new();

    // Every one of the six phase combinations must have a reading.
    for combination in PhaseCombination::all() {
        let present = extraction
            .insulation_readings
            .get(combination)
            .map(|f| f.is_present())
            .unwrap_or(false);
        if !present {
            findings.push(NonConformity {
                code: "MEG-001".into(),
                severity: Severity::Critical,
                description: format!(
                    "Insulation resistance reading for combination {combination} is missing"
                ),
                evidence: format!("no {combination} reading in the results table"),
                corrective_action: format!(
                    "Measure and record insulation resistance for {combination}"
                ),
            });
        }
    }

    let min_reading = extraction
        .insulation_readings
        .values()
        .filter_map(|f| f.value)
        .fold(None::<f64>, |acc, v| {
            Some(acc.map_or(v, |min| min.min(v)))
        });

    if let Some(min_reading) = min_reading {
        if min_reading < MIN_INSULATION_MEGOHMS {
            findings.push(NonConformity {
                code: "MEG-002".into(),
                severity: Severity::Critical,
                description: format!(
                    "Minimum insulation resistance {min_reading} MΩ is below the \
                     {MIN_INSULATION_MEGOHMS} MΩ limit"
                ),
                evidence: format!("lowest recorded reading {min_reading} MΩ"),
                corrective_action: "Investigate the insulation fault and re-test after repair"
                    .into(),
            });
        }
    }

    if let Some(index) = extraction.absorption_index.value {
        if index < MIN_ABSORPTION_INDEX {
            findings.push(NonConformity {
                code: "MEG-003".into(),
                severity: Severity::Major,
                description: format!(
                    "Absorption index {index} is below the {MIN_ABSORPTION_INDEX} minimum"
                ),
                evidence: format!("absorption index {index}"),
                corrective_action: "Dry or recondition the insulation and repeat the absorption \
                                    test"
                    .into(),
            });
        }
    }

    findings
}
