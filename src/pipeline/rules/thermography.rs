//! Thermography (infrared inspection) test checks.

use crate::models::{NonConformity, Severity};
use crate::pipeline::extraction::types::NormalizedExtraction;

/// Phase-to-phase delta-T above this is an immediate fault.
pub const CRITICAL_DELTA_T: f64 = 15.0;
/// Delta-T above this (and at or below the critical limit) warrants watching.
pub const ADVISORY_DELTA_T: f64 = 3.0;
/// A compliant inspection documents two load readings.
pub const REQUIRED_LOAD_READINGS: usize = 2;

/// Largest temperature difference between any two measurement spots.
fn max_delta_t(extraction: &NormalizedExtraction) -> Option<f64> {
    let temps: Vec<f64> = extraction
        .spot_readings
        .iter()
        .map(|s| s.temperature)
        .collect();
    if temps.len() < 2 {
        return None;
    }
    let max = temps.iter().cloned().fold(f64::MIN, f64::max);
    let min = temps.iter().cloned().fold(f64::MAX, f64::min);
    Some(max - min)
}

pub fn check(extraction: &NormalizedExtraction) -> Vec<NonConformity> {
    let mut findings = Vec::new();

    if let Some(delta) = max_delta_t(extraction) {
        if delta > CRITICAL_DELTA_T {
            findings.push(NonConformity {
                code: "THM-001".into(),
                severity: Severity::Critical,
                description: format!(
                    "Phase-to-phase delta-T {delta:.1}° exceeds the {CRITICAL_DELTA_T}° limit"
                ),
                evidence: format!("max spot spread {delta:.1}°"),
                corrective_action: "De-energize, inspect the hot connection, and re-survey after \
                                    repair"
                    .into(),
            });
        } else if delta > ADVISORY_DELTA_T {
            findings.push(NonConformity {
                code: "THM-002".into(),
                severity: Severity::Minor,
                description: format!(
                    "Phase-to-phase delta-T {delta:.1}° is above the {ADVISORY_DELTA_T}° advisory \
                     threshold"
                ),
                evidence: format!("max spot spread {delta:.1}°"),
                corrective_action: "Schedule a follow-up survey at the next maintenance window"
                    .into(),
            });
        }
    }

    if extraction.load_readings.len() < REQUIRED_LOAD_READINGS {
        findings.push(NonConformity {
            code: "THM-003".into(),
            severity: Severity::Major,
            description: format!(
                "Only {} of {REQUIRED_LOAD_READINGS} mandatory load readings documented",
                extraction.load_readings.len()
            ),
            evidence: format!("{} load readings found", extraction.load_readings.len()),
            corrective_action: "Record both mandatory load readings during the survey".into(),
        });
    }

    if !extraction.reflected_temperature.is_present() {
        findings.push(NonConformity {
            code: "THM-004".into(),
            severity: Severity::Minor,
            description: "Reflected temperature is not documented".into(),
            evidence: "no reflected-temperature value in the capture".into(),
            corrective_action: "Document the reflected apparent temperature used for emissivity \
                                compensation"
                .into(),
        });
    }

    findings
}
