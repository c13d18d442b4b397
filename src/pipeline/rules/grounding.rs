//! Grounding (earth resistance) test checks.

use crate::models::{NonConformity, Severity};
use crate::pipeline::extraction::types::NormalizedExtraction;

/// Maximum acceptable earth resistance.
pub const MAX_GROUND_RESISTANCE_OHMS: f64 = 5.0;

pub fn check(extraction: &NormalizedExtraction) -> Vec<NonConformity> {
    let mut findings = Vec::new();

    if let Some(resistance) = extraction.ground_resistance.value {
        if resistance > MAX_GROUND_RESISTANCE_OHMS {
            findings.push(NonConformity {
                code: "GND-001".into(),
                severity: Severity::Critical,
                description: format!(
                    "Ground resistance {resistance} Ω exceeds the {MAX_GROUND_RESISTANCE_OHMS} Ω limit"
                ),
                evidence: format!("measured {resistance} Ω"),
                corrective_action: "Improve the earthing system and re-test until resistance is \
                                    at or below the limit"
                    .into(),
            });
        }
    }

    if extraction.watermark_present.value == Some(false) {
        findings.push(NonConformity {
            code: "GND-002".into(),
            severity: Severity::Major,
            description: "Measurement photo lacks the required watermark".into(),
            evidence: "no watermark detected on the measurement photo".into(),
            corrective_action: "Re-capture the measurement photo with the watermarking camera \
                                enabled"
                .into(),
        });
    }

    if extraction.signature_present.value == Some(false) {
        findings.push(NonConformity {
            code: "GND-003".into(),
            severity: Severity::Major,
            description: "Report lacks the technician signature".into(),
            evidence: "no signature detected on the report".into(),
            corrective_action: "Have the responsible technician sign the report and resubmit"
                .into(),
        });
    }

    findings
}
