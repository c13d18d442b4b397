//! Rules engine: universal checks, test-type dispatch, verdict, and score.
//!
//! `evaluate` is deterministic and side-effect-free over a snapshot. All
//! validator findings are appended with their severity mapped directly,
//! never re-derived.

use super::dates::{is_expired, is_expiring_today};
use super::{grounding, megger, thermography};
use crate::models::{Inconsistency, NonConformity, Severity, TestType, Verdict};
use crate::pipeline::extraction::types::NormalizedExtraction;

/// Result of evaluating one analysis snapshot.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub non_conformities: Vec<NonConformity>,
    pub verdict: Verdict,
    /// Banded quality score in [0, 100]; bands never overlap across verdicts
    /// (REJECTED < APPROVED_WITH_COMMENTS < APPROVED), supporting
    /// sort/filter by the caller.
    pub score: f64,
}

/// Universal checks that run for every test type.
fn universal_checks(extraction: &NormalizedExtraction) -> Vec<NonConformity> {
    let mut findings = Vec::new();

    let (Some(expiry), Some(measured)) = (
        extraction.calibration_expiry.value,
        extraction.measurement_date.value,
    ) else {
        return findings;
    };

    if is_expired(expiry, measured) {
        findings.push(NonConformity {
            code: "CAL-101".into(),
            severity: Severity::Critical,
            description: format!(
                "Instrument calibration expired {} before the {} measurement",
                expiry.date_naive(),
                measured.date_naive()
            ),
            evidence: format!("certificate valid through {}", expiry.date_naive()),
            corrective_action: "Recalibrate the instrument and repeat the measurement".into(),
        });
    } else if is_expiring_today(expiry, measured) {
        findings.push(NonConformity {
            code: "CAL-102".into(),
            severity: Severity::Minor,
            description: format!(
                "Instrument calibration expires on the measurement day ({})",
                measured.date_naive()
            ),
            evidence: format!("certificate valid through {}", expiry.date_naive()),
            corrective_action: "Schedule recalibration before the next measurement".into(),
        });
    }

    findings
}

/// Verdict invariant: REJECTED iff any CRITICAL; APPROVED_WITH_COMMENTS iff
/// no CRITICAL but at least one finding; APPROVED otherwise.
pub fn derive_verdict(non_conformities: &[NonConformity]) -> Verdict {
    if non_conformities
        .iter()
        .any(|nc| nc.severity == Severity::Critical)
    {
        Verdict::Rejected
    } else if !non_conformities.is_empty() {
        Verdict::ApprovedWithComments
    } else {
        Verdict::Approved
    }
}

/// Core identification fields whose absence degrades an APPROVED score.
fn absent_core_fields(extraction: &NormalizedExtraction) -> usize {
    [
        extraction.equipment_tag.is_present(),
        extraction.serial_number.is_present(),
        extraction.calibration_expiry.is_present(),
        extraction.measurement_date.is_present(),
    ]
    .iter()
    .filter(|present| !**present)
    .count()
}

/// Deterministic banded score. Bands: APPROVED [90, 100],
/// APPROVED_WITH_COMMENTS [45, 74], REJECTED [5, 39].
fn score_for(
    verdict: Verdict,
    non_conformities: &[NonConformity],
    extraction: &NormalizedExtraction,
) -> f64 {
    match verdict {
        Verdict::Approved => {
            (100.0 - 2.0 * absent_core_fields(extraction) as f64).clamp(90.0, 100.0)
        }
        Verdict::ApprovedWithComments => {
            (75.0 - 5.0 * non_conformities.len() as f64).clamp(45.0, 74.0)
        }
        Verdict::Rejected => {
            let criticals = non_conformities
                .iter()
                .filter(|nc| nc.severity == Severity::Critical)
                .count();
            (40.0 - 10.0 * criticals as f64).clamp(5.0, 39.0)
        }
    }
}

/// Evaluate one snapshot: universal checks, test-type-specific checks, then
/// the validator findings folded in with direct severity mapping.
pub fn evaluate(
    test_type: TestType,
    extraction: &NormalizedExtraction,
    inconsistencies: &[Inconsistency],
) -> Evaluation {
    let mut non_conformities = universal_checks(extraction);

    non_conformities.extend(match test_type {
        TestType::Grounding => grounding::check(extraction),
        TestType::Megger => megger::check(extraction),
        TestType::Thermography => thermography::check(extraction),
    });

    non_conformities.extend(inconsistencies.iter().map(NonConformity::from_inconsistency));

    // Stable sort keeps the validator's priority order within a severity.
    non_conformities.sort_by_key(|nc| nc.severity.rank());

    let verdict = derive_verdict(&non_conformities);
    let score = score_for(verdict, &non_conformities, extraction);

    tracing::debug!(
        test_type = %test_type,
        findings = non_conformities.len(),
        verdict = %verdict,
        score,
        "Rules evaluation complete"
    );

    Evaluation {
        non_conformities,
        verdict,
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::models::{EvidenceSource, PhaseCombination};
    use crate::pipeline::extraction::types::ExtractedField;

    fn nc(code: &str, severity: Severity) -> NonConformity {
        NonConformity {
            code: code.into(),
            severity,
            description: code.into(),
            evidence: String::new(),
            corrective_action: String::new(),
        }
    }

    fn clean_extraction() -> NormalizedExtraction {
        let mut extraction = NormalizedExtraction::default();
        extraction.equipment_tag =
            ExtractedField::found("EQ-01".into(), 0.9, EvidenceSource::ReportHeader);
        extraction.serial_number =
            ExtractedField::found("SN-1".into(), 0.9, EvidenceSource::Certificate);
        extraction.calibration_expiry = ExtractedField::found(
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            0.9,
            EvidenceSource::Certificate,
        );
        extraction.measurement_date = ExtractedField::found(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            0.9,
            EvidenceSource::ReportHeader,
        );
        extraction
    }

    #[test]
    fn verdict_round_trip_with_non_conformities() {
        assert_eq!(derive_verdict(&[]), Verdict::Approved);
        assert_eq!(
            derive_verdict(&[nc("A", Severity::Minor)]),
            Verdict::ApprovedWithComments
        );
        assert_eq!(
            derive_verdict(&[nc("A", Severity::Major), nc("B", Severity::Minor)]),
            Verdict::ApprovedWithComments
        );
        assert_eq!(
            derive_verdict(&[nc("A", Severity::Minor), nc("B", Severity::Critical)]),
            Verdict::Rejected
        );
    }

    #[test]
    fn clean_grounding_report_is_approved() {
        let mut extraction = clean_extraction();
        extraction.ground_resistance =
            ExtractedField::found(3.1, 0.9, EvidenceSource::DataTable);
        extraction.watermark_present =
            ExtractedField::found(true, 0.9, EvidenceSource::Photo);
        extraction.signature_present =
            ExtractedField::found(true, 0.9, EvidenceSource::Photo);

        let evaluation = evaluate(TestType::Grounding, &extraction, &[]);
        assert_eq!(evaluation.verdict, Verdict::Approved);
        assert!(evaluation.non_conformities.is_empty());
        assert!(evaluation.score >= 90.0);
    }

    #[test]
    fn high_ground_resistance_rejects_despite_clean_rest() {
        let mut extraction = clean_extraction();
        extraction.ground_resistance =
            ExtractedField::found(6.2, 0.95, EvidenceSource::DataTable);
        extraction.watermark_present =
            ExtractedField::found(true, 0.9, EvidenceSource::Photo);
        extraction.signature_present =
            ExtractedField::found(true, 0.9, EvidenceSource::Photo);

        let evaluation = evaluate(TestType::Grounding, &extraction, &[]);
        assert_eq!(evaluation.verdict, Verdict::Rejected);
        assert!(evaluation
            .non_conformities
            .iter()
            .any(|nc| nc.code == "GND-001" && nc.severity == Severity::Critical));
    }

    #[test]
    fn expired_calibration_is_universal_critical() {
        let mut extraction = clean_extraction();
        extraction.calibration_expiry = ExtractedField::found(
            Utc.with_ymd_and_hms(2025, 5, 20, 0, 0, 0).unwrap(),
            0.9,
            EvidenceSource::Certificate,
        );

        for test_type in TestType::all() {
            let evaluation = evaluate(*test_type, &extraction, &[]);
            assert!(
                evaluation
                    .non_conformities
                    .iter()
                    .any(|nc| nc.code == "CAL-101"),
                "{test_type} missed expired calibration"
            );
            assert_eq!(evaluation.verdict, Verdict::Rejected);
        }
    }

    #[test]
    fn expiring_today_is_minor_not_critical() {
        let mut extraction = clean_extraction();
        extraction.calibration_expiry = extraction.measurement_date.clone();

        let evaluation = evaluate(TestType::Grounding, &extraction, &[]);
        let finding = evaluation
            .non_conformities
            .iter()
            .find(|nc| nc.code == "CAL-102")
            .expect("expiring-today finding");
        assert_eq!(finding.severity, Severity::Minor);
        assert_eq!(evaluation.verdict, Verdict::ApprovedWithComments);
    }

    #[test]
    fn megger_missing_combination_rejects() {
        let mut extraction = clean_extraction();
        for combination in PhaseCombination::all().iter().take(5) {
            extraction.insulation_readings.insert(
                *combination,
                ExtractedField::found(250.0, 0.9, EvidenceSource::DataTable),
            );
        }

        let evaluation = evaluate(TestType::Megger, &extraction, &[]);
        assert_eq!(evaluation.verdict, Verdict::Rejected);
        let missing: Vec<&NonConformity> = evaluation
            .non_conformities
            .iter()
            .filter(|nc| nc.code == "MEG-001")
            .collect();
        assert_eq!(missing.len(), 1);
        assert!(missing[0].description.contains("L3-E"));
    }

    #[test]
    fn inconsistencies_map_directly_into_non_conformities() {
        let extraction = clean_extraction();
        let inconsistency = Inconsistency {
            severity: Severity::Minor,
            code: "VAL-001".into(),
            field: "display_value".into(),
            expected: "4.2".into(),
            found: "4.5".into(),
            message: "Display deviates from table".into(),
        };

        let evaluation = evaluate(TestType::Grounding, &extraction, &[inconsistency]);
        assert_eq!(evaluation.verdict, Verdict::ApprovedWithComments);
        let folded = evaluation
            .non_conformities
            .iter()
            .find(|nc| nc.code == "VAL-001")
            .expect("folded inconsistency");
        assert_eq!(folded.severity, Severity::Minor);
    }

    #[test]
    fn critical_inconsistency_rejects() {
        let extraction = clean_extraction();
        let inconsistency = Inconsistency {
            severity: Severity::Critical,
            code: "TAG-001".into(),
            field: "equipment_tag".into(),
            expected: "EQ-01".into(),
            found: "EQ-02".into(),
            message: "Tag differs".into(),
        };

        let evaluation = evaluate(TestType::Grounding, &extraction, &[inconsistency]);
        assert_eq!(evaluation.verdict, Verdict::Rejected);
    }

    #[test]
    fn score_bands_never_overlap() {
        // Worst approved beats best approved-with-comments beats best rejected.
        let approved = score_for(Verdict::Approved, &[], &NormalizedExtraction::default());
        let awc_best = score_for(
            Verdict::ApprovedWithComments,
            &[nc("A", Severity::Minor)],
            &clean_extraction(),
        );
        let awc_worst = score_for(
            Verdict::ApprovedWithComments,
            &(0..20).map(|i| nc(&format!("{i}"), Severity::Minor)).collect::<Vec<_>>(),
            &clean_extraction(),
        );
        let rejected_best = score_for(
            Verdict::Rejected,
            &[nc("A", Severity::Critical)],
            &clean_extraction(),
        );
        let rejected_worst = score_for(
            Verdict::Rejected,
            &(0..20)
                .map(|i| nc(&format!("{i}"), Severity::Critical))
                .collect::<Vec<_>>(),
            &clean_extraction(),
        );

        assert!(approved >= 90.0);
        assert!(awc_best < 90.0 && awc_best <= 74.0);
        assert!(awc_worst >= 45.0);
        assert!(rejected_best <= 39.0);
        assert!(rejected_worst >= 5.0);
        assert!(rejected_best < awc_worst);
        assert!(awc_best < approved);
    }

    #[test]
    fn non_conformities_sorted_most_severe_first() {
        let mut extraction = clean_extraction();
        // Expiring today → MINOR universal finding.
        extraction.calibration_expiry = extraction.measurement_date.clone();
        // Missing signature → MAJOR, high resistance → CRITICAL.
        extraction.ground_resistance =
            ExtractedField::found(7.0, 0.9, EvidenceSource::DataTable);
        extraction.signature_present =
            ExtractedField::found(false, 0.9, EvidenceSource::Photo);

        let evaluation = evaluate(TestType::Grounding, &extraction, &[]);
        let ranks: Vec<u8> = evaluation
            .non_conformities
            .iter()
            .map(|nc| nc.severity.rank())
            .collect();
        let mut sorted = ranks.clone();
        sorted.sort_unstable();
        assert_eq!(ranks, sorted);
        assert_eq!(evaluation.non_conformities[0].severity, Severity::Critical);
    }
}
