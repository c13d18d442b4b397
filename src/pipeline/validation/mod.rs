//! Cross-source consistency validator.
//!
//! Pure function over a `ConsolidatedEvidence` snapshot. Five checks run in
//! fixed priority order (most critical first) so severity-sorted reporting
//! stays stable. Each check reports at most one finding — the first
//! disagreement, not every pairwise combination — and is skipped entirely
//! when fewer than two comparable sources are available: absence of data is
//! not evidence of inconsistency.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::models::{EvidenceSource, Inconsistency, Severity, TestType};
use crate::pipeline::extraction::types::{ConsolidatedEvidence, RawCandidate};

/// Max ambient-vs-reflected temperature disagreement (same scale as extracted).
const TEMPERATURE_TOLERANCE: f64 = 1.0;
/// Max relative deviation between instrument display and tabulated value.
const DISPLAY_TABLE_TOLERANCE: f64 = 0.05;

/// Uppercase and collapse whitespace/hyphen/underscore runs to one hyphen:
/// "eq 01", "EQ_01" and "EQ-01" all normalize to "EQ-01".
pub fn normalize_tag(raw: &str) -> String {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    let separators = SEPARATORS.get_or_init(|| Regex::new(r"[\s_\-]+").expect("static regex"));
    separators
        .replace_all(raw.trim(), "-")
        .to_uppercase()
        .trim_matches('-')
        .to_string()
}

/// Uppercase and strip whitespace, hyphens, underscores, and periods.
pub fn normalize_serial(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '_' | '.'))
        .collect::<String>()
        .to_uppercase()
}

/// Run all five checks against the consolidated evidence.
pub fn validate(evidence: &ConsolidatedEvidence) -> Vec<Inconsistency> {
    let mut findings = Vec::new();

    if let Some(finding) = check_certificate_expiry(evidence) {
        findings.push(finding);
    }
    if let Some(finding) = check_tag_consistency(&evidence.tag_candidates) {
        findings.push(finding);
    }
    if evidence.test_type == TestType::Thermography {
        if let Some(finding) = check_temperature_consistency(evidence) {
            findings.push(finding);
        }
    }
    if let Some(finding) = check_serial_consistency(&evidence.serial_candidates) {
        findings.push(finding);
    }
    if let Some(finding) = check_display_vs_table(evidence) {
        findings.push(finding);
    }

    findings
}

/// Check 1: certificate expiry vs measurement date, calendar-date-only (UTC).
/// Same-day expiry is not a violation here; the rules engine reports it as a
/// separate MINOR warning.
fn check_certificate_expiry(evidence: &ConsolidatedEvidence) -> Option<Inconsistency> {
    let expiry = evidence.merged.calibration_expiry.value?;
    let measured = evidence.merged.measurement_date.value?;

    if expiry.date_naive() < measured.date_naive() {
        return Some(Inconsistency {
            severity: Severity::Critical,
            code: "CAL-001".into(),
            field: "calibration_expiry".into(),
            expected: format!("valid on {}", measured.date_naive()),
            found: format!("expired {}", expiry.date_naive()),
            message: format!(
                "Calibration certificate expired {} but the measurement was taken {}",
                expiry.date_naive(),
                measured.date_naive()
            ),
        });
    }
    None
}

/// Check 2: equipment tag agreement across report header, photo, and table.
fn check_tag_consistency(candidates: &[RawCandidate]) -> Option<Inconsistency> {
    let present: Vec<&RawCandidate> = candidates
        .iter()
        .filter(|c| !c.raw.trim().is_empty())
        .collect();
    let distinct_sources: HashSet<EvidenceSource> =
        present.iter().map(|c| c.source).collect();
    if distinct_sources.len() < 2 {
        return None;
    }

    let reference = normalize_tag(&present[0].raw);
    let disagrees = present
        .iter()
        .any(|c| normalize_tag(&c.raw) != reference);
    if !disagrees {
        return None;
    }

    let all_raw = present
        .iter()
        .map(|c| format!("\"{}\" ({})", c.raw, c.source))
        .collect::<Vec<_>>()
        .join(", ");

    Some(Inconsistency {
        severity: Severity::Critical,
        code: "TAG-001".into(),
        field: "equipment_tag".into(),
        expected: present[0].raw.clone(),
        found: all_raw.clone(),
        message: format!("Equipment tag differs across sources: {all_raw}"),
    })
}

/// Check 3 (thermography only): ambient vs reflected temperature agreement.
fn check_temperature_consistency(evidence: &ConsolidatedEvidence) -> Option<Inconsistency> {
    let ambient = evidence.merged.ambient_temperature.value?;
    let reflected = evidence.merged.reflected_temperature.value?;

    if (ambient - reflected).abs() > TEMPERATURE_TOLERANCE {
        return Some(Inconsistency {
            severity: Severity::Critical,
            code: "TEMP-001".into(),
            field: "reflected_temperature".into(),
            expected: format!("within {TEMPERATURE_TOLERANCE}° of ambient {ambient}"),
            found: reflected.to_string(),
            message: format!(
                "Reflected temperature {reflected}° disagrees with ambient {ambient}° by more than {TEMPERATURE_TOLERANCE}°"
            ),
        });
    }
    None
}

/// Check 4: serial agreement across certificate, report, photo, instrument.
fn check_serial_consistency(candidates: &[RawCandidate]) -> Option<Inconsistency> {
    let present: Vec<&RawCandidate> = candidates
        .iter()
        .filter(|c| !c.raw.trim().is_empty())
        .collect();
    if present.len() < 2 {
        return None;
    }

    let reference = normalize_serial(&present[0].raw);
    let mismatch = present
        .iter()
        .find(|c| normalize_serial(&c.raw) != reference)?;

    Some(Inconsistency {
        severity: Severity::Critical,
        code: "SER-001".into(),
        field: "serial_number".into(),
        expected: present[0].raw.clone(),
        found: mismatch.raw.clone(),
        message: format!(
            "Serial number differs between sources: \"{}\" ({}) vs \"{}\" ({})",
            present[0].raw, present[0].source, mismatch.raw, mismatch.source
        ),
    })
}

/// Check 5: instrument display vs tabulated value, 5% relative tolerance.
/// Advisory only — this never blocks approval on its own.
fn check_display_vs_table(evidence: &ConsolidatedEvidence) -> Option<Inconsistency> {
    let display = evidence.merged.display_value.value?;
    let table = evidence.merged.table_value.value?;
    if table == 0.0 {
        return None;
    }

    let deviation = ((display - table) / table).abs();
    if deviation > DISPLAY_TABLE_TOLERANCE {
        return Some(Inconsistency {
            severity: Severity::Minor,
            code: "VAL-001".into(),
            field: "display_value".into(),
            expected: table.to_string(),
            found: display.to_string(),
            message: format!(
                "Instrument display {display} deviates {:.1}% from tabulated value {table}",
                deviation * 100.0
            ),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::pipeline::extraction::types::ExtractedField;

    fn evidence(test_type: TestType) -> ConsolidatedEvidence {
        ConsolidatedEvidence::new(test_type)
    }

    fn candidate(raw: &str, source: EvidenceSource) -> RawCandidate {
        RawCandidate {
            raw: raw.to_string(),
            source,
            confidence: 0.9,
        }
    }

    #[test]
    fn normalize_tag_examples() {
        assert_eq!(normalize_tag("EQ-01"), "EQ-01");
        assert_eq!(normalize_tag("eq 01"), "EQ-01");
        assert_eq!(normalize_tag("eq__01"), "EQ-01");
        assert_eq!(normalize_tag("  eq - 01  "), "EQ-01");
    }

    #[test]
    fn normalize_serial_examples() {
        assert_eq!(normalize_serial("FLK-1587-0042"), "FLK15870042");
        assert_eq!(normalize_serial("flk 1587.0042"), "FLK15870042");
        assert_eq!(normalize_serial("FLK_1587_0042"), "FLK15870042");
    }

    #[test]
    fn empty_evidence_yields_no_findings() {
        for test_type in TestType::all() {
            assert!(validate(&evidence(*test_type)).is_empty());
        }
    }

    #[test]
    fn single_source_per_field_yields_no_findings() {
        let mut ev = evidence(TestType::Grounding);
        ev.tag_candidates
            .push(candidate("EQ-01", EvidenceSource::ReportHeader));
        ev.serial_candidates
            .push(candidate("SN-1", EvidenceSource::Certificate));
        assert!(validate(&ev).is_empty());
    }

    #[test]
    fn matching_tags_across_formats_are_consistent() {
        let mut ev = evidence(TestType::Grounding);
        ev.tag_candidates
            .push(candidate("EQ-01", EvidenceSource::ReportHeader));
        ev.tag_candidates
            .push(candidate("eq 01", EvidenceSource::Photo));
        assert!(validate(&ev).is_empty());
    }

    #[test]
    fn differing_tags_produce_one_critical_listing_all_raw_values() {
        let mut ev = evidence(TestType::Grounding);
        ev.tag_candidates
            .push(candidate("EQ-01", EvidenceSource::ReportHeader));
        ev.tag_candidates
            .push(candidate("EQ-02", EvidenceSource::Photo));

        let findings = validate(&ev);
        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.severity, Severity::Critical);
        assert!(finding.code.starts_with("TAG-"));
        assert!(finding.message.contains("EQ-01"));
        assert!(finding.message.contains("EQ-02"));
    }

    #[test]
    fn same_source_twice_is_not_two_sources() {
        let mut ev = evidence(TestType::Grounding);
        ev.tag_candidates
            .push(candidate("EQ-01", EvidenceSource::ReportHeader));
        ev.tag_candidates
            .push(candidate("EQ-02", EvidenceSource::ReportHeader));
        assert!(validate(&ev).is_empty());
    }

    #[test]
    fn expired_certificate_is_critical() {
        let mut ev = evidence(TestType::Grounding);
        ev.merged.calibration_expiry = ExtractedField::found(
            Utc.with_ymd_and_hms(2025, 1, 10, 23, 59, 0).unwrap(),
            0.9,
            EvidenceSource::Certificate,
        );
        ev.merged.measurement_date = ExtractedField::found(
            Utc.with_ymd_and_hms(2025, 1, 11, 0, 1, 0).unwrap(),
            0.9,
            EvidenceSource::ReportHeader,
        );

        let findings = validate(&ev);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].code, "CAL-001");
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn same_day_expiry_is_not_flagged_here() {
        let mut ev = evidence(TestType::Grounding);
        // Expiry earlier in the day than the measurement: same calendar day.
        ev.merged.calibration_expiry = ExtractedField::found(
            Utc.with_ymd_and_hms(2025, 1, 11, 0, 0, 0).unwrap(),
            0.9,
            EvidenceSource::Certificate,
        );
        ev.merged.measurement_date = ExtractedField::found(
            Utc.with_ymd_and_hms(2025, 1, 11, 18, 30, 0).unwrap(),
            0.9,
            EvidenceSource::ReportHeader,
        );
        assert!(validate(&ev).is_empty());
    }

    #[test]
    fn temperature_disagreement_critical_for_thermography_only() {
        let mut ev = evidence(TestType::Thermography);
        ev.merged.ambient_temperature =
            ExtractedField::found(24.0, 0.9, EvidenceSource::Photo);
        ev.merged.reflected_temperature =
            ExtractedField::found(26.5, 0.9, EvidenceSource::Photo);

        let findings = validate(&ev);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].code, "TEMP-001");

        // Same data on a grounding analysis: the check is not applicable.
        let mut grounding = evidence(TestType::Grounding);
        grounding.merged.ambient_temperature =
            ExtractedField::found(24.0, 0.9, EvidenceSource::Photo);
        grounding.merged.reflected_temperature =
            ExtractedField::found(26.5, 0.9, EvidenceSource::Photo);
        assert!(validate(&grounding).is_empty());
    }

    #[test]
    fn temperature_within_tolerance_passes() {
        let mut ev = evidence(TestType::Thermography);
        ev.merged.ambient_temperature =
            ExtractedField::found(24.0, 0.9, EvidenceSource::Photo);
        ev.merged.reflected_temperature =
            ExtractedField::found(24.9, 0.9, EvidenceSource::Photo);
        assert!(validate(&ev).is_empty());
    }

    #[test]
    fn serial_mismatch_is_critical() {
        let mut ev = evidence(TestType::Megger);
        ev.serial_candidates
            .push(candidate("FLK-1587-0042", EvidenceSource::Certificate));
        ev.serial_candidates
            .push(candidate("FLK 1587 0042", EvidenceSource::Photo));
        ev.serial_candidates
            .push(candidate("FLK-1587-0099", EvidenceSource::Instrument));

        let findings = validate(&ev);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].code, "SER-001");
        assert_eq!(findings[0].severity, Severity::Critical);
        assert!(findings[0].found.contains("0099"));
    }

    #[test]
    fn serial_formats_normalize_identically() {
        let mut ev = evidence(TestType::Megger);
        ev.serial_candidates
            .push(candidate("FLK-1587-0042", EvidenceSource::Certificate));
        ev.serial_candidates
            .push(candidate("flk 1587.0042", EvidenceSource::Photo));
        assert!(validate(&ev).is_empty());
    }

    #[test]
    fn display_vs_table_minor_beyond_five_percent() {
        let mut ev = evidence(TestType::Grounding);
        ev.merged.display_value = ExtractedField::found(4.5, 0.9, EvidenceSource::Photo);
        ev.merged.table_value = ExtractedField::found(4.2, 0.9, EvidenceSource::DataTable);

        let findings = validate(&ev);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].code, "VAL-001");
        assert_eq!(findings[0].severity, Severity::Minor);
    }

    #[test]
    fn display_vs_table_within_tolerance_passes() {
        let mut ev = evidence(TestType::Grounding);
        ev.merged.display_value = ExtractedField::found(4.25, 0.9, EvidenceSource::Photo);
        ev.merged.table_value = ExtractedField::found(4.2, 0.9, EvidenceSource::DataTable);
        assert!(validate(&ev).is_empty());
    }

    #[test]
    fn zero_table_value_skips_ratio_check() {
        let mut ev = evidence(TestType::Grounding);
        ev.merged.display_value = ExtractedField::found(1.0, 0.9, EvidenceSource::Photo);
        ev.merged.table_value = ExtractedField::found(0.0, 0.9, EvidenceSource::DataTable);
        assert!(validate(&ev).is_empty());
    }

    #[test]
    fn findings_come_out_in_priority_order() {
        let mut ev = evidence(TestType::Thermography);
        ev.merged.calibration_expiry = ExtractedField::found(
            Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap(),
            0.9,
            EvidenceSource::Certificate,
        );
        ev.merged.measurement_date = ExtractedField::found(
            Utc.with_ymd_and_hms(2025, 1, 11, 0, 0, 0).unwrap(),
            0.9,
            EvidenceSource::ReportHeader,
        );
        ev.tag_candidates
            .push(candidate("EQ-01", EvidenceSource::ReportHeader));
        ev.tag_candidates
            .push(candidate("EQ-02", EvidenceSource::Photo));
        ev.merged.ambient_temperature =
            ExtractedField::found(20.0, 0.9, EvidenceSource::Photo);
        ev.merged.reflected_temperature =
            ExtractedField::found(25.0, 0.9, EvidenceSource::Photo);
        ev.merged.display_value = ExtractedField::found(9.0, 0.9, EvidenceSource::Photo);
        ev.merged.table_value = ExtractedField::found(5.0, 0.9, EvidenceSource::DataTable);

        let inconsistencies = validate(&ev);
        let codes: Vec<&str> = inconsistencies.iter().map(|f| f.code.as_str()).collect();
        assert_eq!(codes, ["CAL-001", "TAG-001", "TEMP-001", "VAL-001"]);
    }
}
