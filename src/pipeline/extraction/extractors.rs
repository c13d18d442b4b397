//! Per-document-type extractors: thermal image, visible photo, calibration
//! certificate.
//!
//! Each extractor supplies a system prompt, a user-prompt builder
//! (parameterized by expected tag/serial for targeted cross-checking), and a
//! tolerant response normalizer. Normalizers never fail: a missing or
//! malformed field becomes `not_found`, confidences are clamped to [0, 1],
//! and arrays keep well-formed entries only.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use super::types::{
    ExtractedField, ExtractionHints, LoadReading, NormalizedExtraction, RawCandidate, SpotReading,
};
use crate::models::{DocumentKind, EvidenceSource};

// ═══════════════════════════════════════════
// Shared helpers
// ═══════════════════════════════════════════

/// Extract a JSON block from model response text.
/// Handles responses that include text before/after the JSON.
pub fn extract_json_block(response: &str) -> Option<&str> {
    let trimmed = response.trim();

    // Strip markdown code fences if present
    if let Some(start) = trimmed.find("```json") {
        let after_fence = &trimmed[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return Some(after_fence[..end].trim());
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        if let Some(end) = after_fence.find("```") {
            let block = after_fence[..end].trim();
            if block.starts_with('{') || block.starts_with('[') {
                return Some(block);
            }
        }
    }

    // Find the first { and last }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return Some(&trimmed[start..=end]);
        }
    }

    None
}

/// Parse a number from a possibly unit-suffixed string ("5.2 Ω" → 5.2).
fn parse_loose_f64(s: &str) -> Option<f64> {
    let trimmed = s.trim().replace(',', ".");
    let numeric: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        .collect();
    numeric.parse().ok()
}

/// Entry for `name`: accepts `{"value": x, "confidence": c}` or bare `x`.
/// Returns (value, confidence); confidence defaults to 0.5 when omitted.
fn field_parts<'a>(root: &'a Value, name: &str) -> Option<(&'a Value, f32)> {
    let entry = root.get(name)?;
    if entry.is_null() {
        return None;
    }
    if entry.is_object() {
        let value = entry.get("value")?;
        if value.is_null() {
            return None;
        }
        let confidence = entry
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c as f32)
            .unwrap_or(0.5);
        Some((value, confidence.clamp(0.0, 1.0)))
    } else {
        Some((entry, 0.5))
    }
}

fn field_str(root: &Value, name: &str, source: EvidenceSource) -> ExtractedField<String> {
    match field_parts(root, name) {
        Some((value, confidence)) => {
            let text = match value {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => return ExtractedField::not_found_because("non-text value"),
            };
            if text.is_empty() {
                return ExtractedField::not_found();
            }
            ExtractedField::found(text, confidence, source)
        }
        None => ExtractedField::not_found(),
    }
}

fn field_f64(root: &Value, name: &str, source: EvidenceSource) -> ExtractedField<f64> {
    match field_parts(root, name) {
        Some((value, confidence)) => {
            let number = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => parse_loose_f64(s),
                _ => None,
            };
            match number {
                Some(n) => ExtractedField::found(n, confidence, source),
                None => ExtractedField::not_found_because("non-numeric value"),
            }
        }
        None => ExtractedField::not_found(),
    }
}

fn field_bool(root: &Value, name: &str, source: EvidenceSource) -> ExtractedField<bool> {
    match field_parts(root, name) {
        Some((value, confidence)) => {
            let flag = match value {
                Value::Bool(b) => Some(*b),
                Value::String(s) => match s.trim().to_lowercase().as_str() {
                    "yes" | "true" | "present" => Some(true),
                    "no" | "false" | "absent" | "missing" => Some(false),
                    _ => None,
                },
                _ => None,
            };
            match flag {
                Some(b) => ExtractedField::found(b, confidence, source),
                None => ExtractedField::not_found_because("non-boolean value"),
            }
        }
        None => ExtractedField::not_found(),
    }
}

/// Accepts RFC 3339 timestamps or plain dates ("2025-03-14", "14/03/2025").
fn parse_loose_datetime(s: &str) -> Option<DateTime<Utc>> {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Utc
                .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
                .single();
        }
    }
    None
}

fn field_datetime(
    root: &Value,
    name: &str,
    source: EvidenceSource,
) -> ExtractedField<DateTime<Utc>> {
    match field_parts(root, name) {
        Some((value, confidence)) => {
            let parsed = value.as_str().and_then(parse_loose_datetime);
            match parsed {
                Some(dt) => ExtractedField::found(dt, confidence, source),
                None => ExtractedField::not_found_because("unparseable date"),
            }
        }
        None => ExtractedField::not_found(),
    }
}

fn hint_section(hints: &ExtractionHints) -> String {
    let mut section = String::new();
    if let Some(ref tag) = hints.expected_tag {
        section.push_str(&format!(
            "\nThe submitting technician declared equipment tag \"{tag}\". \
             Report what the document actually shows, even if it differs.\n"
        ));
    }
    if let Some(ref serial) = hints.expected_serial {
        section.push_str(&format!(
            "\nThe declared instrument serial is \"{serial}\". \
             Report what the document actually shows, even if it differs.\n"
        ));
    }
    if let Some(ref context) = hints.retrieval_context {
        section.push_str(&format!(
            "\nContext from similar past analyses and applicable standards:\n{context}\n"
        ));
    }
    section
}

/// Parsed output of one document: the field map plus the raw identification
/// candidates this document contributes to cross-source checks.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub extraction: NormalizedExtraction,
    pub tag_candidates: Vec<RawCandidate>,
    pub serial_candidates: Vec<RawCandidate>,
}

fn push_candidate(out: &mut Vec<RawCandidate>, field: &ExtractedField<String>) {
    if let Some(ref raw) = field.value {
        out.push(RawCandidate {
            raw: raw.clone(),
            source: field.source,
            confidence: field.confidence,
        });
    }
}

/// One document type's prompts and normalizer, consumed by the generic
/// batch driver.
pub trait DocumentExtractor: Send + Sync {
    fn kind(&self) -> DocumentKind;
    fn system_prompt(&self) -> &'static str;
    fn build_user_prompt(&self, hints: &ExtractionHints) -> String;
    /// Tolerant normalization; never fails.
    fn parse_response(&self, response: &str) -> ParsedDocument;
}

// ═══════════════════════════════════════════
// Thermal Image Extractor
// ═══════════════════════════════════════════

const THERMAL_SYSTEM_PROMPT: &str = "\
You are an electrical thermography report reader. You extract measurement \
data from infrared inspection captures. Output valid JSON only, no prose. \
Every field is an object {\"value\": ..., \"confidence\": 0.0-1.0}; use \
{\"value\": null, \"confidence\": 0.0} for anything not visible.";

pub struct ThermalImageExtractor;

impl ThermalImageExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ThermalImageExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentExtractor for ThermalImageExtractor {
    fn kind(&self) -> DocumentKind {
        DocumentKind::ThermalImage
    }

    fn system_prompt(&self) -> &'static str {
        THERMAL_SYSTEM_PROMPT
    }

    fn build_user_prompt(&self, hints: &ExtractionHints) -> String {
        format!(
            "Extract from this infrared capture:\n\
             {{\n\
               \"equipment_tag\": {{\"value\": \"tag shown in the image overlay\", \"confidence\": 0.0}},\n\
               \"measurement_date\": {{\"value\": \"YYYY-MM-DD\", \"confidence\": 0.0}},\n\
               \"ambient_temperature\": {{\"value\": 0.0, \"confidence\": 0.0}},\n\
               \"reflected_temperature\": {{\"value\": 0.0, \"confidence\": 0.0}},\n\
               \"spot_readings\": [{{\"label\": \"L1\", \"temperature\": 0.0, \"confidence\": 0.0}}],\n\
               \"load_readings\": [{{\"label\": \"load A\", \"amps\": 0.0}}]\n\
             }}\n\
             Temperatures in the scale shown on the capture. Include every \
             measurement spot visible.\n{}",
            hint_section(hints)
        )
    }

    fn parse_response(&self, response: &str) -> ParsedDocument {
        let Some(block) = extract_json_block(response) else {
            tracing::warn!(kind = %self.kind(), "No JSON block in model response");
            return ParsedDocument::default();
        };
        let Ok(root) = serde_json::from_str::<Value>(block) else {
            tracing::warn!(kind = %self.kind(), "Malformed JSON in model response");
            return ParsedDocument::default();
        };

        let mut extraction = NormalizedExtraction {
            equipment_tag: field_str(&root, "equipment_tag", EvidenceSource::Photo),
            measurement_date: field_datetime(&root, "measurement_date", EvidenceSource::Photo),
            ambient_temperature: field_f64(&root, "ambient_temperature", EvidenceSource::Photo),
            reflected_temperature: field_f64(&root, "reflected_temperature", EvidenceSource::Photo),
            ..NormalizedExtraction::default()
        };

        if let Some(spots) = root.get("spot_readings").and_then(Value::as_array) {
            for spot in spots {
                let label = spot.get("label").and_then(Value::as_str);
                let temperature = spot.get("temperature").and_then(Value::as_f64);
                let confidence = spot
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.5) as f32;
                if let (Some(label), Some(temperature)) = (label, temperature) {
                    extraction.spot_readings.push(SpotReading {
                        label: label.to_string(),
                        temperature,
                        confidence: confidence.clamp(0.0, 1.0),
                    });
                }
            }
        }

        if let Some(loads) = root.get("load_readings").and_then(Value::as_array) {
            for load in loads {
                let label = load.get("label").and_then(Value::as_str);
                let amps = load.get("amps").and_then(Value::as_f64);
                if let (Some(label), Some(amps)) = (label, amps) {
                    extraction.load_readings.push(LoadReading {
                        label: label.to_string(),
                        amps,
                    });
                }
            }
        }

        let mut parsed = ParsedDocument {
            extraction,
            ..ParsedDocument::default()
        };
        push_candidate(&mut parsed.tag_candidates, &parsed.extraction.equipment_tag);
        parsed
    }
}

// ═══════════════════════════════════════════
// Visible Photo Extractor
// ═══════════════════════════════════════════

const PHOTO_SYSTEM_PROMPT: &str = "\
You are an electrical test report reader. You extract measurement data from \
scanned report pages and site photos: header block, results table, \
instrument display, watermark, and signature. Output valid JSON only, no \
prose. Every field is an object {\"value\": ..., \"confidence\": 0.0-1.0}; \
use {\"value\": null, \"confidence\": 0.0} for anything not visible.";

pub struct VisiblePhotoExtractor;

impl VisiblePhotoExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for VisiblePhotoExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentExtractor for VisiblePhotoExtractor {
    fn kind(&self) -> DocumentKind {
        DocumentKind::VisiblePhoto
    }

    fn system_prompt(&self) -> &'static str {
        PHOTO_SYSTEM_PROMPT
    }

    fn build_user_prompt(&self, hints: &ExtractionHints) -> String {
        format!(
            "Extract from this report page / site photo:\n\
             {{\n\
               \"header_tag\": {{\"value\": \"equipment tag in the header block\", \"confidence\": 0.0}},\n\
               \"table_tag\": {{\"value\": \"equipment tag in the results table\", \"confidence\": 0.0}},\n\
               \"nameplate_tag\": {{\"value\": \"tag on the equipment nameplate\", \"confidence\": 0.0}},\n\
               \"serial_number\": {{\"value\": \"instrument serial visible in the photo\", \"confidence\": 0.0}},\n\
               \"measurement_date\": {{\"value\": \"YYYY-MM-DD\", \"confidence\": 0.0}},\n\
               \"ground_resistance\": {{\"value\": 0.0, \"confidence\": 0.0}},\n\
               \"insulation_readings\": [{{\"combination\": \"L1-L2\", \"megohms\": 0.0, \"confidence\": 0.0}}],\n\
               \"absorption_index\": {{\"value\": 0.0, \"confidence\": 0.0}},\n\
               \"display_value\": {{\"value\": 0.0, \"confidence\": 0.0}},\n\
               \"table_value\": {{\"value\": 0.0, \"confidence\": 0.0}},\n\
               \"watermark_present\": {{\"value\": true, \"confidence\": 0.0}},\n\
               \"signature_present\": {{\"value\": true, \"confidence\": 0.0}}\n\
             }}\n\
             display_value is the number on the instrument display; table_value \
             is the same measurement as tabulated in the report.\n{}",
            hint_section(hints)
        )
    }

    fn parse_response(&self, response: &str) -> ParsedDocument {
        let Some(block) = extract_json_block(response) else {
            tracing::warn!(kind = %self.kind(), "No JSON block in model response");
            return ParsedDocument::default();
        };
        let Ok(root) = serde_json::from_str::<Value>(block) else {
            tracing::warn!(kind = %self.kind(), "Malformed JSON in model response");
            return ParsedDocument::default();
        };

        let header_tag = field_str(&root, "header_tag", EvidenceSource::ReportHeader);
        let table_tag = field_str(&root, "table_tag", EvidenceSource::DataTable);
        let nameplate_tag = field_str(&root, "nameplate_tag", EvidenceSource::Photo);

        let mut extraction = NormalizedExtraction {
            serial_number: field_str(&root, "serial_number", EvidenceSource::Photo),
            measurement_date: field_datetime(&root, "measurement_date", EvidenceSource::ReportHeader),
            ground_resistance: field_f64(&root, "ground_resistance", EvidenceSource::DataTable),
            absorption_index: field_f64(&root, "absorption_index", EvidenceSource::DataTable),
            display_value: field_f64(&root, "display_value", EvidenceSource::Photo),
            table_value: field_f64(&root, "table_value", EvidenceSource::DataTable),
            watermark_present: field_bool(&root, "watermark_present", EvidenceSource::Photo),
            signature_present: field_bool(&root, "signature_present", EvidenceSource::Photo),
            ..NormalizedExtraction::default()
        };

        if let Some(rows) = root.get("insulation_readings").and_then(Value::as_array) {
            for row in rows {
                let combination = row
                    .get("combination")
                    .and_then(Value::as_str)
                    .and_then(crate::models::PhaseCombination::from_str_loose);
                let megohms = row.get("megohms").and_then(Value::as_f64);
                let confidence =
                    row.get("confidence").and_then(Value::as_f64).unwrap_or(0.5) as f32;
                if let (Some(combination), Some(megohms)) = (combination, megohms) {
                    extraction.insulation_readings.insert(
                        combination,
                        ExtractedField::found(
                            megohms,
                            confidence.clamp(0.0, 1.0),
                            EvidenceSource::DataTable,
                        ),
                    );
                }
            }
        }

        // Best tag candidate becomes the document's merged tag field.
        extraction.equipment_tag = header_tag
            .clone()
            .better(table_tag.clone())
            .better(nameplate_tag.clone());

        let mut parsed = ParsedDocument {
            extraction,
            ..ParsedDocument::default()
        };
        push_candidate(&mut parsed.tag_candidates, &header_tag);
        push_candidate(&mut parsed.tag_candidates, &table_tag);
        push_candidate(&mut parsed.tag_candidates, &nameplate_tag);
        push_candidate(
            &mut parsed.serial_candidates,
            &parsed.extraction.serial_number,
        );
        parsed
    }
}

// ═══════════════════════════════════════════
// Calibration Certificate Extractor
// ═══════════════════════════════════════════

const CERTIFICATE_SYSTEM_PROMPT: &str = "\
You are a calibration certificate reader for electrical test instruments. \
Output valid JSON only, no prose. Every field is an object \
{\"value\": ..., \"confidence\": 0.0-1.0}; use {\"value\": null, \
\"confidence\": 0.0} for anything not printed on the certificate.";

pub struct CalibrationCertificateExtractor;

impl CalibrationCertificateExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CalibrationCertificateExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentExtractor for CalibrationCertificateExtractor {
    fn kind(&self) -> DocumentKind {
        DocumentKind::CalibrationCertificate
    }

    fn system_prompt(&self) -> &'static str {
        CERTIFICATE_SYSTEM_PROMPT
    }

    fn build_user_prompt(&self, hints: &ExtractionHints) -> String {
        format!(
            "Extract from this calibration certificate:\n\
             {{\n\
               \"serial_number\": {{\"value\": \"instrument serial in the certificate body\", \"confidence\": 0.0}},\n\
               \"instrument_serial\": {{\"value\": \"serial on the instrument label photo, if shown\", \"confidence\": 0.0}},\n\
               \"calibration_expiry\": {{\"value\": \"YYYY-MM-DD\", \"confidence\": 0.0}}\n\
             }}\n{}",
            hint_section(hints)
        )
    }

    fn parse_response(&self, response: &str) -> ParsedDocument {
        let Some(block) = extract_json_block(response) else {
            tracing::warn!(kind = %self.kind(), "No JSON block in model response");
            return ParsedDocument::default();
        };
        let Ok(root) = serde_json::from_str::<Value>(block) else {
            tracing::warn!(kind = %self.kind(), "Malformed JSON in model response");
            return ParsedDocument::default();
        };

        let cert_serial = field_str(&root, "serial_number", EvidenceSource::Certificate);
        let instrument_serial = field_str(&root, "instrument_serial", EvidenceSource::Instrument);

        let extraction = NormalizedExtraction {
            serial_number: cert_serial.clone().better(instrument_serial.clone()),
            calibration_expiry: field_datetime(
                &root,
                "calibration_expiry",
                EvidenceSource::Certificate,
            ),
            ..NormalizedExtraction::default()
        };

        let mut parsed = ParsedDocument {
            extraction,
            ..ParsedDocument::default()
        };
        push_candidate(&mut parsed.serial_candidates, &cert_serial);
        push_candidate(&mut parsed.serial_candidates, &instrument_serial);
        parsed
    }
}

/// Extractor registry lookup by document kind.
pub fn extractor_for(kind: DocumentKind) -> Box<dyn DocumentExtractor> {
    match kind {
        DocumentKind::ThermalImage => Box::new(ThermalImageExtractor::new()),
        DocumentKind::VisiblePhoto => Box::new(VisiblePhotoExtractor::new()),
        DocumentKind::CalibrationCertificate => Box::new(CalibrationCertificateExtractor::new()),
    }
}
