//! Core types for the extraction pipeline.
//!
//! `ExtractedField` carries one fact from one evidence source with its model
//! confidence. `NormalizedExtraction` is the per-document field map; the
//! batch layer merges several of them into a `ConsolidatedEvidence` for the
//! validator and rules engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ExtractionError;
use crate::models::{DetailLevel, EvidenceSource, PhaseCombination, TestType};

// ═══════════════════════════════════════════
// Vision-model seam
// ═══════════════════════════════════════════

/// Token counts reported by the vision model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One chat-with-image call to the external vision model.
#[derive(Debug, Clone)]
pub struct VisionCall {
    pub model: String,
    pub system: String,
    pub prompt: String,
    /// Base64-encoded images.
    pub images: Vec<String>,
    pub detail: DetailLevel,
}

/// Raw response from the external vision model.
#[derive(Debug, Clone)]
pub struct VisionResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// External vision-language capability; any OpenAI-style chat-completions
/// backend works. Implementations must accept any model string, including a
/// fallback model swapped in mid-retry.
pub trait VisionModelClient: Send + Sync {
    fn call(&self, request: &VisionCall) -> Result<VisionResponse, ExtractionError>;
}

// ═══════════════════════════════════════════
// Extracted fields
// ═══════════════════════════════════════════

/// One fact pulled from one evidence source.
///
/// Invariant: `value == None` implies `confidence == 0.0` and
/// `source == EvidenceSource::NotFound`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField<T> {
    pub value: Option<T>,
    pub confidence: f32,
    pub source: EvidenceSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl<T> ExtractedField<T> {
    pub fn found(value: T, confidence: f32, source: EvidenceSource) -> Self {
        Self {
            value: Some(value),
            confidence: confidence.clamp(0.0, 1.0),
            source,
            reason: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            value: None,
            confidence: 0.0,
            source: EvidenceSource::NotFound,
            reason: None,
        }
    }

    pub fn not_found_because(reason: &str) -> Self {
        Self {
            reason: Some(reason.to_string()),
            ..Self::not_found()
        }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    /// Pick the better of two candidates: highest confidence among non-null
    /// values; ties (and equal confidence) keep `self`, i.e. the
    /// earliest-processed source.
    pub fn better(self, other: Self) -> Self {
        match (self.is_present(), other.is_present()) {
            (true, true) => {
                if other.confidence > self.confidence {
                    other
                } else {
                    self
                }
            }
            (true, false) => self,
            (false, true) => other,
            (false, false) => self,
        }
    }
}

impl<T> Default for ExtractedField<T> {
    fn default() -> Self {
        Self::not_found()
    }
}

// ═══════════════════════════════════════════
// Per-document extraction
// ═══════════════════════════════════════════

/// A spot temperature reading from a thermal image (one per phase/point).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotReading {
    pub label: String,
    pub temperature: f64,
    pub confidence: f32,
}

/// A load (current) reading documented alongside a thermography inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadReading {
    pub label: String,
    pub amps: f64,
}

/// All fields pulled from one document/image. Built fresh per extraction
/// call and never mutated in place; merging produces a new value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedExtraction {
    pub equipment_tag: ExtractedField<String>,
    pub serial_number: ExtractedField<String>,
    pub calibration_expiry: ExtractedField<DateTime<Utc>>,
    pub measurement_date: ExtractedField<DateTime<Utc>>,
    pub ambient_temperature: ExtractedField<f64>,
    pub reflected_temperature: ExtractedField<f64>,
    pub ground_resistance: ExtractedField<f64>,
    pub insulation_readings: BTreeMap<PhaseCombination, ExtractedField<f64>>,
    pub absorption_index: ExtractedField<f64>,
    pub spot_readings: Vec<SpotReading>,
    pub load_readings: Vec<LoadReading>,
    pub watermark_present: ExtractedField<bool>,
    pub signature_present: ExtractedField<bool>,
    /// Value shown on the instrument display in the photo.
    pub display_value: ExtractedField<f64>,
    /// Same value as tabulated in the report.
    pub table_value: ExtractedField<f64>,
}

impl NormalizedExtraction {
    /// Confidences of every present field (for the overall analysis
    /// confidence).
    pub fn present_confidences(&self) -> Vec<f32> {
        let mut out = Vec::new();
        let mut push = |c: f32, present: bool| {
            if present {
                out.push(c);
            }
        };
        push(self.equipment_tag.confidence, self.equipment_tag.is_present());
        push(self.serial_number.confidence, self.serial_number.is_present());
        push(
            self.calibration_expiry.confidence,
            self.calibration_expiry.is_present(),
        );
        push(
            self.measurement_date.confidence,
            self.measurement_date.is_present(),
        );
        push(
            self.ambient_temperature.confidence,
            self.ambient_temperature.is_present(),
        );
        push(
            self.reflected_temperature.confidence,
            self.reflected_temperature.is_present(),
        );
        push(
            self.ground_resistance.confidence,
            self.ground_resistance.is_present(),
        );
        push(
            self.absorption_index.confidence,
            self.absorption_index.is_present(),
        );
        push(
            self.watermark_present.confidence,
            self.watermark_present.is_present(),
        );
        push(
            self.signature_present.confidence,
            self.signature_present.is_present(),
        );
        push(self.display_value.confidence, self.display_value.is_present());
        push(self.table_value.confidence, self.table_value.is_present());
        for field in self.insulation_readings.values() {
            if field.is_present() {
                out.push(field.confidence);
            }
        }
        for reading in &self.spot_readings {
            out.push(reading.confidence);
        }
        out
    }

    /// Merge `other` into a new extraction: per scalar field the candidate
    /// with the highest confidence wins (earliest source on ties), map
    /// entries merge per key, arrays concatenate.
    pub fn merged_with(&self, other: &NormalizedExtraction) -> NormalizedExtraction {
        let mut insulation = self.insulation_readings.clone();
        for (combo, field) in &other.insulation_readings {
            let merged = insulation
                .remove(combo)
                .unwrap_or_default()
                .better(field.clone());
            insulation.insert(*combo, merged);
        }

        let mut spot_readings = self.spot_readings.clone();
        spot_readings.extend(other.spot_readings.iter().cloned());
        let mut load_readings = self.load_readings.clone();
        load_readings.extend(other.load_readings.iter().cloned());

        NormalizedExtraction {
            equipment_tag: self.equipment_tag.clone().better(other.equipment_tag.clone()),
            serial_number: self.serial_number.clone().better(other.serial_number.clone()),
            calibration_expiry: self
                .calibration_expiry
                .clone()
                .better(other.calibration_expiry.clone()),
            measurement_date: self
                .measurement_date
                .clone()
                .better(other.measurement_date.clone()),
            ambient_temperature: self
                .ambient_temperature
                .clone()
                .better(other.ambient_temperature.clone()),
            reflected_temperature: self
                .reflected_temperature
                .clone()
                .better(other.reflected_temperature.clone()),
            ground_resistance: self
                .ground_resistance
                .clone()
                .better(other.ground_resistance.clone()),
            insulation_readings: insulation,
            absorption_index: self
                .absorption_index
                .clone()
                .better(other.absorption_index.clone()),
            spot_readings,
            load_readings,
            watermark_present: self
                .watermark_present
                .clone()
                .better(other.watermark_present.clone()),
            signature_present: self
                .signature_present
                .clone()
                .better(other.signature_present.clone()),
            display_value: self.display_value.clone().better(other.display_value.clone()),
            table_value: self.table_value.clone().better(other.table_value.clone()),
        }
    }
}

// ═══════════════════════════════════════════
// Consolidated evidence (validator input)
// ═══════════════════════════════════════════

/// A raw identification candidate as one source reported it, before
/// normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub raw: String,
    pub source: EvidenceSource,
    pub confidence: f32,
}

/// Merged fields plus every per-source identification candidate, so the
/// consistency validator can compare the same fact across sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedEvidence {
    pub test_type: TestType,
    pub merged: NormalizedExtraction,
    pub tag_candidates: Vec<RawCandidate>,
    pub serial_candidates: Vec<RawCandidate>,
}

impl ConsolidatedEvidence {
    pub fn new(test_type: TestType) -> Self {
        Self {
            test_type,
            merged: NormalizedExtraction::default(),
            tag_candidates: Vec::new(),
            serial_candidates: Vec::new(),
        }
    }
}

/// Hints threaded into the user prompts: expected identification for
/// targeted cross-checking, plus retrieval context from past analyses.
#[derive(Debug, Clone, Default)]
pub struct ExtractionHints {
    pub expected_tag: Option<String>,
    pub expected_serial: Option<String>,
    pub retrieval_context: Option<String>,
}
