use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }
    };
}

str_enum!(TestType {
    Grounding => "grounding",
    Megger => "megger",
    Thermography => "thermography",
});

str_enum!(AnalysisStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

str_enum!(Severity {
    Critical => "critical",
    Major => "major",
    Minor => "minor",
});

str_enum!(Verdict {
    Approved => "approved",
    ApprovedWithComments => "approved_with_comments",
    Rejected => "rejected",
});

str_enum!(ContentType {
    AnalysisResult => "analysis_result",
    ManualCorrection => "manual_correction",
    TechnicalStandard => "technical_standard",
    BestPractice => "best_practice",
});

str_enum!(DocumentKind {
    ThermalImage => "thermal_image",
    VisiblePhoto => "visible_photo",
    CalibrationCertificate => "calibration_certificate",
});

str_enum!(EvidenceSource {
    ReportHeader => "report_header",
    Photo => "photo",
    DataTable => "data_table",
    Certificate => "certificate",
    Instrument => "instrument",
    NotFound => "not_found",
});

str_enum!(DetailLevel {
    Low => "low",
    High => "high",
    Auto => "auto",
});

impl AnalysisStatus {
    /// Terminal statuses can only leave via re-analysis.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl Severity {
    /// Sort key: lower ranks first (most severe first).
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::Major => 1,
            Self::Minor => 2,
        }
    }
}

impl TestType {
    pub fn all() -> &'static [TestType] {
        &[Self::Grounding, Self::Megger, Self::Thermography]
    }
}

/// The six insulation-resistance phase combinations a megger report must cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PhaseCombination {
    #[serde(rename = "L1-L2")]
    L1L2,
    #[serde(rename = "L1-L3")]
    L1L3,
    #[serde(rename = "L2-L3")]
    L2L3,
    #[serde(rename = "L1-E")]
    L1E,
    #[serde(rename = "L2-E")]
    L2E,
    #[serde(rename = "L3-E")]
    L3E,
}

impl PhaseCombination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L1L2 => "L1-L2",
            Self::L1L3 => "L1-L3",
            Self::L2L3 => "L2-L3",
            Self::L1E => "L1-E",
            Self::L2E => "L2-E",
            Self::L3E => "L3-E",
        }
    }

    /// Tolerates "L1L2", "l1-l2", "L1/L2", "L1-PE" style labels from model output.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let norm: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase();
        match norm.as_str() {
            "L1L2" => Some(Self::L1L2),
            "L1L3" => Some(Self::L1L3),
            "L2L3" => Some(Self::L2L3),
            "L1E" | "L1PE" => Some(Self::L1E),
            "L2E" | "L2PE" => Some(Self::L2E),
            "L3E" | "L3PE" => Some(Self::L3E),
            _ => None,
        }
    }

    pub fn all() -> &'static [PhaseCombination] {
        &[
            Self::L1L2,
            Self::L1L3,
            Self::L2L3,
            Self::L1E,
            Self::L2E,
            Self::L3E,
        ]
    }
}

impl std::fmt::Display for PhaseCombination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
