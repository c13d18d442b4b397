//! Analysis CRUD with guarded (compare-and-set) status transitions.
//!
//! Every status-changing statement carries a `WHERE status IN (...)` guard so
//! concurrent workers and cancellation can never overwrite a terminal state.

use std::str::FromStr;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{parse_json, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::{Analysis, AnalysisStatus, TestType, Verdict};

const ANALYSIS_COLUMNS: &str = "id, company_id, test_type, status, documents, expected_tag, \
     expected_serial, extraction, non_conformities, verdict, score, confidence, input_tokens, \
     output_tokens, estimated_cost_usd, error, created_at, updated_at, completed_at";

fn status_in_clause(from: &[AnalysisStatus]) -> String {
    from.iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn insert_analysis(conn: &Connection, analysis: &Analysis) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO analyses (id, company_id, test_type, status, documents, expected_tag,
         expected_serial, extraction, non_conformities, verdict, score, confidence, input_tokens,
         output_tokens, estimated_cost_usd, error, created_at, updated_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            analysis.id.to_string(),
            analysis.company_id.map(|id| id.to_string()),
            analysis.test_type.as_str(),
            analysis.status.as_str(),
            serde_json::to_string(&analysis.documents).unwrap_or_else(|_| "[]".into()),
            analysis.expected_tag,
            analysis.expected_serial,
            analysis
                .extraction
                .as_ref()
                .map(|v| serde_json::to_string(v).unwrap_or_default()),
            serde_json::to_string(&analysis.non_conformities).unwrap_or_else(|_| "[]".into()),
            analysis.verdict.map(|v| v.as_str()),
            analysis.score,
            analysis.confidence,
            analysis.input_tokens as i64,
            analysis.output_tokens as i64,
            analysis.estimated_cost_usd,
            analysis.error,
            analysis.created_at.to_rfc3339(),
            analysis.updated_at.to_rfc3339(),
            analysis.completed_at.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}

pub fn get_analysis(conn: &Connection, id: &Uuid) -> Result<Option<Analysis>, DatabaseError> {
    let sql = format!("SELECT {ANALYSIS_COLUMNS} FROM analyses WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row(params![id.to_string()], |row| {
            Ok(AnalysisRow {
                id: row.get(0)?,
                company_id: row.get(1)?,
                test_type: row.get(2)?,
                status: row.get(3)?,
                documents: row.get(4)?,
                expected_tag: row.get(5)?,
                expected_serial: row.get(6)?,
                extraction: row.get(7)?,
                non_conformities: row.get(8)?,
                verdict: row.get(9)?,
                score: row.get(10)?,
                confidence: row.get(11)?,
                input_tokens: row.get(12)?,
                output_tokens: row.get(13)?,
                estimated_cost_usd: row.get(14)?,
                error: row.get(15)?,
                created_at: row.get(16)?,
                updated_at: row.get(17)?,
                completed_at: row.get(18)?,
            })
        })
        .optional()?;

    row.map(AnalysisRow::into_analysis).transpose()
}

/// Current status only (cheap poll used by workers and cancellation).
pub fn get_status(conn: &Connection, id: &Uuid) -> Result<Option<AnalysisStatus>, DatabaseError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM analyses WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|s| AnalysisStatus::from_str(&s)).transpose()
}

/// Transition `id` to `to` only if its current status is in `from`.
/// Returns false when the guard did not match (no row updated).
pub fn update_status_guarded(
    conn: &Connection,
    id: &Uuid,
    from: &[AnalysisStatus],
    to: AnalysisStatus,
    error: Option<&str>,
) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE analyses SET status = ?1, error = COALESCE(?2, error), updated_at = ?3
         WHERE id = ?4 AND status IN ({})",
        status_in_clause(from)
    );
    let updated = conn.execute(
        &sql,
        params![
            to.as_str(),
            error,
            Utc::now().to_rfc3339(),
            id.to_string()
        ],
    )?;
    Ok(updated > 0)
}

/// Write the full terminal outcome of `analysis`, guarded by `from`.
/// A cancelled analysis is never overwritten: the guard will not match.
pub fn write_outcome_guarded(
    conn: &Connection,
    analysis: &Analysis,
    from: &[AnalysisStatus],
) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE analyses SET status = ?1, extraction = ?2, non_conformities = ?3, verdict = ?4,
         score = ?5, confidence = ?6, input_tokens = ?7, output_tokens = ?8,
         estimated_cost_usd = ?9, error = ?10, updated_at = ?11, completed_at = ?12
         WHERE id = ?13 AND status IN ({})",
        status_in_clause(from)
    );
    let updated = conn.execute(
        &sql,
        params![
            analysis.status.as_str(),
            analysis
                .extraction
                .as_ref()
                .map(|v| serde_json::to_string(v).unwrap_or_default()),
            serde_json::to_string(&analysis.non_conformities).unwrap_or_else(|_| "[]".into()),
            analysis.verdict.map(|v| v.as_str()),
            analysis.score,
            analysis.confidence,
            analysis.input_tokens as i64,
            analysis.output_tokens as i64,
            analysis.estimated_cost_usd,
            analysis.error,
            Utc::now().to_rfc3339(),
            analysis.completed_at.map(|t| t.to_rfc3339()),
            analysis.id.to_string(),
        ],
    )?;
    Ok(updated > 0)
}

/// Reset a terminal analysis back to PENDING for re-analysis, clearing results.
/// Returns false if the analysis is not in a terminal state.
pub fn reset_for_reanalysis(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let terminal = [
        AnalysisStatus::Completed,
        AnalysisStatus::Failed,
        AnalysisStatus::Cancelled,
    ];
    let sql = format!(
        "UPDATE analyses SET status = 'pending', extraction = NULL, non_conformities = '[]',
         verdict = NULL, score = NULL, confidence = NULL, error = NULL, completed_at = NULL,
         updated_at = ?1
         WHERE id = ?2 AND status IN ({})",
        status_in_clause(&terminal)
    );
    let updated = conn.execute(&sql, params![Utc::now().to_rfc3339(), id.to_string()])?;
    Ok(updated > 0)
}

/// Analyses for one tenant, best score first (NULL scores last).
pub fn list_analyses_by_company(
    conn: &Connection,
    company_id: Option<&Uuid>,
) -> Result<Vec<Analysis>, DatabaseError> {
    let sql = format!(
        "SELECT {ANALYSIS_COLUMNS} FROM analyses
         WHERE (?1 IS NULL AND company_id IS NULL) OR company_id = ?1
         ORDER BY score IS NULL, score DESC, created_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![company_id.map(|id| id.to_string())], |row| {
        Ok(AnalysisRow {
            id: row.get(0)?,
            company_id: row.get(1)?,
            test_type: row.get(2)?,
            status: row.get(3)?,
            documents: row.get(4)?,
            expected_tag: row.get(5)?,
            expected_serial: row.get(6)?,
            extraction: row.get(7)?,
            non_conformities: row.get(8)?,
            verdict: row.get(9)?,
            score: row.get(10)?,
            confidence: row.get(11)?,
            input_tokens: row.get(12)?,
            output_tokens: row.get(13)?,
            estimated_cost_usd: row.get(14)?,
            error: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
            completed_at: row.get(18)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_analysis()?);
    }
    Ok(out)
}

struct AnalysisRow {
    id: String,
    company_id: Option<String>,
    test_type: String,
    status: String,
    documents: String,
    expected_tag: Option<String>,
    expected_serial: Option<String>,
    extraction: Option<String>,
    non_conformities: String,
    verdict: Option<String>,
    score: Option<f64>,
    confidence: Option<f32>,
    input_tokens: i64,
    output_tokens: i64,
    estimated_cost_usd: f64,
    error: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl AnalysisRow {
    fn into_analysis(self) -> Result<Analysis, DatabaseError> {
        Ok(Analysis {
            id: parse_uuid("id", &self.id)?,
            company_id: self
                .company_id
                .as_deref()
                .map(|s| parse_uuid("company_id", s))
                .transpose()?,
            test_type: TestType::from_str(&self.test_type)?,
            status: AnalysisStatus::from_str(&self.status)?,
            documents: parse_json("documents", &self.documents)?,
            expected_tag: self.expected_tag,
            expected_serial: self.expected_serial,
            extraction: self
                .extraction
                .as_deref()
                .map(|s| parse_json("extraction", s))
                .transpose()?,
            non_conformities: parse_json("non_conformities", &self.non_conformities)?,
            verdict: self
                .verdict
                .as_deref()
                .map(Verdict::from_str)
                .transpose()?,
            score: self.score,
            confidence: self.confidence,
            input_tokens: self.input_tokens as u64,
            output_tokens: self.output_tokens as u64,
            estimated_cost_usd: self.estimated_cost_usd,
            error: self.error,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(|s| parse_timestamp("completed_at", s))
                .transpose()?,
        })
    }
}
