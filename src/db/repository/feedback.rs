use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::Feedback;

pub fn insert_feedback(conn: &Connection, feedback: &Feedback) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO feedback (id, analysis_id, company_id, field, original_value,
         corrected_value, explanation, incorporated, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            feedback.id.to_string(),
            feedback.analysis_id.to_string(),
            feedback.company_id.map(|id| id.to_string()),
            feedback.field,
            feedback.original_value,
            feedback.corrected_value,
            feedback.explanation,
            feedback.incorporated as i32,
            feedback.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_feedback(conn: &Connection, id: &Uuid) -> Result<Option<Feedback>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, analysis_id, company_id, field, original_value, corrected_value,
         explanation, incorporated, created_at
         FROM feedback WHERE id = ?1",
    )?;

    let row = stmt
        .query_row(params![id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, i32>(7)?,
                row.get::<_, String>(8)?,
            ))
        })
        .optional()?;

    row.map(
        |(id, analysis_id, company_id, field, original, corrected, explanation, inc, created)| {
            Ok(Feedback {
                id: parse_uuid("id", &id)?,
                analysis_id: parse_uuid("analysis_id", &analysis_id)?,
                company_id: company_id
                    .as_deref()
                    .map(|s| parse_uuid("company_id", s))
                    .transpose()?,
                field,
                original_value: original,
                corrected_value: corrected,
                explanation,
                incorporated: inc != 0,
                created_at: parse_timestamp("created_at", &created)?,
            })
        },
    )
    .transpose()
}

/// Mark a feedback record as incorporated into the knowledge store.
pub fn mark_feedback_incorporated(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE feedback SET incorporated = 1 WHERE id = ?1",
        params![id.to_string()],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "feedback".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}
