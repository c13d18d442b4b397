//! Knowledge-embedding rows: append-only inserts plus the narrow updates the
//! retrieval loop needs (`use_count`, `was_correct`).
//!
//! Embeddings are stored as little-endian f32 BLOBs.

use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{parse_json, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::{ContentType, KnowledgeEmbedding, TestType, Verdict};

pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, DatabaseError> {
    if bytes.len() % 4 != 0 {
        return Err(DatabaseError::CorruptColumn {
            column: "embedding".into(),
            reason: format!("blob length {} not a multiple of 4", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn insert_knowledge(
    conn: &Connection,
    entry: &KnowledgeEmbedding,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO knowledge_embeddings (id, company_id, analysis_id, content_type, test_type,
         verdict, content, embedding, metadata, was_correct, use_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            entry.id.to_string(),
            entry.company_id.map(|id| id.to_string()),
            entry.analysis_id.map(|id| id.to_string()),
            entry.content_type.as_str(),
            entry.test_type.map(|t| t.as_str()),
            entry.verdict.map(|v| v.as_str()),
            entry.content,
            encode_embedding(&entry.embedding),
            serde_json::to_string(&entry.metadata).unwrap_or_else(|_| "{}".into()),
            entry.was_correct as i32,
            entry.use_count as i64,
            entry.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Rows visible to `company_id` (own rows plus global rows), optionally
/// narrowed by content type, test type, and verdict. Similarity ranking
/// happens in the retrieval layer; this only applies the relational filters.
pub fn knowledge_candidates(
    conn: &Connection,
    company_id: Option<&Uuid>,
    content_types: &[ContentType],
    test_type: Option<TestType>,
    verdict: Option<Verdict>,
) -> Result<Vec<KnowledgeEmbedding>, DatabaseError> {
    if content_types.is_empty() {
        return Ok(Vec::new());
    }
    let types_clause = content_types
        .iter()
        .map(|t| format!("'{}'", t.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "SELECT id, company_id, analysis_id, content_type, test_type, verdict, content,
         embedding, metadata, was_correct, use_count, created_at
         FROM knowledge_embeddings
         WHERE content_type IN ({types_clause})
           AND (company_id IS NULL OR company_id = ?1)
           AND (?2 IS NULL OR test_type = ?2)
           AND (?3 IS NULL OR verdict = ?3)"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            company_id.map(|id| id.to_string()),
            test_type.map(|t| t.as_str()),
            verdict.map(|v| v.as_str()),
        ],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Vec<u8>>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, i32>(9)?,
                row.get::<_, i64>(10)?,
                row.get::<_, String>(11)?,
            ))
        },
    )?;

    let mut out = Vec::new();
    for row in rows {
        let (
            id,
            company,
            analysis_id,
            content_type,
            row_test_type,
            row_verdict,
            content,
            blob,
            metadata,
            was_correct,
            use_count,
            created_at,
        ) = row?;
        out.push(KnowledgeEmbedding {
            id: parse_uuid("id", &id)?,
            company_id: company
                .as_deref()
                .map(|s| parse_uuid("company_id", s))
                .transpose()?,
            analysis_id: analysis_id
                .as_deref()
                .map(|s| parse_uuid("analysis_id", s))
                .transpose()?,
            content_type: ContentType::from_str(&content_type)?,
            test_type: row_test_type
                .as_deref()
                .map(TestType::from_str)
                .transpose()?,
            verdict: row_verdict.as_deref().map(Verdict::from_str).transpose()?,
            content,
            embedding: decode_embedding(&blob)?,
            metadata: parse_json("metadata", &metadata)?,
            was_correct: was_correct != 0,
            use_count: use_count as u32,
            created_at: parse_timestamp("created_at", &created_at)?,
        });
    }
    Ok(out)
}

pub fn increment_use_count(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE knowledge_embeddings SET use_count = use_count + 1 WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(())
}

pub fn set_was_correct(
    conn: &Connection,
    id: &Uuid,
    was_correct: bool,
) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE knowledge_embeddings SET was_correct = ?1 WHERE id = ?2",
        params![was_correct as i32, id.to_string()],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "knowledge_embedding".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}
