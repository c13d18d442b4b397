//! Knowledge store implementations: SQLite-backed (shared with the analysis
//! store) and in-memory (tests).

use std::sync::Mutex;

use uuid::Uuid;

use super::types::KnowledgeStore;
use super::RagError;
use crate::db::{repository, SqliteStore};
use crate::models::{ContentType, KnowledgeEmbedding, TestType, Verdict};

impl KnowledgeStore for SqliteStore {
    fn insert(&self, entry: &KnowledgeEmbedding) -> Result<(), RagError> {
        self.with_conn(|conn| repository::insert_knowledge(conn, entry))
            .map_err(RagError::from)
    }

    fn candidates(
        &self,
        company_id: Option<&Uuid>,
        content_types: &[ContentType],
        test_type: Option<TestType>,
        verdict: Option<Verdict>,
    ) -> Result<Vec<KnowledgeEmbedding>, RagError> {
        self.with_conn(|conn| {
            repository::knowledge_candidates(conn, company_id, content_types, test_type, verdict)
        })
        .map_err(RagError::from)
    }

    fn increment_use_count(&self, id: &Uuid) -> Result<(), RagError> {
        self.with_conn(|conn| repository::increment_use_count(conn, id))
            .map_err(RagError::from)
    }

    fn set_was_correct(&self, id: &Uuid, was_correct: bool) -> Result<(), RagError> {
        self.with_conn(|conn| repository::set_was_correct(conn, id, was_correct))
            .map_err(RagError::from)
    }
}

/// In-memory knowledge store for testing.
pub struct InMemoryKnowledgeStore {
    entries: Mutex<Vec<KnowledgeEmbedding>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn get(&self, id: &Uuid) -> Option<KnowledgeEmbedding> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == *id)
            .cloned()
    }
}

impl Default for InMemoryKnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeStore for InMemoryKnowledgeStore {
    fn insert(&self, entry: &KnowledgeEmbedding) -> Result<(), RagError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    fn candidates(
        &self,
        company_id: Option<&Uuid>,
        content_types: &[ContentType],
        test_type: Option<TestType>,
        verdict: Option<Verdict>,
    ) -> Result<Vec<KnowledgeEmbedding>, RagError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| content_types.contains(&e.content_type))
            .filter(|e| e.company_id.is_none() || e.company_id.as_ref() == company_id)
            .filter(|e| test_type.is_none() || e.test_type == test_type)
            .filter(|e| verdict.is_none() || e.verdict == verdict)
            .cloned()
            .collect())
    }

    fn increment_use_count(&self, id: &Uuid) -> Result<(), RagError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == *id) {
            entry.use_count += 1;
        }
        Ok(())
    }

    fn set_was_correct(&self, id: &Uuid, was_correct: bool) -> Result<(), RagError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|e| e.id == *id) {
            Some(entry) => {
                entry.was_correct = was_correct;
                Ok(())
            }
            None => Err(RagError::Store(format!("no entry {id}"))),
        }
    }
}
