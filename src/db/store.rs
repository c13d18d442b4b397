//! `AnalysisStore` — the seam between the orchestrator and the relational
//! store. `SqliteStore` is the bundled implementation; the trait keeps the
//! store swappable for the host application's own persistence.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use uuid::Uuid;

use super::repository;
use super::sqlite::{open_database, open_memory_database};
use super::DatabaseError;
use crate::models::{Analysis, AnalysisStatus, Feedback};

pub trait AnalysisStore: Send + Sync {
    fn create(&self, analysis: &Analysis) -> Result<(), DatabaseError>;
    fn get(&self, id: &Uuid) -> Result<Option<Analysis>, DatabaseError>;
    fn status(&self, id: &Uuid) -> Result<Option<AnalysisStatus>, DatabaseError>;

    /// Compare-and-set transition: `id` moves to `to` only if currently in
    /// `from`. Returns false when the guard did not match.
    fn transition(
        &self,
        id: &Uuid,
        from: &[AnalysisStatus],
        to: AnalysisStatus,
        error: Option<&str>,
    ) -> Result<bool, DatabaseError>;

    /// Guarded terminal write of results. Returns false when the guard did
    /// not match (e.g. the analysis was cancelled mid-pipeline).
    fn write_outcome(
        &self,
        analysis: &Analysis,
        from: &[AnalysisStatus],
    ) -> Result<bool, DatabaseError>;

    /// Terminal → PENDING reset, clearing prior results.
    fn reset_for_reanalysis(&self, id: &Uuid) -> Result<bool, DatabaseError>;

    fn list_by_company(&self, company_id: Option<&Uuid>) -> Result<Vec<Analysis>, DatabaseError>;

    fn insert_feedback(&self, feedback: &Feedback) -> Result<(), DatabaseError>;
    fn get_feedback(&self, id: &Uuid) -> Result<Option<Feedback>, DatabaseError>;
    fn mark_feedback_incorporated(&self, id: &Uuid) -> Result<(), DatabaseError>;
}

/// SQLite-backed store. The connection is behind a `Mutex` so one store can
/// be shared across worker threads.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(open_database(path)?),
        })
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(open_memory_database()?),
        })
    }

    /// Run `f` against the guarded connection.
    pub fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> R) -> R {
        let conn = self.conn.lock().expect("store mutex poisoned");
        f(&conn)
    }
}

impl AnalysisStore for SqliteStore {
    fn create(&self, analysis: &Analysis) -> Result<(), DatabaseError> {
        self.with_conn(|conn| repository::insert_analysis(conn, analysis))
    }

    fn get(&self, id: &Uuid) -> Result<Option<Analysis>, DatabaseError> {
        self.with_conn(|conn| repository::get_analysis(conn, id))
    }

    fn status(&self, id: &Uuid) -> Result<Option<AnalysisStatus>, DatabaseError> {
        self.with_conn(|conn| repository::get_status(conn, id))
    }

    fn transition(
        &self,
        id: &Uuid,
        from: &[AnalysisStatus],
        to: AnalysisStatus,
        error: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| repository::update_status_guarded(conn, id, from, to, error))
    }

    fn write_outcome(
        &self,
        analysis: &Analysis,
        from: &[AnalysisStatus],
    ) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| repository::write_outcome_guarded(conn, analysis, from))
    }

    fn reset_for_reanalysis(&self, id: &Uuid) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| repository::reset_for_reanalysis(conn, id))
    }

    fn list_by_company(&self, company_id: Option<&Uuid>) -> Result<Vec<Analysis>, DatabaseError> {
        self.with_conn(|conn| repository::list_analyses_by_company(conn, company_id))
    }

    fn insert_feedback(&self, feedback: &Feedback) -> Result<(), DatabaseError> {
        self.with_conn(|conn| repository::insert_feedback(conn, feedback))
    }

    fn get_feedback(&self, id: &Uuid) -> Result<Option<Feedback>, DatabaseError> {
        self.with_conn(|conn| repository::get_feedback(conn, id))
    }

    fn mark_feedback_incorporated(&self, id: &Uuid) -> Result<(), DatabaseError> {
        self.with_conn(|conn| repository::mark_feedback_incorporated(conn, id))
    }
}
