//! CRUD operations for the `jobs` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job row. Enum and timestamp columns are stored as text.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub owner_id: String,
    pub filename: String,
    pub original_name: String,
    pub input_path: String,
    pub file_type: String,
    pub mime_type: Option<String>,
    pub engine_kind: String,
    pub status: String,
    /// Canonical audit serialized as JSON.
    pub audit: Option<String>,
    pub log: String,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            filename: row.get("filename")?,
            original_name: row.get("original_name")?,
            input_path: row.get("input_path")?,
            file_type: row.get("file_type")?,
            mime_type: row.get("mime_type")?,
            engine_kind: row.get("engine_kind")?,
            status: row.get("status")?,
            audit: row.get("audit")?,
            log: row.get("log")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, owner_id, filename, original_name, input_path, file_type,
             mime_type, engine_kind, status, audit, log, created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                job.id,
                job.owner_id,
                job.filename,
                job.original_name,
                job.input_path,
                job.file_type,
                job.mime_type,
                job.engine_kind,
                job.status,
                job.audit,
                job.log,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites the mutable columns: status, audit, log and timestamps.
///
/// Rows already in a terminal state are never touched. Returns false when no
/// row has this id or the stored job has already finished.
pub fn update(db: &Database, job: &JobRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = ?2, audit = ?3, log = ?4, updated_at = ?5,
             completed_at = ?6 WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
            params![
                job.id,
                job.status,
                job.audit,
                job.log,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(changed > 0)
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Jobs belonging to `owner_id`, newest first.
pub fn list_by_owner(db: &Database, owner_id: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map(params![owner_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Every job, newest first.
pub fn list_all(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY created_at DESC, rowid DESC")?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Removes a job row. Returns false when it did not exist.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
