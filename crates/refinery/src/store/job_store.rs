//! Job store: in-memory cache with optional write-through SQLite persistence.
//!
//! The cache is authoritative while the service runs; the database lets jobs
//! survive restarts. Terminal transitions go through [`JobStore::commit_terminal`],
//! which checks the state machine and applies status, audit and log together
//! under one lock.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::audit::AuditRecord;
use crate::db::job_repo::{self, JobRow};
use crate::db::{Database, DatabaseError};
use crate::job::{EngineKind, InvalidTransition, Job, JobStatus};

/// Log entry written to jobs that were still running when the service stopped.
pub const INTERRUPTED_MESSAGE: &str = "interrupted: service restarted before completion";

// ─── Row conversion ─────────────────────────────────────────────────────────

fn parse_timestamp(s: &str, job_id: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("Bad timestamp '{}' for job {}: {}", s, job_id, e);
            Utc::now()
        })
}

fn job_to_row(job: &Job) -> Result<JobRow, DatabaseError> {
    let audit = job
        .audit
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DatabaseError::CorruptAudit {
            job_id: job.id.clone(),
            source: e,
        })?;

    Ok(JobRow {
        id: job.id.clone(),
        owner_id: job.owner_id.clone(),
        filename: job.filename.clone(),
        original_name: job.original_name.clone(),
        input_path: job.input_path.to_string_lossy().into_owned(),
        file_type: job.file_type.clone(),
        mime_type: job.mime_type.clone(),
        engine_kind: job.engine_kind.as_str().to_string(),
        status: job.status.as_str().to_string(),
        audit,
        log: job.log.clone(),
        created_at: job.created_at.to_rfc3339(),
        updated_at: job.updated_at.to_rfc3339(),
        completed_at: job.completed_at.map(|t| t.to_rfc3339()),
    })
}

fn job_from_row(row: JobRow) -> Result<Job, DatabaseError> {
    let status = row.status.parse::<JobStatus>().unwrap_or_else(|e| {
        log::warn!("{} for job {}, treating as failed", e, row.id);
        JobStatus::Failed
    });
    let engine_kind = row.engine_kind.parse::<EngineKind>().unwrap_or_else(|e| {
        log::warn!("{} for job {}, treating as standard", e, row.id);
        EngineKind::Standard
    });
    let audit: Option<AuditRecord> = row
        .audit
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| DatabaseError::CorruptAudit {
            job_id: row.id.clone(),
            source: e,
        })?;

    Ok(Job {
        created_at: parse_timestamp(&row.created_at, &row.id),
        updated_at: parse_timestamp(&row.updated_at, &row.id),
        completed_at: row
            .completed_at
            .as_deref()
            .map(|t| parse_timestamp(t, &row.id)),
        input_path: PathBuf::from(row.input_path),
        id: row.id,
        owner_id: row.owner_id,
        filename: row.filename,
        original_name: row.original_name,
        file_type: row.file_type,
        mime_type: row.mime_type,
        engine_kind,
        status,
        audit,
        log: row.log,
    })
}

// ─── JobStore ───────────────────────────────────────────────────────────────

/// Terminal outcome handed to [`JobStore::commit_terminal`].
#[derive(Debug, Clone)]
pub enum Terminal {
    Completed(AuditRecord),
    Failed,
}

/// Result of a terminal commit.
#[derive(Debug, Clone)]
pub enum Commit {
    Applied(Job),
    /// The job was deleted while in flight; nothing was written.
    Discarded,
    /// The persisted job was already finished by another process. Holds the
    /// stored outcome, which wins.
    Superseded(Job),
}

/// Outcome of a guarded terminal write to the database.
enum Persisted {
    Written,
    Superseded(Job),
    Gone,
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<String, Job>,
    /// Jobs handed to this process's workers that have not committed yet.
    queued: HashSet<String>,
    /// Queued jobs deleted before their runner finished. Each entry is
    /// consumed once, either when the runner skips the job or at commit.
    tombstones: HashSet<String>,
}

#[derive(Default)]
pub struct JobStore {
    db: RwLock<Option<Database>>,
    table: RwLock<JobTable>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(db: Database) -> Self {
        let store = Self::new();
        store.set_database(db);
        store
    }

    pub fn set_database(&self, db: Database) {
        let mut guard = match self.db.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store DB lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *guard = Some(db);
    }

    pub fn database(&self) -> Option<Database> {
        let guard = match self.db.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store DB lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        guard.clone()
    }

    fn read_table(&self) -> RwLockReadGuard<'_, JobTable> {
        match self.table.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, JobTable> {
        match self.table.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Records a new job that this process will run. The cache entry is rolled
    /// back if persisting fails.
    pub fn insert(&self, job: Job) -> Result<(), DatabaseError> {
        let row = match self.database() {
            Some(_) => Some(job_to_row(&job)?),
            None => None,
        };
        let id = job.id.clone();
        {
            let mut table = self.write_table();
            table.jobs.insert(id.clone(), job);
            table.queued.insert(id.clone());
        }

        if let (Some(db), Some(row)) = (self.database(), row) {
            if let Err(e) = job_repo::insert(&db, &row) {
                let mut table = self.write_table();
                table.jobs.remove(&id);
                table.queued.remove(&id);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Returns a job by id, checking the cache and then the database.
    pub fn get(&self, job_id: &str) -> Option<Job> {
        {
            let table = self.read_table();
            if table.tombstones.contains(job_id) {
                return None;
            }
            if let Some(job) = table.jobs.get(job_id) {
                return Some(job.clone());
            }
        }

        let db = self.database()?;
        match job_repo::find_by_id(&db, job_id).and_then(|row| row.map(job_from_row).transpose())
        {
            Ok(job) => job,
            Err(e) => {
                log::error!("Failed to load job {} from database: {}", job_id, e);
                None
            }
        }
    }

    /// Jobs owned by `owner_id`, newest first.
    pub fn list_by_owner(&self, owner_id: &str) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .read_table()
            .jobs
            .values()
            .filter(|job| job.is_owned_by(owner_id))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn is_tombstoned(&self, job_id: &str) -> bool {
        self.read_table().tombstones.contains(job_id)
    }

    /// Consumes the tombstone of a job deleted before its runner started.
    /// Returns true when the job should be skipped.
    pub fn take_tombstone(&self, job_id: &str) -> bool {
        self.write_table().tombstones.remove(job_id)
    }

    /// Appends a line to a live job's log without changing its status.
    pub fn append_log(&self, job_id: &str, entry: &str) {
        let snapshot = {
            let mut table = self.write_table();
            match table.jobs.get_mut(job_id) {
                Some(job) if !job.is_finished() => {
                    job.append_log(entry);
                    job.clone()
                }
                _ => return,
            }
        };
        self.persist_update(&snapshot);
    }

    /// Applies the single terminal transition for a job.
    ///
    /// Status, audit, log and timestamps change together, so readers never see
    /// `completed` without an audit. Jobs deleted in flight are discarded, and
    /// a row already finished in the database keeps its outcome.
    pub fn commit_terminal(
        &self,
        job_id: &str,
        terminal: Terminal,
        log_entries: &[String],
    ) -> Result<Commit, InvalidTransition> {
        let mut table = self.write_table();
        if table.tombstones.remove(job_id) {
            log::info!("Discarding result for deleted job {}", job_id);
            return Ok(Commit::Discarded);
        }
        let Some(mut job) = table.jobs.get(job_id).cloned() else {
            log::info!("Discarding result for unknown job {}", job_id);
            return Ok(Commit::Discarded);
        };

        let next = match terminal {
            Terminal::Completed(_) => JobStatus::Completed,
            Terminal::Failed => JobStatus::Failed,
        };
        job.transition(next)?;

        if let Terminal::Completed(audit) = terminal {
            job.audit = Some(audit);
        }
        for entry in log_entries {
            job.append_log(entry);
        }
        table.queued.remove(job_id);

        // Written while holding the cache lock so readers never see a
        // terminal state the database later refuses.
        match self.persist_terminal(&job) {
            Persisted::Written => {
                table.jobs.insert(job.id.clone(), job.clone());
                Ok(Commit::Applied(job))
            }
            Persisted::Superseded(stored) => {
                table.jobs.insert(stored.id.clone(), stored.clone());
                Ok(Commit::Superseded(stored))
            }
            Persisted::Gone => {
                table.jobs.remove(job_id);
                Ok(Commit::Discarded)
            }
        }
    }

    /// Removes a job record. A job still waiting on this process's runner is
    /// tombstoned so its late result is discarded. Returns the removed job.
    pub fn delete(&self, job_id: &str) -> Option<Job> {
        let removed = {
            let mut table = self.write_table();
            if table.queued.remove(job_id) {
                table.tombstones.insert(job_id.to_string());
            }
            table.jobs.remove(job_id)
        };

        if let Some(db) = self.database() {
            if let Err(e) = job_repo::delete(&db, job_id) {
                log::error!("Failed to delete job {} from database: {}", job_id, e);
            }
        }
        removed
    }

    /// Removes a job that was never handed to a worker.
    pub fn forget(&self, job_id: &str) {
        {
            let mut table = self.write_table();
            table.queued.remove(job_id);
            table.jobs.remove(job_id);
        }
        if let Some(db) = self.database() {
            if let Err(e) = job_repo::delete(&db, job_id) {
                log::error!("Failed to delete job {} from database: {}", job_id, e);
            }
        }
    }

    /// Number of cached jobs per status.
    pub fn counts(&self) -> HashMap<JobStatus, usize> {
        let mut counts = HashMap::new();
        for job in self.read_table().jobs.values() {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        counts
    }

    /// Writes a terminal job, refusing to overwrite a row another process
    /// already finished or deleted.
    fn persist_terminal(&self, job: &Job) -> Persisted {
        let Some(db) = self.database() else {
            return Persisted::Written;
        };

        match job_to_row(job).and_then(|row| job_repo::update(&db, &row)) {
            Ok(true) => Persisted::Written,
            Ok(false) => {
                let stored = job_repo::find_by_id(&db, &job.id)
                    .and_then(|row| row.map(job_from_row).transpose());
                match stored {
                    Ok(Some(stored)) if stored.is_finished() => {
                        log::warn!(
                            "Job {} was already {} in the database, keeping the stored outcome",
                            job.id,
                            stored.status
                        );
                        Persisted::Superseded(stored)
                    }
                    Ok(Some(_)) => {
                        log::warn!("Job {} row was not updated", job.id);
                        Persisted::Written
                    }
                    Ok(None) => {
                        log::info!("Job {} was deleted from the database, discarding result", job.id);
                        Persisted::Gone
                    }
                    Err(e) => {
                        log::error!("Failed to re-read job {}: {}", job.id, e);
                        Persisted::Written
                    }
                }
            }
            Err(e) => {
                log::error!("Failed to persist job {}: {}", job.id, e);
                Persisted::Written
            }
        }
    }

    fn persist_update(&self, job: &Job) {
        let Some(db) = self.database() else {
            return;
        };
        let result = job_to_row(job).and_then(|row| job_repo::update(&db, &row));
        match result {
            Ok(true) => {}
            Ok(false) => log::warn!("Job {} has no unfinished database row to update", job.id),
            Err(e) => log::error!("Failed to persist job {}: {}", job.id, e),
        }
    }

    /// Loads persisted jobs into the cache as stored.
    ///
    /// Unfinished jobs are left alone: another process may still be running
    /// them. See [`JobStore::recover_interrupted`].
    pub fn load_from_database(&self) -> Result<usize, DatabaseError> {
        let Some(db) = self.database() else {
            return Ok(0);
        };

        let mut loaded = 0;
        for row in job_repo::list_all(&db)? {
            match job_from_row(row) {
                Ok(job) => {
                    self.write_table().jobs.insert(job.id.clone(), job);
                    loaded += 1;
                }
                Err(e) => log::warn!("Skipping unreadable job row: {}", e),
            }
        }

        log::info!("Loaded {} jobs from database into cache", loaded);
        Ok(loaded)
    }

    /// Fails every cached job that is unfinished and not owned by this
    /// process. Only call this when no other process is running jobs against
    /// the same database. Returns the number of jobs failed.
    pub fn recover_interrupted(&self) -> usize {
        let mut table = self.write_table();
        let stale: Vec<Job> = table
            .jobs
            .values()
            .filter(|job| !job.is_finished() && !table.queued.contains(&job.id))
            .cloned()
            .collect();

        let mut recovered = 0;
        for mut job in stale {
            if job.status == JobStatus::Pending {
                let _ = job.transition(JobStatus::Processing);
            }
            if job.transition(JobStatus::Failed).is_err() {
                continue;
            }
            job.append_log(INTERRUPTED_MESSAGE);

            match self.persist_terminal(&job) {
                Persisted::Written => {
                    log::warn!("Job {} was interrupted by a restart", job.id);
                    table.jobs.insert(job.id.clone(), job);
                    recovered += 1;
                }
                Persisted::Superseded(stored) => {
                    table.jobs.insert(stored.id.clone(), stored);
                }
                Persisted::Gone => {
                    table.jobs.remove(&job.id);
                }
            }
        }
        recovered
    }
}
