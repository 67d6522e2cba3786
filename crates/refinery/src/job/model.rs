use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::AuditRecord;

/// Status of a job.
///
/// `Pending -> Processing -> {Completed, Failed}`; terminal states never change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Returns true if `next` is a legal forward step from `self`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Which processing engine a job is dispatched to. Fixed at creation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Standard,
    Premium,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Standard => "standard",
            EngineKind::Premium => "premium",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(EngineKind::Standard),
            "premium" => Ok(EngineKind::Premium),
            other => Err(format!(
                "unknown engine kind '{}' (expected 'standard' or 'premium')",
                other
            )),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Illegal job status transition for {job_id}: {from} -> {to}")]
pub struct InvalidTransition {
    pub job_id: String,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One uploaded dataset and its processing state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job identifier.
    pub id: String,
    /// Principal that submitted the dataset.
    pub owner_id: String,
    /// Stored filename in the upload directory.
    pub filename: String,
    /// Filename as uploaded by the user.
    pub original_name: String,
    /// Location of the uploaded artifact.
    pub input_path: PathBuf,
    /// Lowercase extension of the original upload (e.g. "csv").
    pub file_type: String,
    /// MIME type guessed from the original filename.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub engine_kind: EngineKind,
    pub status: JobStatus,
    /// Canonical audit; present iff `status == Completed`.
    pub audit: Option<AuditRecord>,
    /// Append-only diagnostic trail.
    pub log: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a new job in `Pending` state.
    pub fn new(
        owner_id: &str,
        filename: &str,
        original_name: &str,
        input_path: PathBuf,
        engine_kind: EngineKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            filename: filename.to_string(),
            original_name: original_name.to_string(),
            input_path,
            file_type: file_type_of(original_name),
            mime_type: Self::detect_mime_type(Path::new(original_name)),
            engine_kind,
            status: JobStatus::Pending,
            audit: None,
            log: String::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }

    /// Moves the job one step along the state machine.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                job_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Appends a timestamped line to the diagnostic log.
    pub fn append_log(&mut self, entry: &str) {
        let _ = writeln!(
            self.log,
            "[{}] {}",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            entry.trim_end()
        );
    }

    fn detect_mime_type(path: &Path) -> Option<String> {
        mime_guess::from_path(path).first().map(|m| m.to_string())
    }
}

/// Lowercase extension without the dot, or an empty string.
pub fn file_type_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}
