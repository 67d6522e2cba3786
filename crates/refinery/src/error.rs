use std::path::PathBuf;
use thiserror::Error;

use crate::audit::AuditError;
use crate::engine::EngineError;
use crate::job::{InvalidTransition, JobStatus};

#[derive(Error, Debug)]
pub enum RefineryError {
    #[error("Upload rejected for '{filename}': {reason}")]
    UploadRejected { filename: String, reason: String },

    #[error("Engine invocation failed: {0}")]
    EngineInvocation(#[from] EngineError),

    #[error("Invalid audit: {0}")]
    InvalidAudit(#[from] AuditError),

    #[error("Processed file not found on disk for job {job_id} (checked: {})", candidates.join(", "))]
    ArtifactNotFound {
        job_id: String,
        candidates: Vec<String>,
    },

    #[error("User not authorized for job {job_id}")]
    Unauthorized { job_id: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {job_id} is not ready for download (status: {status})")]
    NotReady { job_id: String, status: JobStatus },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Job queue is full (capacity {capacity}), submission rejected")]
    QueueFull { capacity: usize },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove file '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Worker pool misconfigured: {0}")]
    InvalidPool(String),
}

pub type Result<T> = std::result::Result<T, RefineryError>;
