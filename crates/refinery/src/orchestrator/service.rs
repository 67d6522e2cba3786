//! Job Orchestrator service: the entry point for uploads, submissions, and
//! every owner-scoped job operation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::pool::WorkerPool;
use super::runner::JobRunner;
use crate::config::{validate_config, Config};
use crate::db::Database;
use crate::engine::EngineRegistry;
use crate::error::{RefineryError, Result};
use crate::job::{file_type_of, EngineKind, Job, JobEvent, JobEventBroadcaster, JobStatus};
use crate::sanitize;
use crate::storage::{ArtifactStore, Download};
use crate::store::JobStore;

/// A stored input artifact ready to be processed.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub owner_id: String,
    pub original_name: String,
    /// Path of the already-stored upload.
    pub input_path: PathBuf,
    pub engine_kind: EngineKind,
}

pub struct Orchestrator {
    config: Config,
    store: Arc<JobStore>,
    artifacts: ArtifactStore,
    events: JobEventBroadcaster,
    pool: WorkerPool,
}

impl Orchestrator {
    /// Builds an orchestrator around explicit collaborators.
    ///
    /// Spawns the worker pool, so it must be called inside a tokio runtime.
    pub fn new(config: Config, engines: EngineRegistry, store: Arc<JobStore>) -> Result<Self> {
        validate_config(&config)?;

        let artifacts = ArtifactStore::from_config(&config);
        artifacts.ensure_directories()?;

        let events = JobEventBroadcaster::default();
        let runner = Arc::new(JobRunner::new(
            Arc::clone(&store),
            engines,
            artifacts.clone(),
            events.clone(),
        ));
        let pool = WorkerPool::new(runner, config.worker_count, config.queue_capacity)?;

        Ok(Self {
            config,
            store,
            artifacts,
            events,
            pool,
        })
    }

    /// Production constructor: engines from config, optional SQLite persistence.
    pub fn from_config(config: Config) -> Result<Self> {
        let store = Arc::new(JobStore::new());
        if let Some(path) = &config.database_path {
            store.set_database(Database::open(path)?);
            let loaded = store.load_from_database()?;
            info!("Reloaded {} jobs: {:?}", loaded, store.counts());
        }

        let engines = EngineRegistry::from_config(&config);
        Self::new(config, engines, store)
    }

    /// Fails persisted jobs left unfinished by a process that is gone.
    ///
    /// Jobs this orchestrator queued are never touched. Call it only when no
    /// other process shares the database.
    pub fn recover_interrupted(&self) -> usize {
        let recovered = self.store.recover_interrupted();
        if recovered > 0 {
            warn!("Failed {} interrupted jobs", recovered);
        } else {
            info!("No interrupted jobs to recover");
        }
        recovered
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Stores uploaded bytes and submits them as a new job.
    pub fn upload(
        &self,
        owner_id: &str,
        original_name: &str,
        content: &[u8],
        engine_kind: EngineKind,
    ) -> Result<Job> {
        let safe_name = self.check_upload_name(original_name)?;
        let stored = self.artifacts.store_upload(&safe_name, content)?;

        let request = SubmitRequest {
            owner_id: owner_id.to_string(),
            original_name: original_name.to_string(),
            input_path: stored.path.clone(),
            engine_kind,
        };

        self.submit(request).inspect_err(|_| {
            crate::storage::remove_if_present(&stored.path);
        })
    }

    /// Creates the job in `processing` state and queues it.
    ///
    /// Returns as soon as the job is queued; the engine runs in the background.
    pub fn submit(&self, request: SubmitRequest) -> Result<Job> {
        self.check_upload_name(&request.original_name)?;

        let filename = sanitize::redact_path(&request.input_path);
        let mut job = Job::new(
            &request.owner_id,
            &filename,
            &request.original_name,
            request.input_path,
            request.engine_kind,
        );
        job.transition(JobStatus::Processing)?;
        job.append_log(&format!("Queued for {} processing", job.engine_kind));

        self.store.insert(job.clone())?;

        if let Err(e) = self.pool.try_submit(job.clone()) {
            warn!("Rejecting job {}: {}", job.id, e);
            self.store.forget(&job.id);
            return Err(e);
        }

        info!(
            "Submitted job {} ({}, {})",
            job.id, filename, job.engine_kind
        );
        self.events.send(JobEvent::for_job(&job, "submitted"));
        Ok(job)
    }

    /// All jobs of `owner_id`, newest first. Audits are `None` until completed.
    pub fn list_jobs(&self, owner_id: &str) -> Vec<Job> {
        self.store.list_by_owner(owner_id)
    }

    pub fn get_job(&self, owner_id: &str, job_id: &str) -> Result<Job> {
        let job = self
            .store
            .get(job_id)
            .ok_or_else(|| RefineryError::JobNotFound(job_id.to_string()))?;

        if !job.is_owned_by(owner_id) {
            return Err(RefineryError::Unauthorized {
                job_id: job_id.to_string(),
            });
        }
        Ok(job)
    }

    /// Deletes a job and its artifacts. An in-flight engine run is not stopped;
    /// its result is discarded when it arrives.
    pub fn delete_job(&self, owner_id: &str, job_id: &str) -> Result<Vec<PathBuf>> {
        let job = self.get_job(owner_id, job_id)?;

        self.store.delete(&job.id);
        let removed = self.artifacts.remove_artifacts(&job);

        info!(
            "Deleted job {} ({} artifacts removed)",
            job.id,
            removed.len()
        );
        Ok(removed)
    }

    /// Locates the cleaned output of a completed job.
    pub fn download(&self, owner_id: &str, job_id: &str) -> Result<Download> {
        let job = self.get_job(owner_id, job_id)?;
        self.artifacts.resolver().resolve(&job)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Waits until the job reaches a terminal state or `timeout` elapses,
    /// then returns the latest snapshot.
    pub async fn wait_for_terminal(&self, job_id: &str, timeout: Duration) -> Result<Job> {
        // Subscribe before checking the store so the terminal event cannot slip by.
        let mut events = self.events.subscribe();

        let current = self
            .store
            .get(job_id)
            .ok_or_else(|| RefineryError::JobNotFound(job_id.to_string()))?;
        if current.is_finished() {
            return Ok(current);
        }

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(event) if event.job_id == job_id && event.is_terminal() => break,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event receiver lagged by {} events", skipped);
                        if self.store.get(job_id).map_or(true, |job| job.is_finished()) {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };

        if tokio::time::timeout(timeout, wait).await.is_err() {
            warn!("Timed out waiting for job {}", job_id);
        }

        self.store
            .get(job_id)
            .ok_or_else(|| RefineryError::JobNotFound(job_id.to_string()))
    }

    /// Validates an upload name against the allow-list and returns its safe form.
    fn check_upload_name(&self, original_name: &str) -> Result<String> {
        let reject = |reason: String| RefineryError::UploadRejected {
            filename: original_name.to_string(),
            reason,
        };

        let safe_name = sanitize::sanitize_filename(original_name)
            .ok_or_else(|| reject("filename is empty".to_string()))?;

        let extension = file_type_of(&safe_name);
        if !self.config.is_extension_allowed(&extension) {
            return Err(reject(format!(
                "unsupported file type '{}' (allowed: {})",
                extension,
                self.config.allowed_extensions.join(", ")
            )));
        }
        Ok(safe_name)
    }

    /// Stops accepting work and waits for queued jobs to finish.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
