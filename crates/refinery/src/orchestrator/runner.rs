//! Executes one job: engine run, audit normalization, terminal commit.

use std::sync::Arc;

use log::{error, info, warn};
use tracing::{info_span, Instrument};

use crate::audit::{self, AuditSource};
use crate::engine::{EngineRegistry, RawResult};
use crate::error::RefineryError;
use crate::job::{Job, JobEvent, JobEventBroadcaster};
use crate::sanitize;
use crate::storage::{remove_if_present, ArtifactStore};
use crate::store::{Commit, JobStore, Terminal};

pub struct JobRunner {
    store: Arc<JobStore>,
    engines: EngineRegistry,
    artifacts: ArtifactStore,
    events: JobEventBroadcaster,
}

impl JobRunner {
    pub fn new(
        store: Arc<JobStore>,
        engines: EngineRegistry,
        artifacts: ArtifactStore,
        events: JobEventBroadcaster,
    ) -> Self {
        Self {
            store,
            engines,
            artifacts,
            events,
        }
    }

    pub async fn run(&self, job: Job) {
        let span = info_span!("job",
            job_id = %job.id,
            engine = %job.engine_kind,
            file = %sanitize::redact_path(&job.input_path),
        );
        self.run_inner(job).instrument(span).await
    }

    async fn run_inner(&self, job: Job) {
        if self.store.take_tombstone(&job.id) {
            info!("Job {} was deleted before it started, skipping", job.id);
            return;
        }
        self.process(job).await
    }

    async fn process(&self, job: Job) {
        let engine = self.engines.select(job.engine_kind);
        let output = self.artifacts.output_path(&job);
        self.store
            .append_log(&job.id, &format!("Started on engine {}", engine.name()));

        let result = engine
            .run(&job.input_path, &output)
            .instrument(info_span!("engine_run", engine = engine.name()))
            .await;

        let (terminal, log_entries) = {
            let _step = info_span!("normalize").entered();
            match result {
                Ok(raw) => assemble(&job, engine.name(), raw),
                Err(e) => {
                    warn!("Engine '{}' failed for job {}: {}", engine.name(), job.id, e);
                    let diagnostics = e.diagnostics();
                    let mut entries = vec![RefineryError::from(e).to_string()];
                    entries.extend(diagnostics);
                    (Terminal::Failed, entries)
                }
            }
        };

        let commit = {
            let _step = info_span!("commit").entered();
            self.store.commit_terminal(&job.id, terminal, &log_entries)
        };

        match commit {
            Ok(Commit::Applied(done)) => {
                info!("Job {} finished with status {}", done.id, done.status);
                let message = log_entries.last().cloned().unwrap_or_default();
                self.events.send(JobEvent::for_job(&done, &message));
            }
            Ok(Commit::Superseded(stored)) => {
                warn!(
                    "Job {} was already {} elsewhere, dropping this run's result",
                    stored.id, stored.status
                );
                self.events
                    .send(JobEvent::for_job(&stored, "Finished by another process"));
            }
            Ok(Commit::Discarded) => {
                // Deleted while in flight: drop whatever the engine wrote.
                for path in self.artifacts.owned_outputs(&job) {
                    if remove_if_present(&path) {
                        info!(
                            "Removed late output {} of deleted job {}",
                            sanitize::redact_path(&path),
                            job.id
                        );
                    }
                }
            }
            Err(e) => error!("{}", e),
        }
    }
}

/// Turns a successful engine run into a terminal outcome plus log lines.
fn assemble(job: &Job, engine_name: &str, raw: RawResult) -> (Terminal, Vec<String>) {
    let mut entries = Vec::new();
    if let Some(diagnostics) = &raw.diagnostics {
        match raw.source {
            AuditSource::Fallback => entries.push(format!("Fallback audit used: {}", diagnostics)),
            AuditSource::Engine => entries.push(diagnostics.clone()),
        }
    }

    match audit::normalize(&raw, job.engine_kind) {
        Ok(record) => {
            entries.push(format!(
                "Completed by {}: {} rows in, {} rows out, quality score {}",
                engine_name, record.rows_before, record.rows_after, record.quality_score
            ));
            (Terminal::Completed(record), entries)
        }
        Err(e) => {
            warn!("Rejecting audit for job {}: {}", job.id, e);
            entries.push(RefineryError::from(e).to_string());
            (Terminal::Failed, entries)
        }
    }
}
