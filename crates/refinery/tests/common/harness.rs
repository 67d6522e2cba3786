//! Isolated environment for orchestrator tests.
//!
//! Each harness owns a temp directory with upload, output and script
//! subdirectories. Workers are small `sh` scripts that follow the worker
//! protocol: the input and output paths arrive as the last two arguments and
//! one JSON document is printed to stdout.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use refinery::config::{Config, DelegateKind};
use refinery::engine::{EngineRegistry, LocalProcessEngine, ProcessingEngine, RemoteEngine};
use refinery::store::JobStore;
use refinery::{Job, JobStatus, Orchestrator};

/// Audit document from a typical successful cleaning run.
pub const STANDARD_AUDIT: &str = r#"{"rowsBefore":100,"rowsAfter":98,"duplicatesRemoved":2,"emptyRowsRemoved":0,"qualityScore":97,"columnProfile":{},"sampleBefore":[],"sampleAfter":[]}"#;

pub struct TestHarness {
    temp_dir: TempDir,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub scripts_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let upload_dir = base.join("uploads");
        let output_dir = base.join("processed_data");
        let scripts_dir = base.join("scripts");
        for dir in [&upload_dir, &output_dir, &scripts_dir] {
            std::fs::create_dir_all(dir).expect("Failed to create test directory");
        }

        Self {
            temp_dir,
            upload_dir,
            output_dir,
            scripts_dir,
        }
    }

    pub fn base(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Config pointing at the harness directories, with no remote delay.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.upload_directory = self.upload_dir.clone();
        config.output_directory = self.output_dir.clone();
        config.worker_count = 2;
        config.queue_capacity = 16;
        config.remote_engine.delegate = DelegateKind::None;
        config.remote_engine.processing_delay_ms = 0;
        config
    }

    /// Writes an `sh` worker script and returns its path.
    pub fn write_worker(&self, name: &str, body: &str) -> PathBuf {
        let path = self.scripts_dir.join(format!("{}.sh", name));
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write worker");
        path
    }

    /// Worker that writes a small CSV to the output path and reports `audit`.
    pub fn completing_worker(&self, audit: &str) -> PathBuf {
        self.write_worker(
            "complete",
            &format!(
                "printf 'id,amount\\n1,10\\n' > \"$2\"\ncat <<'JSON'\n{{\"status\":\"completed\",\"audit\":{}}}\nJSON",
                audit
            ),
        )
    }

    pub fn local_engine(&self, script: &Path, timeout: Duration) -> LocalProcessEngine {
        LocalProcessEngine::new("sh", vec![script.display().to_string()], timeout)
    }

    /// Remote engine with the given delegate, no artificial delay unless `delay` is set.
    pub fn remote_engine(
        &self,
        delegate: Option<Arc<dyn ProcessingEngine>>,
        delay: Duration,
        timeout: Duration,
    ) -> RemoteEngine {
        RemoteEngine::new(delegate, delay, timeout, "Test_Blend")
    }

    pub fn orchestrator(
        &self,
        config: Config,
        standard: Arc<dyn ProcessingEngine>,
        premium: Arc<dyn ProcessingEngine>,
    ) -> Orchestrator {
        self.orchestrator_with_store(config, standard, premium, Arc::new(JobStore::new()))
    }

    pub fn orchestrator_with_store(
        &self,
        config: Config,
        standard: Arc<dyn ProcessingEngine>,
        premium: Arc<dyn ProcessingEngine>,
        store: Arc<JobStore>,
    ) -> Orchestrator {
        Orchestrator::new(config, EngineRegistry::new(standard, premium), store)
            .expect("Failed to build orchestrator")
    }

    /// Orchestrator whose standard engine runs `script` and whose premium
    /// engine has no delegate.
    pub fn orchestrator_for_worker(&self, script: &Path) -> Orchestrator {
        let standard: Arc<dyn ProcessingEngine> =
            Arc::new(self.local_engine(script, Duration::from_secs(30)));
        let premium: Arc<dyn ProcessingEngine> =
            Arc::new(self.remote_engine(None, Duration::ZERO, Duration::from_secs(1)));
        self.orchestrator(self.config(), standard, premium)
    }

    pub fn upload_files(&self) -> Vec<PathBuf> {
        list_files(&self.upload_dir)
    }

    pub fn output_files(&self) -> Vec<PathBuf> {
        list_files(&self.output_dir)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn list_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

/// `audit` is present exactly when the job completed.
pub fn assert_audit_iff_completed(job: &Job) {
    assert_eq!(
        job.audit.is_some(),
        job.status == JobStatus::Completed,
        "audit/status mismatch for job {}: status={}, audit present={}",
        job.id,
        job.status,
        job.audit.is_some()
    );
}
