//! Local Process Engine: runs an external worker per job.
//!
//! The worker receives the input and output paths as its last two positional
//! arguments and must print exactly one JSON document to stdout:
//! `{"status": "completed" | ..., "audit": {...}, "error": "..."}`.
//! The exit code is advisory; the document's `status` is authoritative.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::error::truncate;
use super::{EngineError, ProcessingEngine, RawResult};
use crate::config::LocalEngineConfig;
use crate::sanitize;

/// Document the worker writes to stdout.
#[derive(Debug, Deserialize)]
struct WorkerDocument {
    status: String,
    #[serde(default)]
    audit: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

pub struct LocalProcessEngine {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl LocalProcessEngine {
    pub fn new(program: &str, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &LocalEngineConfig) -> Self {
        Self::new(
            &config.program,
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl ProcessingEngine for LocalProcessEngine {
    async fn run(&self, input: &Path, output: &Path) -> Result<RawResult, EngineError> {
        debug!(
            "Spawning worker '{}' for {}",
            self.program,
            sanitize::redact_path(input)
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let collected = tokio::time::timeout(self.timeout, async {
            let (stdout_text, stderr_text) =
                tokio::join!(read_pipe(stdout_pipe), read_pipe(stderr_pipe));
            let status = child.wait().await;
            (stdout_text, stderr_text, status)
        })
        .await;

        let (stdout_text, stderr_text, status) = match collected {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Worker '{}' exceeded {}s, killing it",
                    self.program,
                    self.timeout.as_secs_f64()
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed-out worker: {}", e);
                }
                return Err(EngineError::Timeout {
                    after: self.timeout,
                });
            }
        };

        let status = status.map_err(|e| EngineError::Io {
            context: "waiting for worker exit".to_string(),
            source: e,
        })?;

        let mut diagnostics = Vec::new();
        if !status.success() {
            // Still parse: a worker may emit a valid failure document before exiting nonzero.
            warn!(
                "Worker '{}' exited with code {}",
                self.program,
                status.code().unwrap_or(-1)
            );
            diagnostics.push(format!(
                "Worker exited with code {}",
                status.code().unwrap_or(-1)
            ));
        }
        if !stderr_text.trim().is_empty() {
            diagnostics.push(format!("Worker stderr: {}", truncate(stderr_text.trim(), 2000)));
        }
        let diagnostics = if diagnostics.is_empty() {
            None
        } else {
            Some(diagnostics.join("\n"))
        };

        let document = parse_worker_output(&stdout_text)?;

        if document.status != "completed" {
            return Err(EngineError::WorkerFailed {
                status: document.status,
                error: document.error,
                diagnostics,
                audit: document.audit,
            });
        }

        // A completed document without an audit is rejected by the assembler.
        Ok(RawResult::from_engine(document.audit.unwrap_or(Value::Null)).with_diagnostics(diagnostics))
    }

    fn name(&self) -> &'static str {
        "local-process"
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            warn!("Failed to read worker pipe: {}", e);
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn parse_worker_output(stdout: &str) -> Result<WorkerDocument, EngineError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(EngineError::ParseFailure {
            reason: "worker produced no output".to_string(),
            raw_output: String::new(),
        });
    }

    serde_json::from_str(trimmed).map_err(|e| EngineError::ParseFailure {
        reason: e.to_string(),
        raw_output: stdout.to_string(),
    })
}
