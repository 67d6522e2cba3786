//! Engine error types.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by an engine invocation.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to spawn worker '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout: worker did not finish within {}s", after.as_secs_f64())]
    Timeout { after: Duration },

    #[error("Worker output is not a valid result document: {reason}")]
    ParseFailure { reason: String, raw_output: String },

    #[error("Worker reported status '{status}'{}", error.as_deref().map(|e| format!(": {}", e)).unwrap_or_default())]
    WorkerFailed {
        status: String,
        error: Option<String>,
        /// Exit code and stderr of the worker, when it ran as a process.
        diagnostics: Option<String>,
        /// Audit from the failure document, kept for diagnostics only.
        audit: Option<Value>,
    },

    #[error("HTTP request to processing backend failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Processing backend rejected the request with HTTP {status}{}", error.as_deref().map(|e| format!(": {}", e)).unwrap_or_default())]
    Rejected { status: u16, error: Option<String> },

    #[error("Input artifact does not exist: {0}")]
    MissingInput(PathBuf),
}

impl EngineError {
    /// Extra diagnostic text worth appending to a job log.
    pub fn diagnostics(&self) -> Option<String> {
        match self {
            EngineError::ParseFailure { raw_output, .. } if !raw_output.is_empty() => {
                Some(format!("Raw output: {}", truncate(raw_output, 2000)))
            }
            EngineError::WorkerFailed {
                diagnostics, audit, ..
            } => {
                let mut lines: Vec<String> = diagnostics.iter().cloned().collect();
                if let Some(audit) = audit {
                    lines.push(format!(
                        "Audit from failure document (untrusted): {}",
                        truncate(&audit.to_string(), 2000)
                    ));
                }
                if lines.is_empty() {
                    None
                } else {
                    Some(lines.join("\n"))
                }
            }
            _ => None,
        }
    }
}

pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &text[..end])
}
