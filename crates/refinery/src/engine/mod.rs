//! Processing engines.
//!
//! Every engine takes an input artifact path and the desired output artifact
//! path and hands back a [`RawResult`]. The orchestrator never needs to know
//! which engine it is talking to.

pub mod error;
pub mod http;
pub mod local;
pub mod remote;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::audit::AuditSource;
use crate::config::{Config, DelegateKind};
use crate::job::EngineKind;

pub use error::EngineError;
pub use http::HttpBackend;
pub use local::LocalProcessEngine;
pub use remote::{Fallback, RemoteEngine};

/// Unnormalized engine output.
#[derive(Debug, Clone)]
pub struct RawResult {
    /// The audit document exactly as the engine produced it.
    pub audit: Value,
    pub source: AuditSource,
    /// Free-form diagnostics destined for the job log (stderr, fallback reason).
    pub diagnostics: Option<String>,
}

impl RawResult {
    pub fn from_engine(audit: Value) -> Self {
        Self {
            audit,
            source: AuditSource::Engine,
            diagnostics: None,
        }
    }

    pub fn fallback(audit: Value, reason: &str) -> Self {
        Self {
            audit,
            source: AuditSource::Fallback,
            diagnostics: Some(reason.to_string()),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Option<String>) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

#[async_trait]
pub trait ProcessingEngine: Send + Sync {
    /// Processes `input`, writing the cleaned dataset to `output`.
    async fn run(&self, input: &Path, output: &Path) -> Result<RawResult, EngineError>;

    fn name(&self) -> &'static str;
}

/// Maps each [`EngineKind`] to its engine.
#[derive(Clone)]
pub struct EngineRegistry {
    standard: Arc<dyn ProcessingEngine>,
    premium: Arc<dyn ProcessingEngine>,
}

impl EngineRegistry {
    pub fn new(standard: Arc<dyn ProcessingEngine>, premium: Arc<dyn ProcessingEngine>) -> Self {
        Self { standard, premium }
    }

    /// Production constructor: local worker for standard jobs, remote engine
    /// (delegating per config) for premium jobs.
    pub fn from_config(config: &Config) -> Self {
        let local: Arc<dyn ProcessingEngine> =
            Arc::new(LocalProcessEngine::from_config(&config.local_engine));

        let delegate: Option<Arc<dyn ProcessingEngine>> = match config.remote_engine.delegate {
            DelegateKind::Http => config
                .remote_engine
                .endpoint
                .as_deref()
                .map(|endpoint| Arc::new(HttpBackend::new(endpoint)) as Arc<dyn ProcessingEngine>),
            DelegateKind::Local => Some(Arc::clone(&local)),
            DelegateKind::None => None,
        };

        let premium: Arc<dyn ProcessingEngine> =
            Arc::new(RemoteEngine::from_config(&config.remote_engine, delegate));

        Self::new(local, premium)
    }

    pub fn select(&self, kind: EngineKind) -> Arc<dyn ProcessingEngine> {
        match kind {
            EngineKind::Standard => Arc::clone(&self.standard),
            EngineKind::Premium => Arc::clone(&self.premium),
        }
    }
}
