pub mod audit;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod job;
pub mod logging;
pub mod orchestrator;
pub mod sanitize;
pub mod storage;
pub mod store;

pub use audit::{normalize, AuditError, AuditRecord, AuditSource, ColumnHealth, ColumnProfile};
pub use config::{load_config, Config, ConfigFormat, DelegateKind};
pub use engine::{
    EngineError, EngineRegistry, Fallback, HttpBackend, LocalProcessEngine, ProcessingEngine,
    RawResult, RemoteEngine,
};
pub use error::{ConfigError, RefineryError, Result, StorageError, WorkerError};
pub use job::{EngineKind, Job, JobEvent, JobStatus};
pub use orchestrator::{Orchestrator, SubmitRequest};
pub use storage::{ArtifactResolver, ArtifactStore, Download};
pub use store::JobStore;
