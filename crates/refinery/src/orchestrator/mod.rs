pub mod pool;
pub mod runner;
pub mod service;

pub use pool::WorkerPool;
pub use runner::JobRunner;
pub use service::{Orchestrator, SubmitRequest};
