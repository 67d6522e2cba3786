//! Job records, the status state machine, and job lifecycle events.

pub mod events;
pub mod model;

pub use events::{JobEvent, JobEventBroadcaster};
pub use model::{file_type_of, EngineKind, InvalidTransition, Job, JobStatus};
