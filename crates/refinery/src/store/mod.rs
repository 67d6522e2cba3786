pub mod job_store;

pub use job_store::{Commit, JobStore, Terminal, INTERRUPTED_MESSAGE};
