//! Canonical, engine-agnostic audit records and the assembler that builds
//! them from heterogeneous engine output.

pub mod assembler;
pub mod record;

pub use assembler::{normalize, AuditError, MAX_SAMPLE_ROWS};
pub use record::{AuditRecord, AuditSource, ColumnHealth, ColumnProfile, SampleRow};
