pub mod artifacts;
pub mod resolver;

pub use artifacts::{remove_if_present, ArtifactStore, StoredUpload};
pub use resolver::{download_name, ArtifactResolver, Download};
