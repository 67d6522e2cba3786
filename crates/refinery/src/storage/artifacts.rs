use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, warn};

use super::resolver::ArtifactResolver;
use crate::config::Config;
use crate::error::StorageError;
use crate::job::Job;
use crate::sanitize;

/// An uploaded dataset written to the upload directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    /// Name on disk, `<unix-millis>-<sanitised original name>`.
    pub filename: String,
    pub path: PathBuf,
}

/// Owns the upload and output directories.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    upload_directory: PathBuf,
    output_directory: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(upload_directory: P, output_directory: Q) -> Self {
        Self {
            upload_directory: upload_directory.as_ref().to_path_buf(),
            output_directory: output_directory.as_ref().to_path_buf(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.upload_directory, &config.output_directory)
    }

    pub fn upload_directory(&self) -> &Path {
        &self.upload_directory
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    pub fn resolver(&self) -> ArtifactResolver {
        ArtifactResolver::new(&self.output_directory)
    }

    pub fn ensure_directories(&self) -> Result<(), StorageError> {
        for dir in [&self.upload_directory, &self.output_directory] {
            std::fs::create_dir_all(dir).map_err(|e| StorageError::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Writes an upload under a timestamped name without overwriting anything.
    ///
    /// `safe_name` must already have passed [`sanitize::sanitize_filename`].
    pub fn store_upload(
        &self,
        safe_name: &str,
        content: &[u8],
    ) -> Result<StoredUpload, StorageError> {
        self.ensure_directories()?;

        let filename = format!("{}-{}", Utc::now().timestamp_millis(), safe_name);
        let path = create_exclusive(&self.upload_directory, &filename, content)?;
        let filename = sanitize::redact_path(&path);

        debug!("Stored upload as {}", filename);
        Ok(StoredUpload { filename, path })
    }

    /// Where the engine should write the cleaned dataset for `job`.
    pub fn output_path(&self, job: &Job) -> PathBuf {
        self.resolver().canonical_path(job)
    }

    /// Output locations that can only belong to `job`. Shared legacy names
    /// are resolved on download but never deleted.
    pub fn owned_outputs(&self, job: &Job) -> Vec<PathBuf> {
        let resolver = self.resolver();
        let mut paths = vec![resolver.canonical_path(job)];
        if job.input_path.parent() == Some(self.upload_directory.as_path()) {
            paths.push(resolver.stored_name_path(job));
        }
        paths
    }

    /// Best-effort removal of the input artifact and the outputs owned by
    /// the job.
    ///
    /// Missing files are not errors. Returns the paths actually removed.
    pub fn remove_artifacts(&self, job: &Job) -> Vec<PathBuf> {
        let mut targets = vec![job.input_path.clone()];
        targets.extend(self.owned_outputs(job));

        targets
            .into_iter()
            .filter(|path| remove_if_present(path))
            .collect()
    }
}

/// Removes `path`, logging anything other than "not found". Returns true if removed.
pub fn remove_if_present(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed artifact {}", sanitize::redact_path(path));
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            let err = StorageError::RemoveFile {
                path: path.to_path_buf(),
                source: e,
            };
            warn!("{}", err);
            false
        }
    }
}

/// Creates `filename` in `dir` with `create_new`, falling back to numbered
/// variants (`name_2.csv`, `name_3.csv`, ...) when it already exists.
fn create_exclusive(dir: &Path, filename: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
    let (base, ext) = match filename.rfind('.') {
        Some(dot) if dot > 0 => (&filename[..dot], Some(&filename[dot..])),
        _ => (filename, None),
    };

    for counter in 1..=1000 {
        let candidate = match (counter, ext) {
            (1, _) => filename.to_string(),
            (n, Some(ext)) => format!("{}_{}{}", base, n, ext),
            (n, None) => format!("{}_{}", base, n),
        };
        let path = dir.join(&candidate);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                file.write_all(content).map_err(|e| StorageError::WriteFile {
                    path: path.clone(),
                    source: e,
                })?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(StorageError::WriteFile { path, source: e }),
        }
    }

    Err(StorageError::FileExists(dir.join(filename)))
}
