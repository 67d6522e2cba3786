//! Artifact Resolver: locates the cleaned output of a completed job.
//!
//! The canonical name is tried first, followed by the legacy naming schemes
//! earlier deployments wrote, so artifacts produced before a naming change
//! stay downloadable.

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{RefineryError, Result};
use crate::job::{Job, JobStatus};
use crate::sanitize::{self, stem_before_first_dot};

/// A resolved artifact and the name it should be offered to the user as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub path: PathBuf,
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct ArtifactResolver {
    output_directory: PathBuf,
}

impl ArtifactResolver {
    pub fn new<P: AsRef<Path>>(output_directory: P) -> Self {
        Self {
            output_directory: output_directory.as_ref().to_path_buf(),
        }
    }

    /// `processed-<job id>.csv`, unique per job.
    pub fn canonical_path(&self, job: &Job) -> PathBuf {
        self.output_directory
            .join(format!("processed-{}.csv", job.id))
    }

    /// `processed-<stored filename>`. Unique per job while the input lives in
    /// the upload directory, since stored names are created exclusively.
    pub fn stored_name_path(&self, job: &Job) -> PathBuf {
        self.output_directory
            .join(format!("processed-{}", job.filename))
    }

    /// Candidate locations in lookup order, without duplicates.
    ///
    /// Only the canonical path is guaranteed to belong to this job. The
    /// stem-based legacy names can be shared by jobs with similar uploads.
    pub fn candidates(&self, job: &Job) -> Vec<PathBuf> {
        let names = [
            format!("processed-{}.csv", job.id),
            format!("processed-{}.csv", stem_before_first_dot(&job.filename)),
            format!("processed-{}", job.filename),
            format!(
                "processed-{}.csv",
                stem_before_first_dot(&job.original_name)
            ),
        ];

        let mut paths: Vec<PathBuf> = Vec::with_capacity(names.len());
        for name in names {
            let path = self.output_directory.join(name);
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        paths
    }

    /// Resolves the output artifact for a completed job.
    pub fn resolve(&self, job: &Job) -> Result<Download> {
        if job.status != JobStatus::Completed {
            return Err(RefineryError::NotReady {
                job_id: job.id.clone(),
                status: job.status,
            });
        }

        let candidates = self.candidates(job);
        match candidates.iter().find(|path| path.is_file()) {
            Some(path) => {
                debug!(
                    "Resolved artifact for job {}: {}",
                    job.id,
                    sanitize::redact_path(path)
                );
                Ok(Download {
                    path: path.clone(),
                    filename: download_name(job),
                })
            }
            None => Err(RefineryError::ArtifactNotFound {
                job_id: job.id.clone(),
                candidates: candidates.iter().map(|p| sanitize::redact_path(p)).collect(),
            }),
        }
    }
}

/// `cleaned_<stem of original name>.csv`
pub fn download_name(job: &Job) -> String {
    let stem = stem_before_first_dot(&job.original_name);
    let stem = if stem.is_empty() { "dataset" } else { stem };
    format!("cleaned_{}.csv", stem)
}
