use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub version: String,
    #[serde(default = "default_upload_directory")]
    pub upload_directory: PathBuf,
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
    /// Persist jobs to SQLite when set; otherwise jobs live in memory only.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default)]
    pub local_engine: LocalEngineConfig,
    #[serde(default)]
    pub remote_engine: RemoteEngineConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_upload_directory() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("processed_data")
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_queue_capacity() -> usize {
    64
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["csv".to_string(), "xlsx".to_string(), "xls".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            upload_directory: default_upload_directory(),
            output_directory: default_output_directory(),
            database_path: None,
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            allowed_extensions: default_allowed_extensions(),
            local_engine: LocalEngineConfig::default(),
            remote_engine: RemoteEngineConfig::default(),
        }
    }
}

impl Config {
    /// Case-insensitive check against the extension allow-list.
    pub fn is_extension_allowed(&self, extension: &str) -> bool {
        let extension = extension.trim_start_matches('.');
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }

    /// Applies `REFINERY_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = env_value("REFINERY_REMOTE_URL") {
            log::debug!("Remote endpoint overridden from environment");
            self.remote_engine.endpoint = Some(url);
        }
        if let Some(program) = env_value("REFINERY_WORKER_PYTHON") {
            log::debug!("Worker program overridden from environment: {}", program);
            self.local_engine.program = program;
        }
        if let Some(path) = env_value("REFINERY_DATABASE") {
            self.database_path = Some(PathBuf::from(path));
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Settings for the worker process used by standard jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalEngineConfig {
    #[serde(default = "default_program")]
    pub program: String,
    /// Leading arguments; the input and output paths are appended after these.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_local_timeout")]
    pub timeout_secs: u64,
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_args() -> Vec<String> {
    vec!["scripts/processor.py".to_string()]
}

fn default_local_timeout() -> u64 {
    300
}

impl Default for LocalEngineConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            timeout_secs: default_local_timeout(),
        }
    }
}

/// Where the remote engine obtains real results from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DelegateKind {
    #[default]
    Http,
    Local,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEngineConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub delegate: DelegateKind,
    #[serde(default = "default_processing_delay")]
    pub processing_delay_ms: u64,
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_workflow")]
    pub workflow: String,
}

fn default_processing_delay() -> u64 {
    3500
}

fn default_remote_timeout() -> u64 {
    30
}

fn default_workflow() -> String {
    "Master_Data_Blending_V4".to_string()
}

impl Default for RemoteEngineConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            delegate: DelegateKind::default(),
            processing_delay_ms: default_processing_delay(),
            timeout_secs: default_remote_timeout(),
            workflow: default_workflow(),
        }
    }
}
