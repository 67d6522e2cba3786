use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// `.yaml` / `.yml` are YAML; everything else is read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Json,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content, ConfigFormat::from_path(path))
}

pub fn load_config_from_str(content: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    let config: Config = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
    };

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.worker_count == 0 {
        return Err(invalid("workerCount must be greater than zero"));
    }

    if config.queue_capacity == 0 {
        return Err(invalid("queueCapacity must be greater than zero"));
    }

    if config.allowed_extensions.is_empty() {
        return Err(invalid("allowedExtensions must not be empty"));
    }

    if config.local_engine.program.trim().is_empty() {
        return Err(invalid("localEngine.program must not be empty"));
    }

    if config.local_engine.timeout_secs == 0 {
        return Err(invalid("localEngine.timeoutSecs must be greater than zero"));
    }

    if config.remote_engine.timeout_secs == 0 {
        return Err(invalid("remoteEngine.timeoutSecs must be greater than zero"));
    }

    if let Some(endpoint) = &config.remote_engine.endpoint {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(invalid(format!(
                "remoteEngine.endpoint must be an http(s) URL, got '{}'",
                endpoint
            )));
        }
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

/// `~/.refinery/data/refinery.db`, or a relative path when no home directory exists.
pub fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".refinery").join("data").join("refinery.db"))
        .unwrap_or_else(|| PathBuf::from("refinery.db"))
}
