//! HTTP processing backend: uploads the input artifact as multipart form data
//! and reads back `{status, audit, csv_data?}`.

use std::path::Path;

use async_trait::async_trait;
use log::debug;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;

use super::{EngineError, ProcessingEngine, RawResult};
use crate::sanitize;

#[derive(Debug, Deserialize)]
struct BackendResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    audit: Option<Value>,
    #[serde(default)]
    csv_data: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBackend {
    pub fn new(endpoint: &str) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ProcessingEngine for HttpBackend {
    async fn run(&self, input: &Path, output: &Path) -> Result<RawResult, EngineError> {
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            return Err(EngineError::MissingInput(input.to_path_buf()));
        }

        let bytes = tokio::fs::read(input).await.map_err(|e| EngineError::Io {
            context: format!("reading {}", sanitize::redact_path(input)),
            source: e,
        })?;

        let part = Part::bytes(bytes).file_name(sanitize::redact_path(input));
        let form = Form::new().part("file", part);

        debug!("POST {} ({})", self.endpoint, sanitize::redact_path(input));
        let response = self.client.post(&self.endpoint).multipart(form).send().await?;
        let http_status = response.status();
        let body_text = response.text().await?;
        let body: Option<BackendResponse> = serde_json::from_str(&body_text).ok();

        if !http_status.is_success() {
            return Err(EngineError::Rejected {
                status: http_status.as_u16(),
                error: body.and_then(|b| b.error),
            });
        }

        let body = body.ok_or_else(|| EngineError::ParseFailure {
            reason: "backend response is not a result document".to_string(),
            raw_output: body_text.clone(),
        })?;

        let status = body.status.unwrap_or_default();
        if status != "completed" {
            return Err(EngineError::WorkerFailed {
                status,
                error: body.error,
                diagnostics: None,
                audit: body.audit,
            });
        }

        if let Some(csv) = body.csv_data {
            tokio::fs::write(output, csv)
                .await
                .map_err(|e| EngineError::Io {
                    context: format!("writing {}", sanitize::redact_path(output)),
                    source: e,
                })?;
        }

        Ok(RawResult::from_engine(body.audit.unwrap_or(Value::Null)))
    }

    fn name(&self) -> &'static str {
        "http-backend"
    }
}
