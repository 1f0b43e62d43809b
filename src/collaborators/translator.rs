//! Translation backend boundary.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TranslationConfig;
use crate::error::{PipelineError, PipelineResult};

/// Translates one text. A failure here is text-level: callers record it
/// inline and move on.
#[async_trait]
pub trait TranslationBackend: Send + Sync + std::fmt::Debug {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        model: &str,
    ) -> PipelineResult<String>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRequest<'a> {
    pub text: &'a str,
    pub source_lang: &'a str,
    pub target_lang: &'a str,
    pub model: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslationResponse {
    translation: String,
}

/// POSTs each text to a translation service as JSON
#[derive(Debug, Clone)]
pub struct HttpTranslationBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTranslationBackend {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| PipelineError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &TranslationConfig) -> PipelineResult<Self> {
        Self::new(
            config.endpoint.clone(),
            Duration::from_secs(config.request_timeout_seconds),
        )
    }
}

#[async_trait]
impl TranslationBackend for HttpTranslationBackend {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        model: &str,
    ) -> PipelineResult<String> {
        let request = TranslationRequest {
            text,
            source_lang,
            target_lang,
            model,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Translation(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Translation(format!(
                "backend returned {status}: {body}"
            )));
        }

        let body: TranslationResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Translation(format!("invalid response: {e}")))?;

        debug!(
            source_lang = %source_lang,
            target_lang = %target_lang,
            chars = text.chars().count(),
            "Text translated"
        );
        Ok(body.translation)
    }
}
