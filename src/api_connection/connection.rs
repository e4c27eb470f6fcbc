use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use super::endpoints::{
    ErrorResponse, GenerateOptions, GenerateRequest, GenerateResponse, DEFAULT_BASE_URL, DEFAULT_MODEL,
    GENERATE_PATH,
};
use crate::error::{Result, RetrievalError};

#[derive(Error, Debug)]
pub enum ApiConnectionError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("API error {status}: {error_body}")]
    ApiError {
        status: reqwest::StatusCode,
        error_body: String,
    },

    #[error("Empty completion from model {0}")]
    EmptyResponse(String),
}

impl From<ApiConnectionError> for RetrievalError {
    fn from(err: ApiConnectionError) -> Self {
        RetrievalError::Completion(err.to_string())
    }
}

/// Text completion consumed by the meal-analysis step.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Client for a local Ollama-compatible `/api/generate` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    options: Option<GenerateOptions>,
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, DEFAULT_MODEL)
    }
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            options: None,
        }
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate(&self, prompt: &str) -> std::result::Result<GenerateResponse, ApiConnectionError> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: self.options.clone(),
        };
        let url = format!("{}{}", self.base_url, GENERATE_PATH);
        debug!(%url, model = %self.model, prompt_len = prompt.len(), "Sending completion request");

        let response = self.client.post(&url).json(&request).send().await?;

        if response.status().is_success() {
            Ok(response.json::<GenerateResponse>().await?)
        } else {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            // Prefer the service's own diagnostic over the raw JSON envelope.
            let error_body = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            Err(ApiConnectionError::ApiError { status, error_body })
        }
    }
}

#[async_trait]
impl CompletionService for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let response = self.generate(prompt).await?;
        let text = response.response.trim();
        if text.is_empty() {
            return Err(ApiConnectionError::EmptyResponse(response.model).into());
        }
        Ok(text.to_string())
    }
}
