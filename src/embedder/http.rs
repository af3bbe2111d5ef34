//! Blocking client for OpenAI-compatible `/embeddings` endpoints.

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{EmbeddingProvider, EmbeddingProviderError};
use crate::retry::{is_retryable_error, retry_backoff, should_retry};

/// Settings for [`HttpEmbedder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpEmbedderConfig {
    /// Base URL; `/embeddings` is appended.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Compute device hint forwarded to the server (e.g. `cuda:0`).
    pub device: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Attempts per batch before giving up.
    pub max_retries: usize,
    /// Max sentences per request.
    pub batch_size: usize,
}

/// Embedding provider backed by an HTTP sentence-encoder service.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    device: Option<String>,
    max_retries: usize,
    batch_size: usize,
}

impl HttpEmbedder {
    /// Builds a client from the provided settings.
    pub fn new(config: HttpEmbedderConfig) -> Result<Self, EmbeddingProviderError> {
        if config.model.trim().is_empty() {
            return Err(EmbeddingProviderError::Config(
                "missing embedding model name".to_string(),
            ));
        }
        if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
            return Err(EmbeddingProviderError::Config(format!(
                "embedding endpoint must be an http(s) URL, got {:?}",
                config.base_url
            )));
        }
        let mut headers = HeaderMap::new();
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            let auth = format!("Bearer {}", key.trim());
            let value = HeaderValue::from_str(&auth)
                .map_err(|_| EmbeddingProviderError::Config("invalid API key".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| {
                EmbeddingProviderError::Config(format!("failed to build HTTP client: {err}"))
            })?;
        let endpoint = format!("{}/embeddings", config.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model: config.model,
            device: config.device.filter(|d| !d.trim().is_empty()),
            max_retries: config.max_retries.max(1),
            batch_size: config.batch_size.max(1),
        })
    }

    /// Maximum batch size configured for this client.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Sends one batch and returns its vectors in input order.
    pub fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingProviderError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: inputs,
                device: self.device.as_deref(),
            };
            match self.client.post(&self.endpoint).json(&request).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = resp
                            .json()
                            .map_err(|err| EmbeddingProviderError::Decode(err.to_string()))?;
                        return parsed.into_embeddings(inputs.len());
                    }
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(%status, attempt, "embedding request failed; retrying");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(EmbeddingProviderError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(error = %err, attempt, "embedding transport error; retrying");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(EmbeddingProviderError::Unreachable(err.to_string()));
                }
            }
        }
    }
}

impl EmbeddingProvider for HttpEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn embed(&self, sentences: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingProviderError> {
        let mut embeddings = Vec::with_capacity(sentences.len());
        for (batch_id, batch) in sentences.chunks(self.batch_size).enumerate() {
            debug!(batch_id, size = batch.len(), "embedding batch");
            embeddings.extend(self.embed_batch(batch)?);
        }
        Ok(embeddings)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    #[serde(borrow)]
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

impl EmbeddingResponse {
    fn into_embeddings(self, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingProviderError> {
        let vectors = if self.data.is_empty() {
            self.embeddings
        } else if self.data.iter().all(|entry| entry.index.is_none()) {
            self.data.into_iter().map(|entry| entry.embedding).collect()
        } else {
            order_by_index(self.data)?
        };
        if vectors.len() != expected {
            return Err(EmbeddingProviderError::CountMismatch {
                expected,
                returned: vectors.len(),
            });
        }
        Ok(vectors)
    }
}

// Indices must be given for every row, each naming a distinct slot.
fn order_by_index(data: Vec<EmbeddingData>) -> Result<Vec<Vec<f32>>, EmbeddingProviderError> {
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; data.len()];
    for entry in data {
        let Some(index) = entry.index else {
            return Err(EmbeddingProviderError::Decode(
                "response mixes indexed and unindexed rows".to_string(),
            ));
        };
        let slot = slots.get_mut(index).ok_or_else(|| {
            EmbeddingProviderError::Decode(format!("response index {index} is out of range"))
        })?;
        if slot.replace(entry.embedding).is_some() {
            return Err(EmbeddingProviderError::Decode(format!(
                "response index {index} appears twice"
            )));
        }
    }
    Ok(slots.into_iter().flatten().collect())
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}
