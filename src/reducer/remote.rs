//! Client for an external reduction service hosting the neighbor-embedding
//! algorithms (TSNE, PaCMAP, TRIMAP, UMAP).

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Algorithm, ReductionError, Reducer};
use crate::retry::{is_retryable_error, retry_backoff, should_retry};

/// Worker-count hint forwarded to backends that parallelize.
pub const DEFAULT_REDUCTION_JOBS: usize = 6;

/// Settings for [`ReductionService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReductionServiceConfig {
    /// Full URL receiving reduction requests.
    pub endpoint: String,
    /// Per-request timeout; fitting large matrices can take minutes.
    pub timeout: Duration,
    /// Attempts before giving up.
    pub max_retries: usize,
    /// Worker-count hint.
    pub n_jobs: usize,
}

/// Blocking client for the reduction service.
#[derive(Clone)]
pub struct ReductionService {
    client: Client,
    endpoint: String,
    max_retries: usize,
    n_jobs: usize,
}

impl ReductionService {
    /// Builds a client from the provided settings.
    pub fn new(config: ReductionServiceConfig) -> Result<Self, ReductionError> {
        if !(config.endpoint.starts_with("http://") || config.endpoint.starts_with("https://")) {
            return Err(ReductionError::Provider(format!(
                "reduction endpoint must be an http(s) URL, got {:?}",
                config.endpoint
            )));
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| {
                ReductionError::Provider(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            max_retries: config.max_retries.max(1),
            n_jobs: config.n_jobs.max(1),
        })
    }

    /// Binds the service to one algorithm, yielding a [`Reducer`].
    pub fn for_algorithm<'a>(&'a self, algorithm: &'a Algorithm) -> RemoteReduction<'a> {
        RemoteReduction {
            service: self,
            algorithm,
        }
    }

    fn request(&self, payload: &ReduceRequest<'_>) -> Result<Vec<Vec<f64>>, ReductionError> {
        let mut attempt = 0usize;
        loop {
            match self.client.post(&self.endpoint).json(payload).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: ReduceResponse = resp.json().map_err(|err| {
                            ReductionError::Provider(format!("invalid response: {err}"))
                        })?;
                        return Ok(parsed.embedding);
                    }
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(%status, attempt, "reduction request failed; retrying");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(ReductionError::Provider(format!("{status}: {body}")));
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(error = %err, attempt, "reduction transport error; retrying");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(ReductionError::Provider(err.to_string()));
                }
            }
        }
    }
}

/// A [`ReductionService`] bound to one algorithm.
pub struct RemoteReduction<'a> {
    service: &'a ReductionService,
    algorithm: &'a Algorithm,
}

impl Reducer for RemoteReduction<'_> {
    fn reduce(
        &self,
        matrix: &[Vec<f64>],
        dim: usize,
        seed: u64,
    ) -> Result<Vec<Vec<f64>>, ReductionError> {
        let payload = ReduceRequest {
            algorithm: self.algorithm.name(),
            n_components: dim,
            seed,
            n_jobs: self.service.n_jobs,
            data: matrix,
        };
        debug!(algorithm = payload.algorithm, rows = matrix.len(), "calling reduction service");
        self.service.request(&payload)
    }
}

#[derive(Serialize)]
struct ReduceRequest<'a> {
    algorithm: &'a str,
    n_components: usize,
    seed: u64,
    n_jobs: usize,
    data: &'a [Vec<f64>],
}

#[derive(Debug, Deserialize)]
struct ReduceResponse {
    embedding: Vec<Vec<f64>>,
}
