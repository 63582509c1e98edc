// Embedding client
// Converts text windows into fixed-dimension vectors via the embedding
// service's batch API. Batches are submitted sequentially with an
// inter-batch delay; a rate-limited batch is retried whole, any other
// unrecoverable batch error falls back to embedding each text on its own
// so one bad text cannot sink the rest. Texts that still fail come back
// as typed failures, never as placeholder vectors.


use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::chunker::Chunk;
use crate::config::EmbeddingConfig;
use crate::retry::{self, FailureKind, RetryPolicy};
use crate::{PipelineError, Result};

const EMBEDDING_SERVICE: &str = "embedding";

#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    base_url: Url,
    model: String,
    dimension: usize,
    batch_size: usize,
    inter_batch_delay: Duration,
    agent: ureq::Agent,
    retry_policy: RetryPolicy,
}

/// One text submitted for embedding, correlated to its vector by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedItem {
    pub id: String,
    pub text: String,
}

/// A vector produced by the embedding service.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    /// Id of the chunk this vector was produced from, if any. Query
    /// embeddings carry `None`.
    pub chunk_id: Option<String>,
    pub values: Vec<f32>,
    pub model: String,
    pub dimension: usize,
}

/// A text that could not be embedded after batch retries and the
/// per-item fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedFailure {
    pub id: String,
    pub reason: String,
}

/// Outcome of a batch embedding call. `vectors` holds one entry per
/// successfully embedded input, in input order; `failures` names the
/// inputs that produced no vector.
#[derive(Debug, Clone, Default)]
pub struct BatchEmbeddings {
    pub vectors: Vec<EmbeddingVector>,
    pub failures: Vec<EmbedFailure>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

/// Failure of one batch request, after retries.
#[derive(Debug)]
enum BatchError {
    RateLimited { attempts: u32 },
    Unavailable { reason: String },
    Fatal { reason: String },
}

impl EmbeddingClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config.base_url()?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.model.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1) as usize,
            inter_batch_delay: Duration::from_millis(config.inter_batch_delay_ms),
            agent,
            retry_policy: RetryPolicy::default(),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Model identifier fixed at construction.
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Vector dimension fixed at construction. Must match the vector
    /// store this client feeds.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Check that the embedding service is reachable and serves the
    /// configured model.
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        let models = self.list_models()?;

        if models.iter().any(|model| model.name == self.model) {
            debug!("Embedding model {} is available", self.model);
            Ok(())
        } else {
            Err(PipelineError::Embedding(format!(
                "model '{}' is not available; installed models: {}",
                self.model,
                models
                    .iter()
                    .map(|model| model.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )))
        }
    }

    /// List the models the embedding service has installed.
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .map_err(|error| PipelineError::Config(format!("invalid models URL: {error}")))?;

        debug!("Fetching available models from {}", url);

        let response_text = retry::retry(&self.retry_policy, retry::classify_http, || {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut response| response.body_mut().read_to_string())
        })
        .map_err(|failure| match failure.kind {
            FailureKind::RateLimited => PipelineError::RateLimited {
                service: EMBEDDING_SERVICE.to_string(),
                attempts: failure.attempts,
            },
            FailureKind::Transient | FailureKind::Fatal => PipelineError::Unavailable {
                service: EMBEDDING_SERVICE.to_string(),
                reason: failure.error.to_string(),
            },
        })?;

        let models: ModelsResponse = serde_json::from_str(&response_text).map_err(|error| {
            PipelineError::Embedding(format!("invalid models response: {error}"))
        })?;

        Ok(models.models)
    }

    /// Embed a single text. Used for queries; the returned vector has no
    /// chunk correlation.
    #[inline]
    pub fn embed_one(&self, text: &str) -> Result<EmbeddingVector> {
        debug!("Embedding single text ({} chars)", text.chars().count());

        let embeddings = self
            .request_embeddings(vec![text.to_string()])
            .map_err(|error| self.escalate(error))?;

        let values = embeddings.into_iter().next().ok_or_else(|| {
            PipelineError::Embedding("embedding service returned no vector".to_string())
        })?;

        self.check_dimension(&values)?;

        Ok(EmbeddingVector {
            chunk_id: None,
            values,
            model: self.model.clone(),
            dimension: self.dimension,
        })
    }

    /// Embed many texts, in input order, in batches bounded by the
    /// configured batch size.
    ///
    /// Rate limiting and an unreachable service fail the whole call; any
    /// other batch failure retries each text of that batch individually
    /// and records the ones that still fail in `failures`.
    #[inline]
    pub fn embed_batch(&self, items: &[EmbedItem]) -> Result<BatchEmbeddings> {
        if items.is_empty() {
            return Ok(BatchEmbeddings::default());
        }

        debug!(
            "Embedding {} texts in batches of {}",
            items.len(),
            self.batch_size
        );

        let mut batch = BatchEmbeddings {
            vectors: Vec::with_capacity(items.len()),
            failures: Vec::new(),
        };

        for (batch_index, group) in items.chunks(self.batch_size).enumerate() {
            if batch_index > 0 && !self.inter_batch_delay.is_zero() {
                std::thread::sleep(self.inter_batch_delay);
            }

            self.embed_group(group, &mut batch)?;
        }

        info!(
            "Embedded {} of {} texts ({} failed)",
            batch.vectors.len(),
            items.len(),
            batch.failures.len()
        );

        Ok(batch)
    }

    /// Embed chunker output, correlating each vector with its chunk id.
    #[inline]
    pub fn embed_chunks(&self, chunks: &[Chunk]) -> Result<BatchEmbeddings> {
        let items: Vec<EmbedItem> = chunks
            .iter()
            .map(|chunk| EmbedItem {
                id: chunk.id.clone(),
                text: chunk.text.clone(),
            })
            .collect();

        self.embed_batch(&items)
    }

    fn embed_group(&self, group: &[EmbedItem], out: &mut BatchEmbeddings) -> Result<()> {
        let inputs: Vec<String> = group.iter().map(|item| item.text.clone()).collect();

        match self.request_embeddings(inputs) {
            Ok(embeddings) => {
                for (item, values) in group.iter().zip(embeddings) {
                    out.vectors.push(self.vector_for(item, values)?);
                }
                Ok(())
            }
            Err(BatchError::RateLimited { attempts }) => Err(PipelineError::RateLimited {
                service: EMBEDDING_SERVICE.to_string(),
                attempts,
            }),
            Err(BatchError::Unavailable { reason }) => Err(PipelineError::Unavailable {
                service: EMBEDDING_SERVICE.to_string(),
                reason,
            }),
            Err(BatchError::Fatal { reason }) => {
                warn!(
                    "Batch of {} texts failed ({}), retrying each text individually",
                    group.len(),
                    reason
                );
                self.embed_individually(group, out)
            }
        }
    }

    fn embed_individually(&self, group: &[EmbedItem], out: &mut BatchEmbeddings) -> Result<()> {
        for item in group {
            match self.request_embeddings(vec![item.text.clone()]) {
                Ok(embeddings) => match embeddings.into_iter().next() {
                    Some(values) => out.vectors.push(self.vector_for(item, values)?),
                    None => out.failures.push(EmbedFailure {
                        id: item.id.clone(),
                        reason: "embedding service returned no vector".to_string(),
                    }),
                },
                Err(BatchError::RateLimited { attempts }) => {
                    return Err(PipelineError::RateLimited {
                        service: EMBEDDING_SERVICE.to_string(),
                        attempts,
                    });
                }
                Err(BatchError::Unavailable { reason }) => {
                    return Err(PipelineError::Unavailable {
                        service: EMBEDDING_SERVICE.to_string(),
                        reason,
                    });
                }
                Err(BatchError::Fatal { reason }) => {
                    warn!("Text {} could not be embedded: {}", item.id, reason);
                    out.failures.push(EmbedFailure {
                        id: item.id.clone(),
                        reason,
                    });
                }
            }
        }

        Ok(())
    }

    /// One embedding request with retries. Returns exactly one vector per
    /// input on success.
    fn request_embeddings(&self, inputs: Vec<String>) -> std::result::Result<Vec<Vec<f32>>, BatchError> {
        let expected = inputs.len();

        let request = EmbedRequest {
            model: self.model.clone(),
            input: inputs,
        };

        let request_json = serde_json::to_string(&request).map_err(|error| BatchError::Fatal {
            reason: format!("failed to serialize embedding request: {error}"),
        })?;

        let url = self
            .base_url
            .join("/api/embed")
            .map_err(|error| BatchError::Fatal {
                reason: format!("invalid embedding URL: {error}"),
            })?;

        let response_text = retry::retry(&self.retry_policy, retry::classify_http, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut response| response.body_mut().read_to_string())
        })
        .map_err(|failure| match failure.kind {
            FailureKind::RateLimited => BatchError::RateLimited {
                attempts: failure.attempts,
            },
            FailureKind::Transient => BatchError::Unavailable {
                reason: failure.error.to_string(),
            },
            FailureKind::Fatal => BatchError::Fatal {
                reason: failure.error.to_string(),
            },
        })?;

        let response: EmbedResponse =
            serde_json::from_str(&response_text).map_err(|error| BatchError::Fatal {
                reason: format!("invalid embedding response: {error}"),
            })?;

        if response.embeddings.len() != expected {
            return Err(BatchError::Fatal {
                reason: format!(
                    "embedding count mismatch: sent {} texts, received {} vectors",
                    expected,
                    response.embeddings.len()
                ),
            });
        }

        Ok(response.embeddings)
    }

    fn vector_for(&self, item: &EmbedItem, values: Vec<f32>) -> Result<EmbeddingVector> {
        self.check_dimension(&values)?;

        Ok(EmbeddingVector {
            chunk_id: Some(item.id.clone()),
            values,
            model: self.model.clone(),
            dimension: self.dimension,
        })
    }

    fn check_dimension(&self, values: &[f32]) -> Result<()> {
        if values.len() == self.dimension {
            Ok(())
        } else {
            Err(PipelineError::DimensionMismatch {
                expected: self.dimension,
                actual: values.len(),
            })
        }
    }

    fn escalate(&self, error: BatchError) -> PipelineError {
        match error {
            BatchError::RateLimited { attempts } => PipelineError::RateLimited {
                service: EMBEDDING_SERVICE.to_string(),
                attempts,
            },
            BatchError::Unavailable { reason } => PipelineError::Unavailable {
                service: EMBEDDING_SERVICE.to_string(),
                reason,
            },
            BatchError::Fatal { reason } => PipelineError::Embedding(reason),
        }
    }
}
