// Completion client
// Thin wrapper over the generative model's HTTP API. Enforces the
// configured temperature and token budget on every request and shares
// token accounting between the streaming and non-streaming paths.

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::CompletionConfig;
use crate::retry::{self, FailureKind, RetryFailure, RetryPolicy};
use crate::{PipelineError, Result};

const COMPLETION_SERVICE: &str = "completion";

#[derive(Debug, Clone)]
pub struct CompletionClient {
    base_url: Url,
    model: String,
    options: CompletionOptions,
    agent: ureq::Agent,
    retry_policy: RetryPolicy,
}

/// Generation settings sent with every request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionOptions {
    fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || !(0.0..=2.0).contains(&self.temperature) {
            return Err(PipelineError::Config(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(PipelineError::Config(
                "max_tokens must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A finished generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// Prompt plus generated tokens, as reported by the service. Zero if
    /// the service reported no counts.
    pub tokens_used: u32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

/// One response object. The non-streaming path receives a single `done`
/// object; the streaming path receives one object per line.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

impl GenerateResponse {
    fn tokens_used(&self) -> u32 {
        self.prompt_eval_count
            .unwrap_or(0)
            .saturating_add(self.eval_count.unwrap_or(0))
    }
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

impl CompletionClient {
    #[inline]
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let base_url = config.base_url()?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.model.clone(),
            options: CompletionOptions {
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            },
            agent,
            retry_policy: RetryPolicy::default(),
        })
    }

    #[inline]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check that the completion service is reachable and serves the
    /// configured model.
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/tags")
            .map_err(|error| PipelineError::Config(format!("invalid models URL: {error}")))?;

        let response_text = retry::retry(&self.retry_policy, retry::classify_http, || {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut response| response.body_mut().read_to_string())
        })
        .map_err(|failure| self.escalate(failure))?;

        let models: ModelsResponse = serde_json::from_str(&response_text).map_err(|error| {
            PipelineError::Completion(format!("invalid models response: {error}"))
        })?;

        if models.models.iter().any(|model| model.name == self.model) {
            Ok(())
        } else {
            Err(PipelineError::Completion(format!(
                "model '{}' is not available on the completion service",
                self.model
            )))
        }
    }

    /// Generate a completion with the configured options.
    #[inline]
    pub fn complete(&self, prompt: &str) -> Result<Completion> {
        self.complete_with(prompt, &self.options)
    }

    /// Generate a completion with explicit options.
    #[inline]
    pub fn complete_with(&self, prompt: &str, options: &CompletionOptions) -> Result<Completion> {
        options.validate()?;

        debug!(
            "Requesting completion ({} prompt chars, max {} tokens)",
            prompt.chars().count(),
            options.max_tokens
        );

        let request_json = self.request_json(prompt, options, false)?;
        let url = self.generate_url()?;

        let response_text = retry::retry(&self.retry_policy, retry::classify_http, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut response| response.body_mut().read_to_string())
        })
        .map_err(|failure| self.escalate(failure))?;

        let response: GenerateResponse = serde_json::from_str(&response_text).map_err(|error| {
            PipelineError::Completion(format!("invalid completion response: {error}"))
        })?;

        debug!(
            "Completion finished ({} chars, {} tokens)",
            response.response.chars().count(),
            response.tokens_used()
        );

        Ok(Completion {
            tokens_used: response.tokens_used(),
            text: response.response,
        })
    }

    /// Generate a completion, invoking `on_token` for each piece of text
    /// as the service produces it. Token accounting matches the
    /// non-streaming path.
    ///
    /// Retries apply only to establishing the request; an interrupted
    /// stream is an error, not a retry.
    #[inline]
    pub fn complete_streaming<F>(&self, prompt: &str, mut on_token: F) -> Result<Completion>
    where
        F: FnMut(&str),
    {
        self.options.validate()?;

        let request_json = self.request_json(prompt, &self.options, true)?;
        let url = self.generate_url()?;

        let mut response = retry::retry(&self.retry_policy, retry::classify_http, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
        })
        .map_err(|failure| self.escalate(failure))?;

        let reader = BufReader::new(response.body_mut().as_reader());
        let mut text = String::new();
        let mut tokens_used = 0;

        for line in reader.lines() {
            let line = line.map_err(|error| {
                PipelineError::Completion(format!("completion stream interrupted: {error}"))
            })?;
            if line.trim().is_empty() {
                continue;
            }

            let part: GenerateResponse = serde_json::from_str(&line).map_err(|error| {
                PipelineError::Completion(format!("invalid completion stream line: {error}"))
            })?;

            if !part.response.is_empty() {
                on_token(&part.response);
                text.push_str(&part.response);
            }

            if part.done {
                tokens_used = part.tokens_used();
                break;
            }
        }

        debug!(
            "Streaming completion finished ({} chars, {} tokens)",
            text.chars().count(),
            tokens_used
        );

        Ok(Completion { text, tokens_used })
    }

    fn request_json(
        &self,
        prompt: &str,
        options: &CompletionOptions,
        stream: bool,
    ) -> Result<String> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream,
            options: GenerateOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };

        serde_json::to_string(&request).map_err(|error| {
            PipelineError::Completion(format!("failed to serialize completion request: {error}"))
        })
    }

    fn generate_url(&self) -> Result<Url> {
        self.base_url
            .join("/api/generate")
            .map_err(|error| PipelineError::Config(format!("invalid completion URL: {error}")))
    }

    fn escalate(&self, failure: RetryFailure<ureq::Error>) -> PipelineError {
        match failure.kind {
            FailureKind::RateLimited => PipelineError::RateLimited {
                service: COMPLETION_SERVICE.to_string(),
                attempts: failure.attempts,
            },
            FailureKind::Transient => PipelineError::Unavailable {
                service: COMPLETION_SERVICE.to_string(),
                reason: failure.error.to_string(),
            },
            FailureKind::Fatal => PipelineError::Completion(failure.error.to_string()),
        }
    }
}
