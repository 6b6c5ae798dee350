//! Resilient generation layer
//!
//! Wraps an optional `LlmClient` with the response cache, bounded retries
//! with exponential backoff, cooperative cancellation and the offline
//! fallback. `try_generate` reports the explicit outcome; `generate` never
//! fails and substitutes the fallback instead.
//!
//! Author: hephaex@gmail.com

use crate::cache::ResponseCache;
use crate::fallback::offline_response;
use crate::llm::create_llm_client;
use docsight_core::{AppConfig, CacheStats, LlmClient, Result};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why generation produced no backend text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("No generation backend configured")]
    NotConfigured,

    #[error("Generation failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("Generation cancelled")]
    Cancelled,
}

/// Where generated text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Backend,
    Cache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub text: String,
    pub origin: Origin,
}

/// Per-call generation options
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Consult and populate the response cache
    pub use_cache: bool,

    /// Additional attempts after the first; `None` uses the generator default
    pub max_retries: Option<u32>,

    /// Caller-scoped cancellation; defaults to a child of the generator token
    pub cancel: Option<CancellationToken>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            max_retries: None,
            cancel: None,
        }
    }
}

impl GenerateOptions {
    /// Options with the response cache bypassed
    pub fn uncached() -> Self {
        Self {
            use_cache: false,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Generation with cache, retries and offline fallback
pub struct ResilientGenerator {
    backend: Option<Arc<dyn LlmClient>>,
    cache: ResponseCache,
    default_retries: u32,
    backoff_unit: Duration,
    cancel: CancellationToken,
}

impl ResilientGenerator {
    /// `None` as backend puts the generator in offline-fallback-only mode
    pub fn new(backend: Option<Arc<dyn LlmClient>>, cache: ResponseCache) -> Self {
        Self {
            backend,
            cache,
            default_retries: 2,
            backoff_unit: Duration::from_secs(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Build from application config.
    ///
    /// A backend without a usable credential is left unconfigured.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let backend: Option<Arc<dyn LlmClient>> = if config.llm.is_configured() {
            Some(Arc::from(create_llm_client(&config.llm)?))
        } else {
            tracing::warn!(
                provider = ?config.llm.provider,
                "llm_unconfigured_using_offline_fallback"
            );
            None
        };

        let cache = ResponseCache::new(
            config.cache.response_max_size,
            Duration::from_secs(config.cache.response_ttl_secs),
        );

        Ok(Self::new(backend, cache).with_max_retries(config.llm.max_retries))
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.default_retries = max_retries;
        self
    }

    /// Length of one backoff unit; attempt `n` waits `2^n` units
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    /// Token tied to this generator; cancelling the generator cancels it
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Abort retries of every in-flight call that has no caller token
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        self.cache.stats()
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Generate text, reporting why no backend text was produced
    pub async fn try_generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> std::result::Result<Generated, GenerationError> {
        let Some(backend) = self.backend.as_ref() else {
            return Err(GenerationError::NotConfigured);
        };

        if options.use_cache {
            match self.cache.get(prompt) {
                Ok(Some(text)) => {
                    tracing::debug!("llm_cache_hit");
                    return Ok(Generated {
                        text,
                        origin: Origin::Cache,
                    });
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "llm_cache_unavailable"),
            }
        }

        let cancel = options
            .cancel
            .clone()
            .unwrap_or_else(|| self.cancel.child_token());
        let max_retries = options.max_retries.unwrap_or(self.default_retries);
        let mut last_error = String::new();

        for attempt in 0..=max_retries {
            if cancel.is_cancelled() {
                tracing::info!(attempt, "llm_call_cancelled");
                return Err(GenerationError::Cancelled);
            }

            match backend.generate(prompt).await {
                Ok(text) => {
                    if options.use_cache {
                        if let Err(e) = self.cache.put(prompt, text.clone()) {
                            tracing::warn!(error = %e, "llm_cache_store_failed");
                        }
                    }
                    return Ok(Generated {
                        text,
                        origin: Origin::Backend,
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt == max_retries {
                        break;
                    }

                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "llm_retry"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            tracing::info!(attempt = attempt + 1, "llm_call_cancelled");
                            return Err(GenerationError::Cancelled);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        let attempts = max_retries + 1;
        tracing::error!(attempts, error = %last_error, "llm_all_retries_exhausted");
        Err(GenerationError::Exhausted {
            attempts,
            last_error,
        })
    }

    /// Generate text; any failure yields the offline fallback
    pub async fn generate(&self, prompt: &str, options: &GenerateOptions) -> String {
        match self.try_generate(prompt, options).await {
            Ok(generated) => generated.text,
            Err(e) => {
                tracing::info!(reason = %e, "llm_using_offline_fallback");
                offline_response(prompt)
            }
        }
    }

    /// Stream generated text.
    ///
    /// Yields the fallback as a single item when there is no backend or the
    /// stream cannot be opened. An error mid-stream ends the stream with the
    /// fallback as its last item.
    pub async fn generate_stream(&self, prompt: &str) -> BoxStream<'static, String> {
        let fallback = offline_response(prompt);
        let Some(backend) = self.backend.as_ref() else {
            return stream::once(async move { fallback }).boxed();
        };

        match backend.generate_stream(prompt).await {
            Ok(chunks) => chunks
                .scan(false, move |failed, item| {
                    let next = if *failed {
                        None
                    } else {
                        match item {
                            Ok(text) => Some(text),
                            Err(e) => {
                                tracing::warn!(error = %e, "llm_stream_failed");
                                *failed = true;
                                Some(fallback.clone())
                            }
                        }
                    };
                    futures::future::ready(next)
                })
                .boxed(),
            Err(e) => {
                tracing::warn!(error = %e, "llm_stream_open_failed");
                stream::once(async move { fallback }).boxed()
            }
        }
    }
}

impl std::fmt::Debug for ResilientGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientGenerator")
            .field("configured", &self.backend.is_some())
            .field("default_retries", &self.default_retries)
            .field("backoff_unit", &self.backoff_unit)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
