// src/gateway/coordinator.rs
//! Per-request orchestration: breaker gate, cache lookup, tier
//! classification, model/parameter selection, prompt augmentation, the
//! backend round trip, and fallback synthesis on failure.
//!
//! No retry happens inside a single invocation; the circuit breaker is the
//! only retry-gating mechanism.

use crate::backend::{ChatCompletionRequest, ChatMessage};
use crate::cache::{request_fingerprint, ResponseCache};
use crate::config::Config;
use crate::error::GatewayError;
use crate::gateway::classifier::{ContextClassifier, ResponseQualityEstimator};
use crate::gateway::types::{
    ContextTier, GenerationParams, GenerationRequest, GenerationResponse, TierInfluence,
};
use crate::metrics::GatewayMetrics;
use crate::pool::{CircuitBreaker, ConnectionPool};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Confidence attached to synthesized fallback responses.
const FALLBACK_CONFIDENCE: f64 = 0.1;

pub struct RequestCoordinator {
    config: Arc<Config>,
    pool: Arc<ConnectionPool>,
    breaker: Arc<RwLock<CircuitBreaker>>,
    cache: Arc<ResponseCache>,
    classifier: Arc<dyn ContextClassifier>,
    quality: Arc<dyn ResponseQualityEstimator>,
    metrics: Arc<GatewayMetrics>,
}

impl RequestCoordinator {
    pub fn new(
        config: Arc<Config>,
        pool: Arc<ConnectionPool>,
        breaker: Arc<RwLock<CircuitBreaker>>,
        cache: Arc<ResponseCache>,
        classifier: Arc<dyn ContextClassifier>,
        quality: Arc<dyn ResponseQualityEstimator>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            config,
            pool,
            breaker,
            cache,
            classifier,
            quality,
            metrics,
        }
    }

    /// Runs one request through the full coordination sequence.
    pub async fn process(&self, request: GenerationRequest) -> Result<GenerationResponse, GatewayError> {
        let started = Instant::now();
        self.metrics.record_request();
        let tier = self.classifier.classify(request.context_score);

        if self.breaker.write().await.is_open() {
            debug!("Request {} rejected: circuit open", request.id);
            return self.fail(&request, tier, GatewayError::CircuitOpen, started).await;
        }

        if request.cache_eligible {
            let key = request_fingerprint(&request, tier);
            if let Some(mut cached) = self.cache.get(key) {
                debug!("Request {} served from cache", request.id);
                cached.request_id = request.id;
                cached.processing_ms = started.elapsed().as_millis() as u64;
                return Ok(cached);
            }
        }

        match self.attempt(&request, tier, started).await {
            Ok(response) => Ok(response),
            Err(e) => self.fail(&request, tier, e, started).await,
        }
    }

    /// Classification has already happened and the cache has missed: select
    /// model and parameters, augment the prompt, and make exactly one
    /// backend attempt.
    async fn attempt(
        &self,
        request: &GenerationRequest,
        tier: ContextTier,
        started: Instant,
    ) -> Result<GenerationResponse, GatewayError> {
        // Cache hits return before this point, so only real attempts spend
        // half-open trial slots. Each claimed slot is resolved below by a
        // breaker success or, through the failure path, a breaker failure.
        if !self.breaker.write().await.begin_trial() {
            return Err(GatewayError::CircuitOpen);
        }

        let profile = self.config.tier_profile(tier).ok_or_else(|| {
            GatewayError::ConfigError(format!("no profile configured for tier {:?}", tier))
        })?;
        // Selection strategy is intentionally simple: first candidate wins.
        let model = profile
            .models
            .first()
            .cloned()
            .ok_or_else(|| {
                GatewayError::ConfigError(format!("no models configured for tier {:?}", tier))
            })?;

        let mut params = profile.params.clone();
        if let Some(max_tokens) = request.max_tokens {
            params.max_tokens = max_tokens;
        }
        if let Some(temperature) = request.temperature {
            params.temperature = temperature;
        }
        self.classifier
            .adjust(&mut params, request.context_score, profile.token_multiplier);

        let prompt = augment_prompt(&request.prompt, tier, request.context_score, &params);
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(prompt));

        let payload = ChatCompletionRequest {
            model: model.clone(),
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
        };

        let conn = self.pool.acquire(request.priority).await?;
        let send_started = Instant::now();
        let outcome = tokio::time::timeout(self.config.request_timeout(), conn.transport.send_chat(&payload))
            .await
            .unwrap_or_else(|_| {
                Err(GatewayError::Timeout(format!(
                    "request {} exceeded {}ms",
                    request.id, self.config.request_timeout_ms
                )))
            });
        let send_ms = send_started.elapsed().as_millis() as u64;

        let reply = match outcome {
            Ok(reply) => {
                self.pool.release(conn.id, true, send_ms).await;
                self.breaker.write().await.record_success();
                reply
            }
            Err(e) => {
                self.pool.release(conn.id, false, send_ms).await;
                return Err(e);
            }
        };

        let confidence = self.quality.estimate(&reply.content, tier);
        let processing_ms = started.elapsed().as_millis() as u64;
        let response = GenerationResponse {
            request_id: request.id,
            content: reply.content,
            model_used: model.clone(),
            tokens_used: reply.tokens_used,
            processing_ms,
            confidence,
            cache_hit: false,
            fallback_used: false,
            influence: TierInfluence {
                tier,
                context_score: request.context_score,
                model: model.clone(),
                temperature: params.temperature,
                max_tokens: params.max_tokens,
            },
        };

        self.metrics.record_success(send_ms).await;
        self.metrics.record_model(&model).await;
        if request.cache_eligible {
            self.cache
                .put(request_fingerprint(request, tier), &response);
        }

        Ok(response)
    }

    /// Failure accounting and fallback: record the outcome, then either
    /// synthesize a clearly marked degraded response or propagate the typed
    /// error.
    async fn fail(
        &self,
        request: &GenerationRequest,
        tier: ContextTier,
        error: GatewayError,
        started: Instant,
    ) -> Result<GenerationResponse, GatewayError> {
        // A breaker rejection never became an attempt, so it is not counted
        // as a breaker failure; doing so would hold the window open forever.
        if !matches!(error, GatewayError::CircuitOpen) {
            self.breaker.write().await.record_failure();
        }
        self.metrics.record_failure();

        if request.allow_fallback && error.is_recoverable() {
            warn!(
                "Request {} falling back after error: {}",
                request.id, error
            );
            self.metrics.record_fallback();
            Ok(self.synthesize_fallback(request, tier, &error, started))
        } else {
            Err(error)
        }
    }

    fn synthesize_fallback(
        &self,
        request: &GenerationRequest,
        tier: ContextTier,
        error: &GatewayError,
        started: Instant,
    ) -> GenerationResponse {
        let params = self
            .config
            .tier_profile(tier)
            .map(|p| p.params.clone())
            .unwrap_or_default();
        GenerationResponse {
            request_id: request.id,
            content: format!(
                "The inference service is temporarily unavailable ({}). \
                 This is a degraded placeholder response; please retry shortly.",
                error
            ),
            model_used: "fallback".to_string(),
            tokens_used: 0,
            processing_ms: started.elapsed().as_millis() as u64,
            confidence: FALLBACK_CONFIDENCE,
            cache_hit: false,
            fallback_used: true,
            influence: TierInfluence {
                tier,
                context_score: request.context_score,
                model: "fallback".to_string(),
                temperature: params.temperature,
                max_tokens: params.max_tokens,
            },
        }
    }
}

/// Wraps the user prompt in a short context block. The original prompt is
/// preserved verbatim.
pub fn augment_prompt(prompt: &str, tier: ContextTier, score: f64, params: &GenerationParams) -> String {
    format!(
        "[context: tier={} score={:.2} temperature={:.2} token_budget={}]\n\n{}",
        tier.as_str(),
        score,
        params.temperature,
        params.max_tokens,
        prompt
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn augmented_prompt_preserves_original_verbatim() {
        let params = GenerationParams::default();
        let original = "Explain ownership in Rust.\nUse examples.";
        let augmented = augment_prompt(original, ContextTier::High, 0.65, &params);

        assert!(augmented.ends_with(original));
        assert!(augmented.contains("tier=high"));
        assert!(augmented.contains("score=0.65"));
    }
}
