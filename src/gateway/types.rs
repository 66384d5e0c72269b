// src/gateway/types.rs
//! Request/response types flowing through the gateway.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse context bucket derived from the caller-supplied 0.0-1.0 score.
/// Drives model selection and generation-parameter tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextTier {
    Low,
    Moderate,
    High,
    Peak,
}

impl ContextTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextTier::Low => "low",
            ContextTier::Moderate => "moderate",
            ContextTier::High => "high",
            ContextTier::Peak => "peak",
        }
    }
}

/// Request priority levels, recorded on acquisition for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestPriority {
    Critical = 4,
    High = 3,
    Medium = 2,
    Low = 1,
    Background = 0,
}

/// One generation request. Immutable once built; discarded after the call
/// completes except as a cache-key derivative.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub id: Uuid,
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Caller-supplied context intensity, 0.0-1.0. The heuristic that
    /// produces it lives outside the gateway.
    pub context_score: f64,
    pub priority: RequestPriority,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub cache_eligible: bool,
    pub allow_fallback: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, context_score: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            system_prompt: None,
            context_score: context_score.clamp(0.0, 1.0),
            priority: RequestPriority::Medium,
            max_tokens: None,
            temperature: None,
            cache_eligible: true,
            allow_fallback: true,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn without_caching(mut self) -> Self {
        self.cache_eligible = false;
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.allow_fallback = false;
        self
    }
}

/// Effective generation parameters sent to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 512,
            top_p: 0.9,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

/// How the context tier shaped this particular response.
#[derive(Debug, Clone, Serialize)]
pub struct TierInfluence {
    pub tier: ContextTier,
    pub context_score: f64,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Result of one gateway invocation. Exactly one of `cache_hit`,
/// `fallback_used`, or plain success holds for any response.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResponse {
    pub request_id: Uuid,
    pub content: String,
    pub model_used: String,
    pub tokens_used: u32,
    pub processing_ms: u64,
    pub confidence: f64,
    pub cache_hit: bool,
    pub fallback_used: bool,
    pub influence: TierInfluence,
}
