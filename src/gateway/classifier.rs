// src/gateway/classifier.rs
//! Replaceable business policy: context-score classification, generation
//! parameter adjustment, and the response-quality heuristic. The resilience
//! core (pool/breaker/cache) does not depend on any of this.

use crate::config::settings::TierThresholds;
use crate::gateway::types::{ContextTier, GenerationParams};

/// Maps the caller-supplied context score to a tier and applies
/// tier-proportional parameter adjustments.
pub trait ContextClassifier: Send + Sync {
    fn classify(&self, score: f64) -> ContextTier;

    /// Applies the tier-proportional adjustment on top of the tier defaults
    /// and any per-request overrides.
    fn adjust(&self, params: &mut GenerationParams, score: f64, token_multiplier: f64);
}

/// Threshold-bucket classifier with configurable cut points.
pub struct ThresholdClassifier {
    thresholds: TierThresholds,
}

impl ThresholdClassifier {
    pub fn new(thresholds: TierThresholds) -> Self {
        Self { thresholds }
    }
}

impl Default for ThresholdClassifier {
    fn default() -> Self {
        Self::new(TierThresholds::default())
    }
}

impl ContextClassifier for ThresholdClassifier {
    fn classify(&self, score: f64) -> ContextTier {
        if score >= self.thresholds.peak {
            ContextTier::Peak
        } else if score >= self.thresholds.high {
            ContextTier::High
        } else if score >= self.thresholds.moderate {
            ContextTier::Moderate
        } else {
            ContextTier::Low
        }
    }

    fn adjust(&self, params: &mut GenerationParams, score: f64, token_multiplier: f64) {
        params.temperature = (params.temperature + (score - 0.5) * 0.2).clamp(0.1, 1.0);
        params.max_tokens = ((params.max_tokens as f64) * token_multiplier).round() as u32;
    }
}

/// Heuristic confidence score for a generated response. Pluggable so the
/// gateway does not hard-depend on any particular scoring model.
pub trait ResponseQualityEstimator: Send + Sync {
    /// Returns a confidence in `[0.0, 1.0]`.
    fn estimate(&self, content: &str, tier: ContextTier) -> f64;
}

/// Default estimator: content length and structure, weighted by how well
/// the length matches what the tier's token budget suggests.
pub struct HeuristicQualityEstimator {
    length_weight: f64,
    structure_weight: f64,
    alignment_weight: f64,
}

impl Default for HeuristicQualityEstimator {
    fn default() -> Self {
        Self {
            length_weight: 0.25,
            structure_weight: 0.15,
            alignment_weight: 0.10,
        }
    }
}

impl HeuristicQualityEstimator {
    fn expected_len(tier: ContextTier) -> usize {
        match tier {
            ContextTier::Peak => 1200,
            ContextTier::High => 800,
            ContextTier::Moderate => 500,
            ContextTier::Low => 250,
        }
    }
}

impl ResponseQualityEstimator for HeuristicQualityEstimator {
    fn estimate(&self, content: &str, tier: ContextTier) -> f64 {
        if content.trim().is_empty() {
            return 0.0;
        }

        let len = content.len();
        let length_component = (len as f64 / 800.0).min(1.0) * self.length_weight;

        let structured = content.contains('\n') || content.matches(". ").count() >= 2;
        let structure_component = if structured { self.structure_weight } else { 0.0 };

        let expected = Self::expected_len(tier) as f64;
        let len_f = len as f64;
        let ratio = if len_f <= expected {
            len_f / expected
        } else {
            expected / len_f
        };
        let alignment_component = ratio.clamp(0.0, 1.0) * self.alignment_weight;

        (0.5 + length_component + structure_component + alignment_component).clamp(0.0, 1.0)
    }
}
