// src/cache.rs
//! TTL- and size-bounded response cache keyed by a normalized request
//! fingerprint. Expiry is enforced on read; at capacity the single oldest
//! entry (by insertion time) is evicted before insert.

use crate::gateway::types::{ContextTier, GenerationRequest, GenerationResponse};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Responses below this confidence are never cached; it keeps degraded and
/// fallback output out of the cache.
const MIN_CACHEABLE_CONFIDENCE: f64 = 0.5;

/// Normalized request fingerprint: two requests share a key only when they
/// would produce equivalent output context.
pub fn request_fingerprint(request: &GenerationRequest, tier: ContextTier) -> u64 {
    let mut hasher = DefaultHasher::new();
    request.prompt.hash(&mut hasher);
    request.system_prompt.hash(&mut hasher);
    tier.hash(&mut hasher);
    request.max_tokens.hash(&mut hasher);
    request.temperature.map(f64::to_bits).hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
            max_size: 1000,
        }
    }
}

struct CacheEntry {
    response: GenerationResponse,
    inserted_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct ResponseCache {
    config: CacheConfig,
    entries: DashMap<u64, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks up a fresh entry. Expired entries are evicted as part of the
    /// same per-key operation and reported as misses.
    pub fn get(&self, key: u64) -> Option<GenerationResponse> {
        if !self.config.enabled {
            return None;
        }
        match self.entries.entry(key) {
            Entry::Occupied(occupied) => {
                if occupied.get().inserted_at.elapsed() < self.config.ttl {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    let mut response = occupied.get().response.clone();
                    response.cache_hit = true;
                    Some(response)
                } else {
                    debug!("Cache entry {:x} expired, evicting", key);
                    occupied.remove();
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            }
            Entry::Vacant(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores a response unless caching is off, the response was itself a
    /// cache hit, or its confidence is too low to be worth replaying.
    pub fn put(&self, key: u64, response: &GenerationResponse) {
        if !self.config.enabled || response.cache_hit {
            return;
        }
        if response.confidence < MIN_CACHEABLE_CONFIDENCE {
            debug!(
                "Not caching response for request {} (confidence {:.2})",
                response.request_id, response.confidence
            );
            return;
        }

        // Overwriting a present key does not change the entry count, so
        // eviction only applies to genuinely new keys.
        if !self.entries.contains_key(&key) {
            while self.entries.len() >= self.config.max_size {
                match self.oldest_key() {
                    Some(oldest) => {
                        debug!("Cache full, evicting oldest entry {:x}", oldest);
                        self.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                response: response.clone(),
                inserted_at: Instant::now(),
            },
        );
    }

    fn oldest_key(&self) -> Option<u64> {
        self.entries
            .iter()
            .min_by_key(|entry| entry.value().inserted_at)
            .map(|entry| *entry.key())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::types::TierInfluence;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn response(content: &str, confidence: f64) -> GenerationResponse {
        GenerationResponse {
            request_id: Uuid::new_v4(),
            content: content.to_string(),
            model_used: "mistral-7b-instruct".to_string(),
            tokens_used: 40,
            processing_ms: 120,
            confidence,
            cache_hit: false,
            fallback_used: false,
            influence: TierInfluence {
                tier: ContextTier::Moderate,
                context_score: 0.5,
                model: "mistral-7b-instruct".to_string(),
                temperature: 0.7,
                max_tokens: 512,
            },
        }
    }

    fn cache(ttl: Duration, max_size: usize) -> ResponseCache {
        ResponseCache::new(CacheConfig {
            enabled: true,
            ttl,
            max_size,
        })
    }

    #[test]
    fn put_then_get_returns_hit() {
        let cache = cache(Duration::from_secs(300), 10);
        let request = GenerationRequest::new("what is the capital of peru", 0.5);
        let key = request_fingerprint(&request, ContextTier::Moderate);

        cache.put(key, &response("Lima.", 0.8));
        let hit = cache.get(key).expect("expected a cache hit");
        assert!(hit.cache_hit);
        assert_eq!(hit.content, "Lima.");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn expired_entry_is_a_miss_and_evicted() {
        let cache = cache(Duration::from_millis(30), 10);
        let request = GenerationRequest::new("short lived", 0.5);
        let key = request_fingerprint(&request, ContextTier::Moderate);

        cache.put(key, &response("gone soon", 0.9));
        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.get(key).is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn low_confidence_responses_are_not_cached() {
        let cache = cache(Duration::from_secs(300), 10);
        cache.put(1, &response("shaky answer", 0.3));
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn cache_hits_are_not_recached() {
        let cache = cache(Duration::from_secs(300), 10);
        let mut resp = response("already cached", 0.9);
        resp.cache_hit = true;
        cache.put(2, &resp);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn insertion_beyond_capacity_evicts_exactly_the_oldest() {
        let cache = cache(Duration::from_secs(300), 3);
        for key in 0..3u64 {
            cache.put(key, &response(&format!("entry {}", key), 0.9));
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(cache.stats().entries, 3);

        cache.put(99, &response("newest", 0.9));
        assert_eq!(cache.stats().entries, 3);
        assert!(cache.get(0).is_none(), "oldest entry should be evicted");
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_some());
        assert!(cache.get(99).is_some());
    }

    #[test]
    fn overwriting_a_present_key_in_a_full_cache_evicts_nothing() {
        let cache = cache(Duration::from_secs(300), 3);
        for key in 0..3u64 {
            cache.put(key, &response(&format!("entry {}", key), 0.9));
            std::thread::sleep(Duration::from_millis(2));
        }

        cache.put(0, &response("entry 0 refreshed", 0.9));
        assert_eq!(cache.stats().entries, 3);
        for key in 0..3u64 {
            assert!(cache.get(key).is_some());
        }
        assert_eq!(cache.get(0).expect("refreshed entry").content, "entry 0 refreshed");
    }

    #[test]
    fn fingerprint_distinguishes_parameter_overrides() {
        let base = GenerationRequest::new("same prompt", 0.5);
        let tweaked = GenerationRequest::new("same prompt", 0.5).with_max_tokens(64);

        let k1 = request_fingerprint(&base, ContextTier::Moderate);
        let k2 = request_fingerprint(&tweaked, ContextTier::Moderate);
        let k3 = request_fingerprint(&base, ContextTier::Peak);
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn disabled_cache_never_hits() {
        let cache = ResponseCache::new(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        cache.put(7, &response("ignored", 0.9));
        assert!(cache.get(7).is_none());
    }
}
