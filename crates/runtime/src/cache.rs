//! Bounded LRU cache of model instances keyed by configuration identity.
//!
//! Lookups, inserts, and evictions happen under one cache-wide lock.
//! Construction happens outside it: every key maps to a shared
//! [`OnceCell`], so concurrent acquisitions of a missing key wait on a
//! single build while other keys proceed independently.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};
use tts_core::{ModelConfig, ModelConfigId, TtsEngine, TtsError, TtsResult};

use crate::instance::ModelInstance;
use crate::metrics::TtsMetrics;

type Slot = Arc<OnceCell<Arc<ModelInstance>>>;

/// LRU cache owning every model instance.
pub struct ModelCache {
    engine: Arc<dyn TtsEngine>,
    slots: Mutex<LruCache<ModelConfigId, Slot>>,
    metrics: TtsMetrics,
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl ModelCache {
    /// Create a cache holding at most `capacity` instances (minimum 1).
    pub fn new(engine: Arc<dyn TtsEngine>, capacity: usize, metrics: TtsMetrics) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            engine,
            slots: Mutex::new(LruCache::new(capacity)),
            metrics,
        }
    }

    /// Maximum number of cached instances.
    pub fn capacity(&self) -> usize {
        self.slots.lock().cap().get()
    }

    /// Number of cached (or building) instances.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` is cached, without touching its recency.
    pub fn contains(&self, id: &ModelConfigId) -> bool {
        self.slots.lock().contains(id)
    }

    /// Cached identities, most recently used first.
    pub fn ids(&self) -> Vec<ModelConfigId> {
        self.slots.lock().iter().map(|(id, _)| id.clone()).collect()
    }

    /// Fetch the instance for `config`, building it on a miss.
    ///
    /// A hit marks the entry most recently used. A miss inserts a slot and,
    /// when that overflows capacity, evicts exactly the least recently used
    /// entry. A failed build leaves no entry behind.
    #[instrument(skip(self, config), fields(config = %config.id))]
    pub async fn acquire(&self, config: &ModelConfig) -> TtsResult<Arc<ModelInstance>> {
        let slot = self.slot(&config.id);

        if let Some(instance) = slot.get() {
            self.metrics.cache_hit();
            return Ok(Arc::clone(instance));
        }

        let result = slot
            .get_or_try_init(|| self.build(config.clone()))
            .await
            .map(Arc::clone);

        if result.is_err() {
            let mut slots = self.slots.lock();
            if slots.peek(&config.id).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                slots.pop(&config.id);
            }
            self.metrics.set_cache_entries(slots.len());
        }
        result
    }

    /// Look up or insert the slot for `id`, evicting on overflow.
    fn slot(&self, id: &ModelConfigId) -> Slot {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(id) {
            return Arc::clone(slot);
        }

        let slot: Slot = Arc::new(OnceCell::new());
        if let Some((evicted, old)) = slots.push(id.clone(), Arc::clone(&slot)) {
            self.metrics.cache_eviction();
            info!(evicted = %evicted, built = old.initialized(), "model instance evicted");
        }
        self.metrics.set_cache_entries(slots.len());
        slot
    }

    async fn build(&self, config: ModelConfig) -> TtsResult<Arc<ModelInstance>> {
        self.metrics.cache_miss();
        let engine = Arc::clone(&self.engine);
        let id = config.id.clone();
        let start = Instant::now();
        info!(config = %id, "loading model instance");

        let instance = tokio::task::spawn_blocking(move || {
            let model = engine.load(&config)?;
            Ok::<_, TtsError>(ModelInstance::new(config, model))
        })
        .await
        .map_err(|e| TtsError::internal(format!("model load task failed: {e}")))?
        .inspect_err(|e| warn!(config = %id, error = %e, "model load failed"))?;

        let ms = start.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record_model_load(ms);
        info!(config = %id, load_ms = ms, "model instance ready");
        Ok(Arc::new(instance))
    }

    /// Fetch without building and without touching recency.
    pub fn peek(&self, id: &ModelConfigId) -> Option<Arc<ModelInstance>> {
        self.slots
            .lock()
            .peek(id)
            .and_then(|slot| slot.get().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEngine;

    fn config(name: &str) -> ModelConfig {
        ModelConfig::from_yaml_str(ModelConfigId::resolve(name), "{}").unwrap()
    }

    #[tokio::test]
    async fn test_hit_returns_same_instance() {
        let engine = Arc::new(MockEngine::new());
        let cache = ModelCache::new(engine.clone(), 2, TtsMetrics::init_noop());

        let a = cache.acquire(&config("a.yaml")).await.unwrap();
        let b = cache.acquire(&config("a.yaml")).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(engine.loads(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_build_is_not_cached() {
        let engine = Arc::new(MockEngine::new());
        let cache = ModelCache::new(engine.clone(), 2, TtsMetrics::init_noop());

        engine.fail_loads(true);
        assert!(cache.acquire(&config("a.yaml")).await.is_err());
        assert!(cache.is_empty());

        engine.fail_loads(false);
        assert!(cache.acquire(&config("a.yaml")).await.is_ok());
        assert_eq!(engine.loads(), 2);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let cache = ModelCache::new(Arc::new(MockEngine::new()), 0, TtsMetrics::init_noop());
        assert_eq!(cache.capacity(), 1);
    }

    #[tokio::test]
    async fn test_peek_does_not_build() {
        let engine = Arc::new(MockEngine::new());
        let cache = ModelCache::new(engine.clone(), 2, TtsMetrics::init_noop());
        assert!(cache.peek(&ModelConfigId::resolve("a.yaml")).is_none());
        assert_eq!(engine.loads(), 0);
    }
}
