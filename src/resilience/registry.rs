//! Named circuit breaker registry.
//!
//! # Responsibilities
//! - Create breakers lazily, one per dependency name
//! - Resolve per-dependency configuration with a shared default
//! - Aggregate metrics and support targeted/bulk reset
//!
//! # Design Decisions
//! - Append-only: breakers are reset, never removed
//! - Reader/writer lock: lookups and metric reads run concurrently,
//!   creation takes the write lock and re-checks, so a name maps to one breaker
//! - Passed explicitly through application state, never a global

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::schema::BreakersConfig;
use crate::resilience::circuit_breaker::{
    BreakerConfig, BreakerMetrics, CircuitBreaker, StateListener,
};

/// Owns every circuit breaker in the process.
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    defaults: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    listener: Option<StateListener>,
}

impl BreakerRegistry {
    /// Empty registry where every breaker uses `defaults` unless created
    /// explicitly with its own configuration.
    pub fn new(defaults: BreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            defaults,
            overrides: HashMap::new(),
            listener: None,
        }
    }

    /// Registry configured from the `[breakers]` section.
    pub fn from_config(config: &BreakersConfig) -> Self {
        let mut registry = Self::new(config.default.to_breaker_config());
        registry.overrides = config
            .dependencies
            .iter()
            .map(|(name, settings)| (name.clone(), settings.to_breaker_config()))
            .collect();
        registry
    }

    /// Listener attached to every breaker created after this call.
    pub fn with_listener(mut self, listener: StateListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Breaker for `name` using the configured settings for that dependency.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        let config = self
            .overrides
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone());
        self.get_or_create(name, config)
    }

    /// Return the breaker for `name`, creating it with `config` if absent.
    ///
    /// The first registration wins; a differing `config` on later calls is
    /// ignored.
    pub fn get_or_create(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(
                    breaker = %name,
                    max_failures = config.max_failures,
                    open_timeout = ?config.open_timeout,
                    max_half_open_requests = config.max_half_open_requests,
                    "Circuit breaker created"
                );
                let mut breaker = CircuitBreaker::new(name, config);
                if let Some(listener) = &self.listener {
                    breaker = breaker.with_listener(listener.clone());
                }
                Arc::new(breaker)
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn all_metrics(&self) -> BTreeMap<String, BreakerMetrics> {
        self.snapshot()
            .into_iter()
            .map(|b| (b.name().to_string(), b.metrics()))
            .collect()
    }

    pub fn reset_all(&self) {
        for breaker in self.snapshot() {
            breaker.reset();
        }
    }

    /// Reset one breaker. Returns false if `name` was never registered.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Clone the breaker handles so per-breaker locks are never taken while
    /// the registry lock is held.
    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("breakers", &self.names())
            .field("defaults", &self.defaults)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BreakerSettings;
    use crate::resilience::circuit_breaker::BreakerState;
    use std::time::Duration;

    fn quick(max_failures: u32) -> BreakerConfig {
        BreakerConfig {
            max_failures,
            open_timeout: Duration::from_secs(60),
            max_half_open_requests: 1,
        }
    }

    #[test]
    fn first_registration_wins() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        let a = registry.get_or_create("sap", quick(2));
        let b = registry.get_or_create("sap", quick(9));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.config().max_failures, 2);
    }

    #[test]
    fn concurrent_creation_yields_one_breaker() {
        let registry = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
        let barrier = Arc::new(std::sync::Barrier::new(100));

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.get_or_create("orders", quick(3))
                })
            })
            .collect();

        let breakers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for breaker in &breakers {
            assert!(Arc::ptr_eq(breaker, &breakers[0]));
        }
        assert_eq!(registry.names(), vec!["orders".to_string()]);
    }

    #[test]
    fn breaker_uses_dependency_overrides() {
        let mut config = BreakersConfig::default();
        config.dependencies.insert(
            "legacy".into(),
            BreakerSettings {
                max_failures: 2,
                open_timeout_secs: 5,
                max_half_open_requests: 3,
            },
        );
        let registry = BreakerRegistry::from_config(&config);

        let legacy = registry.breaker("legacy");
        assert_eq!(legacy.config().max_failures, 2);
        assert_eq!(legacy.config().open_timeout, Duration::from_secs(5));
        assert_eq!(legacy.config().max_half_open_requests, 3);

        let modern = registry.breaker("modern");
        assert_eq!(*modern.config(), config.default.to_breaker_config());
    }

    #[test]
    fn get_does_not_create() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        assert!(registry.get("missing").is_none());
        assert!(registry.names().is_empty());
    }

    #[test]
    fn reset_targets_and_bulk() {
        let registry = BreakerRegistry::new(quick(1));
        for name in ["legacy", "modern"] {
            let _ = registry.breaker(name).call_sync(|| Err::<(), _>("down"));
        }
        assert_eq!(registry.breaker("legacy").state(), BreakerState::Open);

        assert!(registry.reset("legacy"));
        assert!(!registry.reset("unknown"));
        assert_eq!(registry.get("legacy").unwrap().state(), BreakerState::Closed);
        assert_eq!(registry.get("modern").unwrap().state(), BreakerState::Open);

        registry.reset_all();
        let metrics = registry.all_metrics();
        assert_eq!(metrics.len(), 2);
        assert!(metrics.values().all(|m| m.state == BreakerState::Closed));
    }
}
