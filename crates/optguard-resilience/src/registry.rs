//! Registry of circuit breakers keyed by dependency name.
//!
//! Owned and passed to callers explicitly; tests build a fresh registry
//! instead of resetting hidden global state.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use optguard_core::{Clock, SystemClock};
use tracing::debug;

use crate::breaker::{BreakerConfig, BreakerStatus, CircuitBreaker};
use crate::error::BreakerError;

/// Shared set of per-dependency breakers.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    clock: Arc<dyn Clock>,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl BreakerRegistry {
    pub fn new(default_config: BreakerConfig) -> Self {
        Self::with_clock(default_config, Arc::new(SystemClock))
    }

    pub fn with_clock(default_config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
            overrides: HashMap::new(),
            clock,
        }
    }

    /// Use `config` instead of the default for the dependency `name`.
    #[must_use]
    pub fn with_override(mut self, name: impl Into<String>, config: BreakerConfig) -> Self {
        self.overrides.insert(name.into(), config);
        self
    }

    /// Get the breaker for `name`, creating it on first use.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            let config = self
                .overrides
                .get(name)
                .cloned()
                .unwrap_or_else(|| self.default_config.clone());
            debug!(breaker = name, ?config, "Registering circuit breaker");
            Arc::new(CircuitBreaker::with_clock(name, config, Arc::clone(&self.clock)))
        });
        Arc::clone(entry.value())
    }

    /// Run `op` through the breaker for `name`.
    pub async fn call<F, Fut, T, E>(&self, name: &str, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.breaker(name).call(op).await
    }

    /// Status of one breaker, `None` if it was never used.
    pub fn status(&self, name: &str) -> Option<BreakerStatus> {
        self.breakers.get(name).map(|b| b.status())
    }

    /// Status of every registered breaker, sorted by name.
    pub fn statuses(&self) -> Vec<BreakerStatus> {
        let mut all: Vec<BreakerStatus> = self.breakers.iter().map(|b| b.status()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Reset one breaker to CLOSED. Returns false if unknown.
    pub fn reset(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            Some(b) => {
                b.reset();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerState;
    use optguard_core::ManualClock;

    #[test]
    fn test_same_name_shares_instance() {
        let registry = BreakerRegistry::default();
        let a = registry.breaker("alpaca");
        let b = registry.breaker("alpaca");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &registry.breaker("openai")));
    }

    #[tokio::test]
    async fn test_breakers_are_independent() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = BreakerRegistry::with_clock(
            BreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            clock,
        );

        let _ = registry
            .call("alpaca", || async { Err::<(), _>("down") })
            .await;
        assert_eq!(registry.status("alpaca").unwrap().state, BreakerState::Open);

        let ok = registry
            .call("market_data", || async { Ok::<_, &'static str>(1) })
            .await;
        assert_eq!(ok.unwrap(), 1);
        assert_eq!(
            registry.status("market_data").unwrap().state,
            BreakerState::Closed
        );
    }

    #[test]
    fn test_override_config_applies() {
        let registry = BreakerRegistry::default().with_override(
            "alpaca",
            BreakerConfig {
                failure_threshold: 9,
                ..Default::default()
            },
        );
        assert_eq!(registry.breaker("alpaca").config().failure_threshold, 9);
        assert_eq!(registry.breaker("other").config().failure_threshold, 5);
    }

    #[test]
    fn test_statuses_sorted_and_reset() {
        let registry = BreakerRegistry::default();
        registry.breaker("b");
        registry.breaker("a");
        let names: Vec<_> = registry.statuses().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(registry.reset("a"));
        assert!(!registry.reset("missing"));
        assert!(registry.status("missing").is_none());
    }
}
