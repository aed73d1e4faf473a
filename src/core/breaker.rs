//! Per-endpoint circuit breakers.
//!
//! One breaker per agent endpoint, three states:
//! closed -> open -> half_open -> closed. The registry is constructor
//! injected and shared behind an Arc; all state updates happen under
//! one lock so concurrent failure bursts cannot lose updates.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Breaker tuning, shared by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Rolling window for the consecutive-failure count, in milliseconds.
    /// A failure older than this resets the count.
    #[serde(default = "default_failure_window_ms")]
    pub failure_window_ms: u64,

    /// Initial cooldown while open, in milliseconds
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Cooldown multiplier applied when a half-open trial fails
    #[serde(default = "default_cooldown_multiplier")]
    pub cooldown_multiplier: f64,

    /// Upper bound on the extended cooldown, in milliseconds
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_failure_window_ms() -> u64 {
    60_000
}
fn default_cooldown_ms() -> u64 {
    30_000
}
fn default_cooldown_multiplier() -> f64 {
    2.0
}
fn default_max_cooldown_ms() -> u64 {
    300_000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_window_ms: default_failure_window_ms(),
            cooldown_ms: default_cooldown_ms(),
            cooldown_multiplier: default_cooldown_multiplier(),
            max_cooldown_ms: default_max_cooldown_ms(),
        }
    }
}

/// Breaker state for one endpoint
#[derive(Debug, Clone)]
enum BreakerState {
    /// Calls pass through; tracks recent consecutive failures
    Closed {
        failures: u32,
        last_failure: Option<Instant>,
    },

    /// All calls short-circuit until the cooldown elapses
    Open { opened_at: Instant, cooldown: Duration },

    /// Exactly one trial call is in flight
    HalfOpen { cooldown: Duration },
}

/// Point-in-time view of one endpoint's breaker, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerSnapshot {
    Closed { failures: u32 },
    Open,
    HalfOpen,
}

/// Registry of breakers keyed by endpoint id
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, BreakerState>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Ask permission to call an endpoint.
    ///
    /// Returns false when the breaker is open (or a half-open trial is
    /// already in flight); in that case no network attempt may be made.
    /// When an open breaker's cooldown has elapsed, this admits exactly
    /// one caller as the half-open trial.
    pub fn try_acquire(&self, endpoint: &str) -> bool {
        let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
        let state = breakers
            .entry(endpoint.to_string())
            .or_insert(BreakerState::Closed {
                failures: 0,
                last_failure: None,
            });

        match state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { opened_at, cooldown } => {
                if opened_at.elapsed() >= *cooldown {
                    info!(endpoint, "Breaker cooldown elapsed, admitting trial call");
                    *state = BreakerState::HalfOpen { cooldown: *cooldown };
                    true
                } else {
                    false
                }
            }
            // Trial already in flight; everyone else waits
            BreakerState::HalfOpen { .. } => false,
        }
    }

    /// Record a successful call. Closes a half-open breaker and resets
    /// the failure count.
    pub fn record_success(&self, endpoint: &str) {
        let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
        if let Some(state) = breakers.get_mut(endpoint) {
            match state {
                BreakerState::HalfOpen { .. } => {
                    info!(endpoint, "Trial call succeeded, closing breaker");
                    *state = BreakerState::Closed {
                        failures: 0,
                        last_failure: None,
                    };
                }
                BreakerState::Closed { failures, last_failure } => {
                    *failures = 0;
                    *last_failure = None;
                }
                BreakerState::Open { .. } => {}
            }
        }
    }

    /// Record a failed call. Opens the breaker after the threshold is
    /// reached within the rolling window; reopens a half-open breaker
    /// with an extended cooldown.
    pub fn record_failure(&self, endpoint: &str) {
        let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
        let state = breakers
            .entry(endpoint.to_string())
            .or_insert(BreakerState::Closed {
                failures: 0,
                last_failure: None,
            });

        match state {
            BreakerState::Closed { failures, last_failure } => {
                let window = Duration::from_millis(self.config.failure_window_ms);
                let stale = last_failure
                    .map(|t| t.elapsed() > window)
                    .unwrap_or(false);
                if stale {
                    *failures = 0;
                }

                *failures += 1;
                *last_failure = Some(Instant::now());

                if *failures >= self.config.failure_threshold {
                    warn!(
                        endpoint,
                        failures = *failures,
                        "Failure threshold reached, opening breaker"
                    );
                    *state = BreakerState::Open {
                        opened_at: Instant::now(),
                        cooldown: Duration::from_millis(self.config.cooldown_ms),
                    };
                }
            }
            BreakerState::HalfOpen { cooldown } => {
                let extended = (cooldown.as_millis() as f64 * self.config.cooldown_multiplier)
                    .min(self.config.max_cooldown_ms as f64) as u64;
                warn!(
                    endpoint,
                    cooldown_ms = extended,
                    "Trial call failed, reopening breaker"
                );
                *state = BreakerState::Open {
                    opened_at: Instant::now(),
                    cooldown: Duration::from_millis(extended),
                };
            }
            BreakerState::Open { .. } => {}
        }
    }

    /// Snapshot of one endpoint's breaker
    pub fn snapshot(&self, endpoint: &str) -> BreakerSnapshot {
        let breakers = self.breakers.lock().expect("breaker lock poisoned");
        match breakers.get(endpoint) {
            None | Some(BreakerState::Closed { failures: 0, .. }) => {
                BreakerSnapshot::Closed { failures: 0 }
            }
            Some(BreakerState::Closed { failures, .. }) => BreakerSnapshot::Closed {
                failures: *failures,
            },
            Some(BreakerState::Open { .. }) => BreakerSnapshot::Open,
            Some(BreakerState::HalfOpen { .. }) => BreakerSnapshot::HalfOpen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            failure_window_ms: 60_000,
            cooldown_ms: 40,
            cooldown_multiplier: 2.0,
            max_cooldown_ms: 1_000,
        }
    }

    #[test]
    fn test_opens_after_threshold() {
        let registry = BreakerRegistry::new(fast_config());

        for _ in 0..2 {
            assert!(registry.try_acquire("extractor"));
            registry.record_failure("extractor");
        }
        assert_eq!(
            registry.snapshot("extractor"),
            BreakerSnapshot::Closed { failures: 2 }
        );

        assert!(registry.try_acquire("extractor"));
        registry.record_failure("extractor");

        assert_eq!(registry.snapshot("extractor"), BreakerSnapshot::Open);
        assert!(!registry.try_acquire("extractor"));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let registry = BreakerRegistry::new(fast_config());

        registry.record_failure("extractor");
        registry.record_failure("extractor");
        registry.record_success("extractor");
        registry.record_failure("extractor");

        // Two failures then reset, one more should not open
        assert_eq!(
            registry.snapshot("extractor"),
            BreakerSnapshot::Closed { failures: 1 }
        );
    }

    #[tokio::test]
    async fn test_half_open_admits_one_trial() {
        let registry = BreakerRegistry::new(fast_config());

        for _ in 0..3 {
            registry.record_failure("extractor");
        }
        assert!(!registry.try_acquire("extractor"));

        tokio::time::sleep(Duration::from_millis(60)).await;

        // First caller after cooldown becomes the trial
        assert!(registry.try_acquire("extractor"));
        assert_eq!(registry.snapshot("extractor"), BreakerSnapshot::HalfOpen);

        // Concurrent caller is still rejected
        assert!(!registry.try_acquire("extractor"));

        registry.record_success("extractor");
        assert_eq!(
            registry.snapshot("extractor"),
            BreakerSnapshot::Closed { failures: 0 }
        );
        assert!(registry.try_acquire("extractor"));
    }

    #[tokio::test]
    async fn test_failed_trial_extends_cooldown() {
        let registry = BreakerRegistry::new(fast_config());

        for _ in 0..3 {
            registry.record_failure("extractor");
        }

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(registry.try_acquire("extractor"));
        registry.record_failure("extractor");

        assert_eq!(registry.snapshot("extractor"), BreakerSnapshot::Open);

        // Original cooldown (40ms) has passed but the extended one (80ms) has not
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!registry.try_acquire("extractor"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.try_acquire("extractor"));
    }

    #[test]
    fn test_breakers_are_independent_per_endpoint() {
        let registry = BreakerRegistry::new(fast_config());

        for _ in 0..3 {
            registry.record_failure("extractor");
        }

        assert!(!registry.try_acquire("extractor"));
        assert!(registry.try_acquire("appraiser"));
    }
}
