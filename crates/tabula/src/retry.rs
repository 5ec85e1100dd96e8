//! Transient-fault retry policies
//!
//! A [`RetryPolicy`] wraps connection-open or command-execute calls: faults
//! matched by the policy's transient predicate are retried with bounded
//! exponential backoff, everything else propagates immediately. The default
//! policy is a no-retry passthrough. Connection-level and command-level
//! policies are registered independently per connection identity.

use std::fmt;
use std::sync::{Arc, LazyLock};
use std::thread;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{error, warn};

use crate::error::{Error, Result};

/// Decides whether a fault is worth retrying
pub type TransientPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

fn default_predicate() -> TransientPredicate {
    Arc::new(|e: &Error| e.is_transient())
}

/// Bounded retry policy with exponential backoff
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt (0 = passthrough)
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling on any single delay
    pub max_delay: Duration,
    /// Backoff multiplier applied per retry
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 to 1.0) spread deterministically across attempts
    pub jitter_factor: f64,
    predicate: TransientPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter_factor", &self.jitter_factor)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// No-retry passthrough: the fault propagates on the first failure
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            predicate: default_predicate(),
        }
    }

    /// Policy allowing `max_retries` retries with default backoff
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::none()
        }
    }

    /// Fixed-delay policy: no exponential growth, no jitter
    pub fn fixed_delay(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
            predicate: default_predicate(),
        }
    }

    /// Set the delay before the first retry
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay ceiling
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the jitter factor, clamped to `0.0..=1.0`
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Replace the transient-fault predicate
    pub fn with_predicate(mut self, predicate: impl Fn(&Error) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Whether `error` would be retried by this policy
    pub fn is_transient(&self, error: &Error) -> bool {
        (self.predicate)(error)
    }

    /// Delay before retry number `attempt` (1-indexed; 0 means no wait)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        // exponent saturates at 30
        let capped_attempt = attempt.min(30);
        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(capped_attempt as i32 - 1);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let jitter = if self.jitter_factor > 0.0 {
            let jitter_range = capped_delay * self.jitter_factor;
            // Deterministic jitter spread by the golden ratio
            let jitter_value = (f64::from(attempt) * 0.618033988749895) % 1.0;
            jitter_range * (jitter_value - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((capped_delay + jitter).max(0.0) as u64)
    }

    /// Run `operation`, retrying transient faults up to the policy bound.
    ///
    /// Every retry re-invokes `operation` from the top; no partial resumption
    /// is attempted, so the operation must be idempotent at the statement
    /// level.
    pub fn run<T>(&self, mut operation: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match operation() {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !(self.predicate)(&e) || attempts > self.max_retries {
                        if attempts > 1 {
                            error!(attempts, error = %e, "retries exhausted");
                        }
                        return Err(e);
                    }
                    let delay = self.delay_for_attempt(attempts);
                    warn!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient fault, retrying"
                    );
                    thread::sleep(delay);
                }
            }
        }
    }
}

/// Connection-level and command-level policies for one connection identity
#[derive(Debug, Clone, Default)]
pub struct ConnectionPolicies {
    /// Applied around connection open
    pub connect: RetryPolicy,
    /// Applied around statement execution
    pub command: RetryPolicy,
}

static REGISTRY: LazyLock<DashMap<String, ConnectionPolicies>> = LazyLock::new(DashMap::new);

/// Register the retry policies used for `identity` (normally the connection
/// URL). Databases opened afterwards against that identity pick them up.
pub fn configure(identity: impl Into<String>, policies: ConnectionPolicies) {
    REGISTRY.insert(identity.into(), policies);
}

/// Policies registered for `identity`; no-retry passthroughs when absent
pub fn policies_for(identity: &str) -> ConnectionPolicies {
    REGISTRY
        .get(identity)
        .map(|entry| entry.value().clone())
        .unwrap_or_default()
}

/// Remove the policies registered for `identity`
pub fn clear(identity: &str) {
    REGISTRY.remove(identity);
}
