// =============================================================================
// Rate-Limit Tracker — per-venue request budget, generalized across venues
// =============================================================================
//
// Same shape as a single-venue weight tracker, but keyed by endpoint class so
// one struct covers kraken/binance/okx/coinbase, each with different request
// weight budgets. Atomic counters so any adapter thread can check/update
// without a lock.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Per-endpoint-class weight budget and a rolling counter.
struct ClassBudget {
    hard_limit: u32,
    used: AtomicU32,
}

/// Tracks request weight per (venue, endpoint class) so adapters can check
/// `can_send` before issuing a request instead of discovering a 429 after
/// the fact.
pub struct RateLimiter {
    venue: String,
    classes: RwLock<HashMap<String, ClassBudget>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub venue: String,
    pub classes: Vec<ClassSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSnapshot {
    pub endpoint_class: String,
    pub used: u32,
    pub hard_limit: u32,
}

impl RateLimiter {
    pub fn new(venue: impl Into<String>) -> Self {
        Self {
            venue: venue.into(),
            classes: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or re-register) a budget for an endpoint class.
    pub fn set_budget(&self, endpoint_class: impl Into<String>, hard_limit: u32) {
        self.classes.write().insert(
            endpoint_class.into(),
            ClassBudget { hard_limit, used: AtomicU32::new(0) },
        );
    }

    /// Whether `weight` more units may be spent on `endpoint_class` without
    /// breaching its hard limit. Unknown classes are treated as unbounded.
    pub fn can_send(&self, endpoint_class: &str, weight: u32) -> bool {
        let classes = self.classes.read();
        match classes.get(endpoint_class) {
            Some(budget) => {
                let current = budget.used.load(Ordering::Relaxed);
                let allowed = current + weight <= budget.hard_limit;
                if !allowed {
                    warn!(
                        venue = %self.venue,
                        endpoint_class,
                        current_weight = current,
                        requested_weight = weight,
                        hard_limit = budget.hard_limit,
                        "request blocked — would exceed rate-limit"
                    );
                }
                allowed
            }
            None => true,
        }
    }

    pub fn record_spend(&self, endpoint_class: &str, weight: u32) {
        let classes = self.classes.read();
        if let Some(budget) = classes.get(endpoint_class) {
            budget.used.fetch_add(weight, Ordering::Relaxed);
        }
    }

    /// Reset every class counter. Call from a periodic timer matching the
    /// venue's window (e.g. once per minute).
    pub fn reset_all(&self) {
        let classes = self.classes.read();
        for budget in classes.values() {
            budget.used.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        let classes = self.classes.read();
        RateLimitSnapshot {
            venue: self.venue.clone(),
            classes: classes
                .iter()
                .map(|(class, budget)| ClassSnapshot {
                    endpoint_class: class.clone(),
                    used: budget.used.load(Ordering::Relaxed),
                    hard_limit: budget.hard_limit,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_class_is_unbounded() {
        let rl = RateLimiter::new("kraken");
        assert!(rl.can_send("klines", 1));
    }

    #[test]
    fn blocks_when_budget_exhausted() {
        let rl = RateLimiter::new("binance");
        rl.set_budget("klines", 10);
        rl.record_spend("klines", 9);
        assert!(rl.can_send("klines", 1));
        assert!(!rl.can_send("klines", 2));
    }

    #[test]
    fn reset_clears_usage() {
        let rl = RateLimiter::new("okx");
        rl.set_budget("book", 5);
        rl.record_spend("book", 5);
        assert!(!rl.can_send("book", 1));
        rl.reset_all();
        assert!(rl.can_send("book", 1));
    }
}
