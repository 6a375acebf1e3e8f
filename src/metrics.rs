//! Prometheus metrics for the experiments engine.
//!
//! NOTE: participant identifiers never appear in labels; experiment and
//! alternative names are operator-controlled and low-cardinality.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Engine metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    /// Enrollments persisted, by experiment and alternative
    pub static ref ENROLLMENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("splitlab_enrollments_total", "Participants enrolled"),
        &["experiment", "alternative"]
    ).unwrap();

    /// Goal events written to the counter store, by experiment and goal
    pub static ref GOALS_RECORDED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("splitlab_goals_recorded_total", "Goal conversions recorded"),
        &["experiment", "goal"]
    ).unwrap();

    /// Goal events buffered for not-yet-confirmed participants
    pub static ref GOALS_BUFFERED_TOTAL: IntCounter = IntCounter::new(
        "splitlab_goals_buffered_total",
        "Goal conversions buffered pending human confirmation"
    ).unwrap();

    /// Participants confirmed as human (first confirmation only)
    pub static ref HUMAN_CONFIRMATIONS_TOTAL: IntCounter = IntCounter::new(
        "splitlab_human_confirmations_total",
        "Participants confirmed human"
    ).unwrap();

    /// Identity merges (anonymous session folded into an account)
    pub static ref INCORPORATIONS_TOTAL: IntCounter = IntCounter::new(
        "splitlab_incorporations_total",
        "Participant identities incorporated"
    ).unwrap();

    /// Counter-store operations degraded to zero/empty results
    pub static ref COUNTER_STORE_FAILURES: IntCounter = IntCounter::new(
        "splitlab_counter_store_failures_total",
        "Counter store errors recovered by degrading"
    ).unwrap();

    /// Lock acquire attempts that found the lock held
    pub static ref LOCK_CONTENTION_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("splitlab_lock_contention_total", "Contended lock acquire attempts"),
        &["name"]
    ).unwrap();
}

/// Register all engine metrics with the registry. Call once at startup.
pub fn register_metrics() {
    let registry = &*METRICS_REGISTRY;
    registry.register(Box::new(ENROLLMENTS_TOTAL.clone())).ok();
    registry.register(Box::new(GOALS_RECORDED_TOTAL.clone())).ok();
    registry.register(Box::new(GOALS_BUFFERED_TOTAL.clone())).ok();
    registry
        .register(Box::new(HUMAN_CONFIRMATIONS_TOTAL.clone()))
        .ok();
    registry.register(Box::new(INCORPORATIONS_TOTAL.clone())).ok();
    registry
        .register(Box::new(COUNTER_STORE_FAILURES.clone()))
        .ok();
    registry.register(Box::new(LOCK_CONTENTION_TOTAL.clone())).ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_counters_increment() {
        let before = GOALS_BUFFERED_TOTAL.get();
        GOALS_BUFFERED_TOTAL.inc();
        assert_eq!(GOALS_BUFFERED_TOTAL.get(), before + 1);
    }
}
