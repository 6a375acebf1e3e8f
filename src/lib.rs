//! Splitlab Library
//!
//! A/B testing engine: weighted enrollment, crash-tolerant conversion
//! counters, and the significance tests to interpret them.
//!
//! # Key Features
//! - Sticky weighted-random assignment with bot/human gating
//! - Concurrent per-participant counters with derived histograms
//! - Mann-Whitney U and chi-squared significance testing
//! - Session-to-account identity merge (`incorporate`)
//! - Expirable distributed lock for cluster-wide job serialization
//!
//! # Design
//! - Metadata, enrollment, and counter persistence are trait seams;
//!   in-memory implementations ship for embedded use and tests
//! - Counter reads and writes fail soft when the backend is down
//! - One [`context::ExperimentsContext`] wires everything together

pub mod config;
pub mod constants;
pub mod context;
pub mod counters;
pub mod enrollment;
pub mod errors;
pub mod experiment;
pub mod experiment_counters;
pub mod lock;
pub mod manager;
pub mod metrics;
pub mod participant;
pub mod report;
pub mod significance;
pub mod stats;
pub mod store;

// Re-export dependencies to ensure tests/benchmarks use the same version
pub use chrono;
pub use parking_lot;
pub use uuid;
