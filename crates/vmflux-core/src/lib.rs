//! vmflux-core — sample-collection pipeline for shipping virtualization
//! performance metrics to a line-protocol time-series sink.
//!
//! Provides:
//! - `admission` — suppression-marker gate and startup jitter
//! - `classify` — entity enumeration and storage-class partitioning
//! - `collector` — batched, partial-failure-tolerant sample fetching
//! - `encode` — line-protocol record construction (cardinality policy,
//!   derived metrics, name sanitization)
//! - `write` — throttled HTTP dispatch to the sink
//! - `credentials` — sink credential resolution chain
//! - `source` — Metrics Source abstraction (HTTP client + in-memory mock)
//! - `models` — shared data model
//! - `run` — per-invocation coordination of the above

pub mod admission;
pub mod classify;
pub mod collector;
pub mod credentials;
pub mod encode;
pub mod models;
pub mod run;
pub mod source;
pub mod write;
