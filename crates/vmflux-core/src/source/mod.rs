//! Abstraction over the Metrics Source service.
//!
//! The [`MetricsSource`] trait lets the pipeline run against the real
//! HTTP API ([`HttpSource`]) or an in-memory implementation for testing
//! ([`mock::MockSource`]).

pub mod http;
pub mod mock;

use std::collections::HashMap;
use std::time::Duration;

use crate::models::{EntityKind, EntityRef, MetricSample, StorageClass};

pub use http::{HttpSource, SourceTimeouts};

/// Error type for Metrics Source access.
#[derive(Debug)]
pub enum SourceError {
    /// Could not reach the source or the HTTP client failed to initialize.
    Connection(String),
    /// Session establishment (authentication) failed.
    Session(String),
    /// Base entity catalog enumeration failed. Fatal for the run.
    Enumeration(String),
    /// A sample query failed. Recoverable at the collector level.
    Query(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Connection(msg) => write!(f, "source connection: {}", msg),
            SourceError::Session(msg) => write!(f, "source session: {}", msg),
            SourceError::Enumeration(msg) => write!(f, "source enumeration: {}", msg),
            SourceError::Query(msg) => write!(f, "source query: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// One entity row of the source inventory.
#[derive(Debug, Clone)]
pub struct InventoryEntity {
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
    /// Powered-on and connected. Everything else is excluded from collection.
    pub connected: bool,
}

impl InventoryEntity {
    /// Converts to the [`EntityRef`] carried through the pipeline.
    pub fn to_ref(&self) -> EntityRef {
        EntityRef {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
        }
    }
}

/// One storage volume of the source inventory.
#[derive(Debug, Clone)]
pub struct InventoryVolume {
    pub id: String,
    pub name: String,
    pub class: StorageClass,
}

/// The source's entity catalog for one run.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub entities: Vec<InventoryEntity>,
    pub volumes: Vec<InventoryVolume>,
    /// Workload id -> ids of the volumes it resides on.
    pub residency: HashMap<String, Vec<String>>,
}

/// Access to the Metrics Source: inventory enumeration and sample queries.
///
/// All calls are blocking; one invocation of the pipeline issues them
/// sequentially.
pub trait MetricsSource {
    /// Enumerates the base entity catalog. A failure here aborts the run.
    fn inventory(&self) -> Result<Inventory, SourceError>;

    /// Fetches the most recent single sample per (entity, metric, instance).
    fn query_latest(
        &self,
        entities: &[EntityRef],
        metric_ids: &[String],
    ) -> Result<Vec<MetricSample>, SourceError>;

    /// Fetches samples over a bounded historical window, for classes where
    /// the source has no instant mode. `nominal_interval_secs` is stamped
    /// onto samples the source reports without an interval.
    fn query_window(
        &self,
        entities: &[EntityRef],
        metric_ids: &[String],
        window: Duration,
        nominal_interval_secs: i64,
    ) -> Result<Vec<MetricSample>, SourceError>;
}
