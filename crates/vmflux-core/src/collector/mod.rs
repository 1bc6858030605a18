//! Sample collection, one batched fetch per entity group.
//!
//! A failed fetch never aborts the run: the group contributes zero samples
//! and a warning is logged. Availability of the remaining data wins over
//! all-or-nothing semantics.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::models::{EntityGroup, MetricSample, StorageClass};
use crate::source::MetricsSource;

/// Bounded historical window for distributed-storage sampling; the source
/// has no instant mode for this class.
pub const DISTRIBUTED_WINDOW: Duration = Duration::from_secs(59 * 60);

/// Nominal interval stamped onto distributed-storage samples. The source
/// reports no interval for this class; this value is an assumption, not a
/// measured fact.
pub const DISTRIBUTED_NOMINAL_INTERVAL_SECS: i64 = 20;

/// Fetches the most recent samples for one group.
///
/// Returns an empty list when the fetch fails (e.g. an entity with
/// insufficient uptime for rollup metrics); logged, not propagated.
pub fn collect(source: &dyn MetricsSource, group: &EntityGroup) -> Vec<MetricSample> {
    let start = Instant::now();
    let result = match group.storage_class {
        StorageClass::Distributed => source.query_window(
            &group.entities,
            &group.metric_ids,
            DISTRIBUTED_WINDOW,
            DISTRIBUTED_NOMINAL_INTERVAL_SECS,
        ),
        _ => source.query_latest(&group.entities, &group.metric_ids),
    };

    let samples = match result {
        Ok(samples) => samples,
        Err(e) => {
            warn!(
                class = ?group.storage_class,
                entities = group.entities.len(),
                "sample fetch failed, group contributes no samples: {}", e
            );
            return Vec::new();
        }
    };

    // The network-attached vocabulary is only meaningful per-instance;
    // aggregate samples are discarded before they reach the encoder.
    let samples = if group.storage_class == StorageClass::NetworkAttached {
        let before = samples.len();
        let kept: Vec<MetricSample> = samples
            .into_iter()
            .filter(|s| !s.instance.is_empty())
            .collect();
        if kept.len() < before {
            debug!(
                dropped = before - kept.len(),
                "dropped instance-less network-attached samples"
            );
        }
        kept
    } else {
        samples
    };

    debug!(
        class = ?group.storage_class,
        samples = samples.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "group collected"
    );
    samples
}
