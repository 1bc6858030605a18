//! In-memory Metrics Source for testing the pipeline without a live API.
//!
//! `MockSource` holds a hand-built inventory and sample set, and can inject
//! failures per entity to exercise the partial-failure paths.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use super::{Inventory, InventoryEntity, InventoryVolume, MetricsSource, SourceError};
use crate::models::{EntityKind, EntityRef, MetricSample, SampleValue, StorageClass};

/// Fixed capture time used by scenario samples, for reproducible encoding.
pub fn scenario_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 30, 0).unwrap()
}

/// In-memory Metrics Source.
#[derive(Debug, Clone, Default)]
pub struct MockSource {
    entities: Vec<InventoryEntity>,
    volumes: Vec<InventoryVolume>,
    residency: HashMap<String, Vec<String>>,
    samples: Vec<MetricSample>,
    /// Entity ids whose presence in a query makes that query fail.
    failing_entities: HashSet<String>,
    fail_inventory: bool,
}

impl MockSource {
    /// Creates an empty mock source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a compute node to the inventory.
    pub fn add_host(&mut self, id: &str, name: &str, connected: bool) {
        self.entities.push(InventoryEntity {
            id: id.to_string(),
            name: name.to_string(),
            kind: EntityKind::Host,
            connected,
        });
    }

    /// Adds a workload instance to the inventory.
    pub fn add_vm(&mut self, id: &str, name: &str, connected: bool) {
        self.entities.push(InventoryEntity {
            id: id.to_string(),
            name: name.to_string(),
            kind: EntityKind::Vm,
            connected,
        });
    }

    /// Adds a storage volume to the inventory.
    pub fn add_volume(&mut self, id: &str, name: &str, class: StorageClass) {
        self.volumes.push(InventoryVolume {
            id: id.to_string(),
            name: name.to_string(),
            class,
        });
    }

    /// Records which volumes a workload resides on.
    pub fn place_vm(&mut self, vm_id: &str, volume_ids: &[&str]) {
        self.residency.insert(
            vm_id.to_string(),
            volume_ids.iter().map(|v| v.to_string()).collect(),
        );
    }

    /// Adds a numeric sample returned by matching queries.
    #[allow(clippy::too_many_arguments)]
    pub fn push_sample(
        &mut self,
        entity_id: &str,
        metric_id: &str,
        value: f64,
        unit: &str,
        interval_secs: i64,
        instance: &str,
        captured_at: DateTime<Utc>,
    ) {
        self.samples.push(MetricSample {
            entity_id: entity_id.to_string(),
            metric_id: metric_id.to_string(),
            value: SampleValue::Num(value),
            unit: unit.to_string(),
            interval_secs,
            instance: instance.to_string(),
            captured_at,
        });
    }

    /// Adds a textual sample (e.g. a health status).
    pub fn push_text_sample(
        &mut self,
        entity_id: &str,
        metric_id: &str,
        value: &str,
        captured_at: DateTime<Utc>,
    ) {
        self.samples.push(MetricSample {
            entity_id: entity_id.to_string(),
            metric_id: metric_id.to_string(),
            value: SampleValue::Text(value.to_string()),
            unit: String::new(),
            interval_secs: 0,
            instance: String::new(),
            captured_at,
        });
    }

    /// Makes every query containing this entity fail.
    pub fn fail_queries_for(&mut self, entity_id: &str) {
        self.failing_entities.insert(entity_id.to_string());
    }

    /// Makes inventory enumeration fail.
    pub fn fail_inventory(&mut self) {
        self.fail_inventory = true;
    }

    fn matching_samples(
        &self,
        entities: &[EntityRef],
        metric_ids: &[String],
    ) -> Result<Vec<MetricSample>, SourceError> {
        for entity in entities {
            if self.failing_entities.contains(&entity.id) {
                return Err(SourceError::Query(format!(
                    "no sampling window for {}",
                    entity.id
                )));
            }
        }

        let wanted: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        Ok(self
            .samples
            .iter()
            .filter(|s| wanted.contains(s.entity_id.as_str()))
            .filter(|s| metric_ids.iter().any(|m| *m == s.metric_id))
            .cloned()
            .collect())
    }

    /// A small lab: two hosts, three workloads spread across block, NFS and
    /// distributed volumes, with one sample per curated metric vocabulary.
    pub fn small_lab() -> Self {
        let mut source = Self::new();
        let at = scenario_time();

        source.add_host("host-1", "esx01", true);
        source.add_host("host-2", "esx02", true);
        source.add_vm("vm-42", "myvm002", true);
        source.add_vm("vm-7", "myvm001", true);
        source.add_vm("vm-99", "parked01", false);

        source.add_volume("ds-1", "local-ssd", StorageClass::Block);
        source.add_volume("ds-2", "filer-a", StorageClass::NetworkAttached);
        source.add_volume("ds-3", "hyperpool", StorageClass::Distributed);
        source.place_vm("vm-42", &["ds-1"]);
        source.place_vm("vm-7", &["ds-2"]);
        source.place_vm("vm-99", &["ds-3"]);

        source.push_sample("host-1", "cpu.usage.average", 31.5, "%", 20, "", at);
        source.push_sample("host-2", "cpu.usage.average", 12.0, "%", 20, "", at);
        source.push_sample("vm-42", "cpu.usage.average", 4.25, "%", 20, "", at);
        source.push_sample("vm-42", "cpu.ready.summation", 600.0, "ms", 20, "0", at);
        source.push_sample("vm-7", "cpu.usage.average", 8.5, "%", 20, "", at);
        source.push_sample(
            "vm-42",
            "disk.numberReadAveraged.average",
            42.0,
            "num",
            20,
            "scsi0:0",
            at,
        );
        source.push_sample(
            "vm-7",
            "datastore.totalReadLatency.average",
            3.0,
            "ms",
            20,
            "filer-a",
            at,
        );
        // Aggregate sample without an instance; NFS vocabulary is only
        // meaningful per-instance, so the collector must drop it.
        source.push_sample(
            "vm-7",
            "datastore.numberReadAveraged.average",
            17.0,
            "num",
            20,
            "",
            at,
        );

        source
    }
}

impl MetricsSource for MockSource {
    fn inventory(&self) -> Result<Inventory, SourceError> {
        if self.fail_inventory {
            return Err(SourceError::Enumeration(
                "inventory unavailable".to_string(),
            ));
        }
        Ok(Inventory {
            entities: self.entities.clone(),
            volumes: self.volumes.clone(),
            residency: self.residency.clone(),
        })
    }

    fn query_latest(
        &self,
        entities: &[EntityRef],
        metric_ids: &[String],
    ) -> Result<Vec<MetricSample>, SourceError> {
        self.matching_samples(entities, metric_ids)
    }

    fn query_window(
        &self,
        entities: &[EntityRef],
        metric_ids: &[String],
        _window: Duration,
        nominal_interval_secs: i64,
    ) -> Result<Vec<MetricSample>, SourceError> {
        // The window API reports no interval; stamp the nominal one, as the
        // HTTP implementation does.
        Ok(self
            .matching_samples(entities, metric_ids)?
            .into_iter()
            .map(|mut s| {
                s.interval_secs = nominal_interval_secs;
                s
            })
            .collect())
    }
}
