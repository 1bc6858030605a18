//! Entity and storage classification.
//!
//! Turns the source inventory into [`EntityGroup`]s:
//! - compute reports get one group per report type with a fixed metric set;
//! - the I/O report additionally partitions workloads by the class of the
//!   volumes they reside on, with matching precedence
//!   Block -> NetworkAttached -> Distributed.
//!
//! Only powered-on/connected entities are included, and every group is sorted
//! by display name so downstream ordering is deterministic.

pub mod metricsets;

use std::collections::HashMap;

use regex::Regex;
use tracing::debug;

use crate::models::{EntityGroup, EntityKind, EntityRef, ReportType, StorageClass};
use crate::source::Inventory;

/// Error type for classification input validation.
#[derive(Debug)]
pub enum ClassifyError {
    /// The exclusion pattern is not a valid regular expression.
    BadPattern(String),
}

impl std::fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifyError::BadPattern(msg) => write!(f, "bad exclusion pattern: {}", msg),
        }
    }
}

impl std::error::Error for ClassifyError {}

/// Volume exclusion filters, applied before workload-to-class assignment.
///
/// Excluded volumes' workloads silently drop out of collection; they never
/// error.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilters {
    names: Vec<String>,
    pattern: Option<Regex>,
}

impl ExclusionFilters {
    /// No exclusions.
    pub fn none() -> Self {
        Self::default()
    }

    /// Builds filters from an exact-name list and an optional regex pattern.
    pub fn new(names: Vec<String>, pattern: Option<&str>) -> Result<Self, ClassifyError> {
        let pattern = match pattern {
            Some(p) => {
                Some(Regex::new(p).map_err(|e| ClassifyError::BadPattern(e.to_string()))?)
            }
            None => None,
        };
        Ok(Self { names, pattern })
    }

    /// Whether a volume name is excluded.
    pub fn excludes(&self, volume_name: &str) -> bool {
        if self.names.iter().any(|n| n == volume_name) {
            return true;
        }
        self.pattern
            .as_ref()
            .is_some_and(|p| p.is_match(volume_name))
    }
}

/// Partitions the inventory into entity groups for one report.
pub fn classify(
    inventory: &Inventory,
    report_type: ReportType,
    filters: &ExclusionFilters,
) -> Vec<EntityGroup> {
    match report_type {
        ReportType::Hosts => compute_group(
            inventory,
            EntityKind::Host,
            ReportType::Hosts,
            metricsets::HOST_METRICS,
        ),
        ReportType::Vms => compute_group(
            inventory,
            EntityKind::Vm,
            ReportType::Vms,
            metricsets::VM_METRICS,
        ),
        ReportType::Io => io_groups(inventory, filters),
    }
}

fn compute_group(
    inventory: &Inventory,
    kind: EntityKind,
    report_type: ReportType,
    metrics: &[&str],
) -> Vec<EntityGroup> {
    let mut entities: Vec<EntityRef> = inventory
        .entities
        .iter()
        .filter(|e| e.kind == kind && e.connected)
        .map(|e| e.to_ref())
        .collect();
    entities.sort_by(|a, b| a.name.cmp(&b.name));

    if entities.is_empty() {
        return Vec::new();
    }
    vec![EntityGroup {
        report_type,
        storage_class: StorageClass::Generic,
        entities,
        metric_ids: metricsets::to_owned_set(metrics),
    }]
}

/// Storage-class matching precedence for workload assignment.
const CLASS_PRECEDENCE: &[StorageClass] = &[
    StorageClass::Block,
    StorageClass::NetworkAttached,
    StorageClass::Distributed,
];

fn io_metric_set(class: StorageClass) -> &'static [&'static str] {
    match class {
        StorageClass::Block => metricsets::BLOCK_IO_METRICS,
        StorageClass::NetworkAttached => metricsets::NFS_IO_METRICS,
        StorageClass::Distributed => metricsets::VSAN_IO_METRICS,
        StorageClass::Generic => &[],
    }
}

fn io_groups(inventory: &Inventory, filters: &ExclusionFilters) -> Vec<EntityGroup> {
    // Volume class lookup, minus excluded volumes.
    let mut volume_class: HashMap<&str, StorageClass> = HashMap::new();
    for volume in &inventory.volumes {
        if filters.excludes(&volume.name) {
            debug!(volume = %volume.name, "volume excluded from I/O classification");
            continue;
        }
        volume_class.insert(volume.id.as_str(), volume.class);
    }

    let mut by_class: HashMap<StorageClass, Vec<EntityRef>> = HashMap::new();
    for entity in &inventory.entities {
        if entity.kind != EntityKind::Vm || !entity.connected {
            continue;
        }
        let Some(volume_ids) = inventory.residency.get(&entity.id) else {
            continue;
        };
        let classes: Vec<StorageClass> = volume_ids
            .iter()
            .filter_map(|id| volume_class.get(id.as_str()).copied())
            .collect();

        // A workload lands in at most one class, by precedence.
        let assigned = CLASS_PRECEDENCE
            .iter()
            .copied()
            .find(|class| classes.contains(class));
        if let Some(class) = assigned {
            by_class.entry(class).or_default().push(entity.to_ref());
        }
    }

    let mut groups = Vec::new();
    for class in CLASS_PRECEDENCE {
        if let Some(mut entities) = by_class.remove(class) {
            entities.sort_by(|a, b| a.name.cmp(&b.name));
            groups.push(EntityGroup {
                report_type: ReportType::Io,
                storage_class: *class,
                entities,
                metric_ids: metricsets::to_owned_set(io_metric_set(*class)),
            });
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mock::MockSource;
    use crate::source::MetricsSource;

    #[test]
    fn test_hosts_report_single_sorted_group() {
        let inventory = MockSource::small_lab().inventory().unwrap();
        let groups = classify(&inventory, ReportType::Hosts, &ExclusionFilters::none());

        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.storage_class, StorageClass::Generic);
        let names: Vec<&str> = group.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["esx01", "esx02"]);
        assert_eq!(group.metric_ids[0], "cpu.usage.average");
    }

    #[test]
    fn test_vms_report_excludes_powered_off() {
        let inventory = MockSource::small_lab().inventory().unwrap();
        let groups = classify(&inventory, ReportType::Vms, &ExclusionFilters::none());

        assert_eq!(groups.len(), 1);
        let names: Vec<&str> = groups[0].entities.iter().map(|e| e.name.as_str()).collect();
        // parked01 is powered off and must not appear.
        assert_eq!(names, vec!["myvm001", "myvm002"]);
    }

    #[test]
    fn test_io_report_partitions_by_storage_class() {
        let inventory = MockSource::small_lab().inventory().unwrap();
        let groups = classify(&inventory, ReportType::Io, &ExclusionFilters::none());

        // vm-99 is powered off, so only Block (vm-42) and NFS (vm-7) remain.
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].storage_class, StorageClass::Block);
        assert_eq!(groups[0].entities[0].name, "myvm002");
        assert_eq!(groups[1].storage_class, StorageClass::NetworkAttached);
        assert_eq!(groups[1].entities[0].name, "myvm001");
        assert_ne!(groups[0].metric_ids, groups[1].metric_ids);
    }

    #[test]
    fn test_io_precedence_block_wins() {
        let mut source = MockSource::new();
        source.add_vm("vm-1", "straddler", true);
        source.add_volume("ds-b", "local", StorageClass::Block);
        source.add_volume("ds-n", "filer", StorageClass::NetworkAttached);
        source.place_vm("vm-1", &["ds-n", "ds-b"]);

        let inventory = source.inventory().unwrap();
        let groups = classify(&inventory, ReportType::Io, &ExclusionFilters::none());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].storage_class, StorageClass::Block);
    }

    #[test]
    fn test_exclusion_by_exact_name_drops_workload() {
        let inventory = MockSource::small_lab().inventory().unwrap();
        let filters = ExclusionFilters::new(vec!["local-ssd".to_string()], None).unwrap();
        let groups = classify(&inventory, ReportType::Io, &filters);

        // vm-42's only volume is excluded, so only the NFS group remains.
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].storage_class, StorageClass::NetworkAttached);
    }

    #[test]
    fn test_exclusion_by_pattern() {
        let inventory = MockSource::small_lab().inventory().unwrap();
        let filters = ExclusionFilters::new(Vec::new(), Some("^filer-")).unwrap();
        let groups = classify(&inventory, ReportType::Io, &filters);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].storage_class, StorageClass::Block);
    }

    #[test]
    fn test_bad_pattern_is_rejected() {
        assert!(matches!(
            ExclusionFilters::new(Vec::new(), Some("([")),
            Err(ClassifyError::BadPattern(_))
        ));
    }

    #[test]
    fn test_empty_inventory_yields_no_groups() {
        let inventory = Inventory::default();
        assert!(classify(&inventory, ReportType::Hosts, &ExclusionFilters::none()).is_empty());
        assert!(classify(&inventory, ReportType::Io, &ExclusionFilters::none()).is_empty());
    }
}
