//! Hand-curated metric identifier sets, one per report type / storage class.
//!
//! The source API does not expose a uniform metric vocabulary across storage
//! classes, so each class carries its own list. Order is the request order.

/// Compute metrics for primary compute nodes.
pub const HOST_METRICS: &[&str] = &[
    "cpu.usage.average",
    "cpu.ready.summation",
    "mem.usage.average",
    "net.usage.average",
    "disk.usage.average",
];

/// Compute metrics for workload instances.
pub const VM_METRICS: &[&str] = &[
    "cpu.usage.average",
    "cpu.ready.summation",
    "cpu.costop.summation",
    "mem.usage.average",
    "net.usage.average",
];

/// I/O metrics for workloads on locally/SAN-attached volumes.
pub const BLOCK_IO_METRICS: &[&str] = &[
    "disk.numberReadAveraged.average",
    "disk.numberWriteAveraged.average",
    "disk.maxTotalLatency.latest",
    "disk.usage.average",
];

/// I/O metrics for workloads on network-attached volumes. Only meaningful
/// per-instance.
pub const NFS_IO_METRICS: &[&str] = &[
    "datastore.numberReadAveraged.average",
    "datastore.numberWriteAveraged.average",
    "datastore.totalReadLatency.average",
    "datastore.totalWriteLatency.average",
];

/// I/O metrics for workloads on distributed storage.
pub const VSAN_IO_METRICS: &[&str] = &[
    "vsan.dom.client.readIops",
    "vsan.dom.client.writeIops",
    "vsan.dom.client.readLatency",
    "vsan.dom.client.writeLatency",
    "vsan.health.status",
];

/// Materializes a static set as the owned list carried by an entity group.
pub fn to_owned_set(set: &[&str]) -> Vec<String> {
    set.iter().map(|m| m.to_string()).collect()
}
