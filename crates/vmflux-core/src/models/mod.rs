//! Shared data model for the collection pipeline.
//!
//! Everything in here is plain data: built once per run, threaded through the
//! classifier, collector and encoder, and discarded at run end. The only
//! long-lived state in the system is the suppression marker (see
//! [`crate::admission`]).

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default escape sequence substituted for whitespace in display names.
///
/// Backslash-space keeps the visual spacing of the original name instead of
/// collapsing it, and passes through the line-protocol tag parser verbatim.
pub const DEFAULT_WHITESPACE_ESCAPE: &str = "\\ ";

/// Kind of monitored entity in the source inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    /// Primary compute node (physical host).
    Host,
    /// Workload instance (virtual machine).
    Vm,
}

/// Reference to a monitored entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Stable identifier assigned by the source (e.g. `vm-42`).
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    pub kind: EntityKind,
}

/// Backing-volume category of a workload.
///
/// Determines which metric vocabulary applies: the source API does not expose
/// a uniform set of identifiers across storage classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageClass {
    /// No storage partitioning (compute reports).
    Generic,
    /// Locally or SAN-attached volumes.
    Block,
    /// NFS-like network-attached volumes.
    NetworkAttached,
    /// Hyper-converged / distributed storage.
    Distributed,
}

impl StorageClass {
    /// Wire value for the `disktype` tag, `None` for [`StorageClass::Generic`].
    pub fn disktype_tag(&self) -> Option<&'static str> {
        match self {
            StorageClass::Generic => None,
            StorageClass::Block => Some("Block"),
            StorageClass::NetworkAttached => Some("NFS"),
            StorageClass::Distributed => Some("vSAN"),
        }
    }
}

/// Which report a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportType {
    /// Primary compute nodes.
    Hosts,
    /// Workload instances, compute metrics.
    Vms,
    /// Workload instances partitioned by storage class, I/O metrics.
    Io,
}

impl ReportType {
    /// Wire value for the `type` tag.
    pub fn entity_tag(&self) -> &'static str {
        match self {
            ReportType::Hosts => "VMHost",
            ReportType::Vms | ReportType::Io => "VM",
        }
    }
}

impl FromStr for ReportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hosts" => Ok(ReportType::Hosts),
            "vms" => Ok(ReportType::Vms),
            "io" => Ok(ReportType::Io),
            other => Err(format!(
                "unknown report type '{}' (expected hosts, vms or io)",
                other
            )),
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportType::Hosts => write!(f, "hosts"),
            ReportType::Vms => write!(f, "vms"),
            ReportType::Io => write!(f, "io"),
        }
    }
}

/// Raw sample value as reported by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Num(f64),
    /// Textual status value (e.g. a health summary).
    Text(String),
}

/// One point sample produced by the Metrics Source.
///
/// Immutable; consumed exactly once by the encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub entity_id: String,
    pub metric_id: String,
    pub value: SampleValue,
    pub unit: String,
    /// Sampling interval in seconds the value covers.
    pub interval_secs: i64,
    /// Per-instance qualifier (disk, core, ...); empty for aggregate samples.
    pub instance: String,
    /// Capture time at the source.
    pub captured_at: DateTime<Utc>,
}

/// A set of entities sharing one metric vocabulary.
///
/// Built once per run by the classifier. Entities are sorted by display name
/// so downstream ordering is deterministic.
#[derive(Debug, Clone)]
pub struct EntityGroup {
    pub report_type: ReportType,
    pub storage_class: StorageClass,
    /// Members, sorted by display name.
    pub entities: Vec<EntityRef>,
    /// Metric identifiers requested for this group, in request order.
    pub metric_ids: Vec<String>,
}

impl EntityGroup {
    /// Resolves an entity id to its display name within this group.
    ///
    /// Returns `None` when the entity is no longer present (vanished mid-run).
    pub fn display_name(&self, entity_id: &str) -> Option<&str> {
        self.entities
            .iter()
            .find(|e| e.id == entity_id)
            .map(|e| e.name.as_str())
    }
}

/// How much identifying detail is folded into the measurement name versus
/// left as queryable tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CardinalityMode {
    /// Bare metric identifier; entity identity lives only in tags.
    #[default]
    Standard,
    /// Metric identifier + entity display name.
    Advanced,
    /// Metric identifier + entity display name + instance (when present).
    Overkill,
}

impl FromStr for CardinalityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(CardinalityMode::Standard),
            "advanced" => Ok(CardinalityMode::Advanced),
            "overkill" => Ok(CardinalityMode::Overkill),
            other => Err(format!(
                "unknown cardinality mode '{}' (expected standard, advanced or overkill)",
                other
            )),
        }
    }
}

impl fmt::Display for CardinalityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardinalityMode::Standard => write!(f, "standard"),
            CardinalityMode::Advanced => write!(f, "advanced"),
            CardinalityMode::Overkill => write!(f, "overkill"),
        }
    }
}

/// What a collection run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// In-memory ordered sequence of line-protocol records.
    #[default]
    Stream,
    /// A single text file per run at a generated path.
    File,
    /// Raw samples for diagnostics; bypasses the encoder entirely.
    PassThrough,
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stream" => Ok(OutputMode::Stream),
            "file" => Ok(OutputMode::File),
            "passthrough" => Ok(OutputMode::PassThrough),
            other => Err(format!(
                "unknown output mode '{}' (expected stream, file or passthrough)",
                other
            )),
        }
    }
}

/// Run-level configuration, constructed once per invocation and read-only
/// thereafter.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Identifier of the source server, emitted as the `vc` tag.
    pub source_server: String,
    pub cardinality: CardinalityMode,
    /// Upper bound for the randomized startup delay; 0 disables jitter.
    pub jitter_max_secs: u64,
    /// Escape sequence substituted for whitespace in display names.
    pub whitespace_escape: String,
    pub output: OutputMode,
    /// Directory for file artifacts when `output` is [`OutputMode::File`].
    pub output_dir: PathBuf,
}

impl RunContext {
    /// Creates a context with defaults for everything but the server id.
    pub fn new(source_server: impl Into<String>) -> Self {
        Self {
            source_server: source_server.into(),
            cardinality: CardinalityMode::default(),
            jitter_max_secs: 0,
            whitespace_escape: DEFAULT_WHITESPACE_ESCAPE.to_string(),
            output: OutputMode::default(),
            output_dir: std::env::temp_dir(),
        }
    }
}

/// Field value of a line-protocol record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Emitted unquoted.
    Num(f64),
    /// Emitted wrapped in double quotes.
    Text(String),
}

/// One line-protocol data point, the unit of transfer to the sink.
///
/// Derived deterministically from exactly one [`MetricSample`] plus run-level
/// context. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct LineProtocolRecord {
    pub measurement: String,
    /// Tag keys are unique and iterate in deterministic (sorted) order.
    pub tags: BTreeMap<String, String>,
    pub field: FieldValue,
    /// Capture time as nanoseconds since the Unix epoch.
    pub timestamp_ns: i64,
}

impl LineProtocolRecord {
    /// Renders the record as a single line-protocol line, without the
    /// trailing newline (appended at the wire/file boundary).
    ///
    /// Format: `measurement[,tagKey=tagVal]* value=<field> <timestampNanos>`.
    /// Tag values containing the configured whitespace escape are passed
    /// through verbatim.
    pub fn to_line(&self) -> String {
        let mut line = self.measurement.clone();
        for (key, val) in &self.tags {
            line.push(',');
            line.push_str(key);
            line.push('=');
            line.push_str(val);
        }
        match &self.field {
            FieldValue::Num(n) => {
                line.push_str(" value=");
                line.push_str(&n.to_string());
            }
            FieldValue::Text(s) => {
                line.push_str(" value=\"");
                line.push_str(s);
                line.push('"');
            }
        }
        line.push(' ');
        line.push_str(&self.timestamp_ns.to_string());
        line
    }
}
