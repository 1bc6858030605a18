//! Sample-to-record encoding.
//!
//! Pure functions: the same (sample, group, context) always yields a
//! byte-identical line-protocol record. Name resolution failures skip the
//! sample with a warning; nothing here is fatal.

use tracing::{debug, warn};

use crate::models::{
    CardinalityMode, EntityGroup, FieldValue, LineProtocolRecord, MetricSample, RunContext,
    SampleValue,
};

/// Metric identifiers reported as cumulative scheduling-contention
/// milliseconds over the sampling interval. These are the only place raw
/// source semantics are reinterpreted.
const CONTENTION_METRICS: &[&str] = &["cpu.ready.summation", "cpu.costop.summation"];

/// Replaces every whitespace character in a display name with the configured
/// escape sequence, preserving visual spacing rather than collapsing it.
pub fn escape_whitespace(name: &str, escape: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_whitespace() {
            out.push_str(escape);
        } else {
            out.push(ch);
        }
    }
    out
}

/// Builds the measurement name for any report type.
///
/// - `Standard`: bare metric identifier, lowest cardinality.
/// - `Advanced`: metric identifier + display name.
/// - `Overkill`: metric identifier + display name + instance; falls back to
///   `Advanced` behavior when no instance is present.
pub fn measurement_name(
    mode: CardinalityMode,
    metric_id: &str,
    display_name: &str,
    instance: &str,
) -> String {
    match mode {
        CardinalityMode::Standard => metric_id.to_string(),
        CardinalityMode::Advanced => format!("{}.{}", metric_id, display_name),
        CardinalityMode::Overkill => {
            if instance.is_empty() {
                format!("{}.{}", metric_id, display_name)
            } else {
                format!("{}.{}.{}", metric_id, display_name, instance)
            }
        }
    }
}

/// Converts a cumulative contention counter (milliseconds over the interval)
/// to a percentage, rounded to exactly two decimal places.
pub fn contention_percent(raw_ms: f64, interval_secs: i64) -> f64 {
    let pct = raw_ms / (interval_secs as f64 * 1000.0) * 100.0;
    (pct * 100.0).round() / 100.0
}

fn is_contention_metric(metric_id: &str) -> bool {
    CONTENTION_METRICS.contains(&metric_id)
}

/// Encodes one sample into a line-protocol record.
///
/// Returns `None` when the sample must be skipped:
/// - the entity id no longer resolves in the group catalog (vanished
///   mid-run), or
/// - a contention counter arrives without the instance its vocabulary
///   expects.
pub fn encode(
    sample: &MetricSample,
    group: &EntityGroup,
    ctx: &RunContext,
) -> Option<LineProtocolRecord> {
    let Some(display_name) = group.display_name(&sample.entity_id) else {
        warn!(
            entity = %sample.entity_id,
            metric = %sample.metric_id,
            "entity no longer present, sample skipped"
        );
        return None;
    };
    let display_name = escape_whitespace(display_name, &ctx.whitespace_escape);

    let field = match &sample.value {
        SampleValue::Num(raw) => {
            if is_contention_metric(&sample.metric_id) {
                if sample.instance.is_empty() {
                    // Contention counters are per-instance; an aggregate row
                    // carries no usable denominator context. Skip it.
                    debug!(
                        entity = %sample.entity_id,
                        metric = %sample.metric_id,
                        "contention sample without instance, skipped"
                    );
                    return None;
                }
                FieldValue::Num(contention_percent(*raw, sample.interval_secs))
            } else {
                FieldValue::Num(*raw)
            }
        }
        SampleValue::Text(s) => FieldValue::Text(s.clone()),
    };

    let measurement = measurement_name(
        ctx.cardinality,
        &sample.metric_id,
        &display_name,
        &sample.instance,
    );

    let mut record = LineProtocolRecord {
        measurement,
        tags: Default::default(),
        field,
        timestamp_ns: sample.captured_at.timestamp_nanos_opt().unwrap_or(0),
    };
    record
        .tags
        .insert("host".to_string(), display_name.clone());
    record
        .tags
        .insert("interval".to_string(), sample.interval_secs.to_string());
    record.tags.insert(
        "type".to_string(),
        group.report_type.entity_tag().to_string(),
    );
    record.tags.insert("unit".to_string(), sample.unit.clone());
    record
        .tags
        .insert("vc".to_string(), ctx.source_server.clone());
    if !sample.instance.is_empty() {
        record
            .tags
            .insert("instance".to_string(), sample.instance.clone());
    }
    if let Some(disktype) = group.storage_class.disktype_tag() {
        record
            .tags
            .insert("disktype".to_string(), disktype.to_string());
    }

    Some(record)
}
