//! Run coordination: wires admission, classification, collection and
//! encoding in sequence for one invocation.
//!
//! Collection and writing are separate invocable stages; this module owns
//! the collection half and hands records (or a file artifact, or raw
//! samples) back to the caller. No global mutable state: every stage
//! returns an owned accumulator.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info};

use crate::admission::{AdmissionController, AdmissionError};
use crate::classify::{self, ExclusionFilters};
use crate::collector;
use crate::encode;
use crate::models::{LineProtocolRecord, MetricSample, OutputMode, ReportType, RunContext};
use crate::source::{MetricsSource, SourceError};
use crate::write::{WriteDispatcher, WriteError, WriteReport};

/// Error type for a collection run.
#[derive(Debug)]
pub enum RunError {
    Admission(AdmissionError),
    /// Base entity enumeration failed. Fatal.
    Source(SourceError),
    /// The file artifact could not be written.
    Artifact(std::io::Error),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Admission(e) => write!(f, "admission: {}", e),
            RunError::Source(e) => write!(f, "{}", e),
            RunError::Artifact(e) => write!(f, "cannot write file artifact: {}", e),
        }
    }
}

impl std::error::Error for RunError {}

impl From<AdmissionError> for RunError {
    fn from(e: AdmissionError) -> Self {
        RunError::Admission(e)
    }
}

impl From<SourceError> for RunError {
    fn from(e: SourceError) -> Self {
        RunError::Source(e)
    }
}

/// What one collection run produced.
#[derive(Debug)]
pub enum CollectionOutput {
    /// The suppression gate was closed; nothing was collected.
    Suppressed,
    /// In-memory ordered records ([`OutputMode::Stream`]).
    Records(Vec<LineProtocolRecord>),
    /// Path of the file artifact ([`OutputMode::File`]).
    Artifact(PathBuf),
    /// Raw samples, encoder bypassed ([`OutputMode::PassThrough`]).
    RawSamples(Vec<MetricSample>),
}

/// Runs the collection half of the pipeline.
///
/// Order of stages: admission gate (including the jitter sleep), inventory,
/// classification, per-group collection, encoding, output. Samples are
/// encoded in the deterministic entity-sort order established by the
/// classifier.
pub fn run_collection(
    source: &dyn MetricsSource,
    ctx: &RunContext,
    report_type: ReportType,
    filters: &ExclusionFilters,
    admission: &AdmissionController,
) -> Result<CollectionOutput, RunError> {
    let decision = admission.should_run(ctx.jitter_max_secs)?;
    if !decision.proceed {
        return Ok(CollectionOutput::Suppressed);
    }
    if !decision.delay.is_zero() {
        info!(
            delay_secs = decision.delay.as_secs(),
            "startup jitter, sleeping"
        );
        thread::sleep(decision.delay);
    }

    let start = Instant::now();
    let inventory = source.inventory()?;
    debug!(
        entities = inventory.entities.len(),
        volumes = inventory.volumes.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "inventory enumerated"
    );

    let groups = classify::classify(&inventory, report_type, filters);
    info!(report = %report_type, groups = groups.len(), "classification complete");

    let mut samples: Vec<(usize, MetricSample)> = Vec::new();
    for (index, group) in groups.iter().enumerate() {
        for sample in collector::collect(source, group) {
            samples.push((index, sample));
        }
    }

    if ctx.output == OutputMode::PassThrough {
        info!(samples = samples.len(), "passthrough run complete");
        return Ok(CollectionOutput::RawSamples(
            samples.into_iter().map(|(_, s)| s).collect(),
        ));
    }

    let mut records = Vec::with_capacity(samples.len());
    for (index, sample) in &samples {
        if let Some(record) = encode::encode(sample, &groups[*index], ctx) {
            records.push(record);
        }
    }
    info!(
        samples = samples.len(),
        records = records.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "collection run complete"
    );

    match ctx.output {
        OutputMode::File => Ok(CollectionOutput::Artifact(write_artifact(ctx, &records)?)),
        _ => Ok(CollectionOutput::Records(records)),
    }
}

/// Writes records to a generated per-run path and returns it.
fn write_artifact(
    ctx: &RunContext,
    records: &[LineProtocolRecord],
) -> Result<PathBuf, RunError> {
    fs::create_dir_all(&ctx.output_dir).map_err(RunError::Artifact)?;
    let path = ctx.output_dir.join(format!(
        "vmflux-{}-{}.lp",
        ctx.source_server,
        Utc::now().format("%Y%m%d-%H%M%S")
    ));

    let mut file = fs::File::create(&path).map_err(RunError::Artifact)?;
    for record in records {
        file.write_all(record.to_line().as_bytes())
            .map_err(RunError::Artifact)?;
        file.write_all(b"\n").map_err(RunError::Artifact)?;
    }
    info!(path = %path.display(), records = records.len(), "file artifact written");
    Ok(path)
}

/// Runs the write half of the pipeline. Each dispatch call is independently
/// failable.
pub fn run_write(
    dispatcher: &WriteDispatcher,
    records: &[LineProtocolRecord],
) -> Result<WriteReport, WriteError> {
    dispatcher.write(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::admission::DEFAULT_SUPPRESSION_WINDOW;
    use crate::models::CardinalityMode;
    use crate::source::mock::MockSource;

    fn admission(dir: &tempfile::TempDir) -> AdmissionController {
        AdmissionController::new(dir.path().join("pause"), DEFAULT_SUPPRESSION_WINDOW)
    }

    fn stream_ctx() -> RunContext {
        RunContext::new("vc01")
    }

    fn records_of(output: CollectionOutput) -> Vec<LineProtocolRecord> {
        match output {
            CollectionOutput::Records(records) => records,
            other => panic!("expected records, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_run_produces_deterministic_records() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::small_lab();
        let ctx = stream_ctx();

        let first = records_of(
            run_collection(
                &source,
                &ctx,
                ReportType::Hosts,
                &ExclusionFilters::none(),
                &admission(&dir),
            )
            .unwrap(),
        );
        let second = records_of(
            run_collection(
                &source,
                &ctx,
                ReportType::Hosts,
                &ExclusionFilters::none(),
                &admission(&dir),
            )
            .unwrap(),
        );

        assert_eq!(first, second);
        // Entity-sort order: esx01 before esx02.
        let hosts: Vec<&str> = first.iter().map(|r| r.tags["host"].as_str()).collect();
        assert_eq!(hosts, vec!["esx01", "esx02"]);
        assert!(first.iter().all(|r| r.tags["type"] == "VMHost"));
    }

    #[test]
    fn test_suppressed_run_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let adm = admission(&dir);
        adm.suppress().unwrap();

        let source = MockSource::small_lab();
        let output = run_collection(
            &source,
            &stream_ctx(),
            ReportType::Vms,
            &ExclusionFilters::none(),
            &adm,
        )
        .unwrap();
        assert!(matches!(output, CollectionOutput::Suppressed));
    }

    #[test]
    fn test_enumeration_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MockSource::small_lab();
        source.fail_inventory();

        let result = run_collection(
            &source,
            &stream_ctx(),
            ReportType::Vms,
            &ExclusionFilters::none(),
            &admission(&dir),
        );
        assert!(matches!(
            result,
            Err(RunError::Source(SourceError::Enumeration(_)))
        ));
    }

    #[test]
    fn test_group_failure_shrinks_output_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MockSource::small_lab();
        // Poison the block-storage group; the NFS group must still report.
        source.fail_queries_for("vm-42");

        let records = records_of(
            run_collection(
                &source,
                &stream_ctx(),
                ReportType::Io,
                &ExclusionFilters::none(),
                &admission(&dir),
            )
            .unwrap(),
        );
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.tags["disktype"] == "NFS"));
    }

    #[test]
    fn test_file_output_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let source = MockSource::small_lab();
        let mut ctx = stream_ctx();
        ctx.output = OutputMode::File;
        ctx.output_dir = out.path().to_path_buf();

        let output = run_collection(
            &source,
            &ctx,
            ReportType::Hosts,
            &ExclusionFilters::none(),
            &admission(&dir),
        )
        .unwrap();

        let CollectionOutput::Artifact(path) = output else {
            panic!("expected artifact");
        };
        let body = fs::read_to_string(&path).unwrap();
        assert_eq!(body.lines().count(), 2);
        assert!(body.ends_with('\n'));
        assert!(body.contains("cpu.usage.average,host=esx01"));
    }

    #[test]
    fn test_passthrough_bypasses_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::small_lab();
        let mut ctx = stream_ctx();
        ctx.output = OutputMode::PassThrough;
        // Overkill cardinality must be irrelevant: raw samples carry no
        // measurement names at all.
        ctx.cardinality = CardinalityMode::Overkill;

        let output = run_collection(
            &source,
            &ctx,
            ReportType::Vms,
            &ExclusionFilters::none(),
            &admission(&dir),
        )
        .unwrap();
        let CollectionOutput::RawSamples(samples) = output else {
            panic!("expected raw samples");
        };
        assert!(!samples.is_empty());
    }

    #[test]
    fn test_jitter_delays_run_start() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::small_lab();
        let mut ctx = stream_ctx();
        ctx.jitter_max_secs = 1;

        let started = Instant::now();
        run_collection(
            &source,
            &ctx,
            ReportType::Hosts,
            &ExclusionFilters::none(),
            &admission(&dir),
        )
        .unwrap();
        // Jitter draws from [1, 1], so the run blocks for one second.
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
