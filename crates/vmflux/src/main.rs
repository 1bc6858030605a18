//! vmflux - ships virtualization performance samples to a line-protocol
//! time-series sink.
//!
//! Collection and writing are separate subcommands so scheduled setups can
//! stage records to a file and replay them; `run` does both in one
//! invocation. `suppress`/`resume` manage the admission-control marker.

use std::error::Error;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use vmflux_core::admission::AdmissionController;
use vmflux_core::classify::ExclusionFilters;
use vmflux_core::credentials::{self, CredentialOptions};
use vmflux_core::models::{CardinalityMode, OutputMode, ReportType, RunContext};
use vmflux_core::run::{self, CollectionOutput};
use vmflux_core::source::{HttpSource, SourceTimeouts};
use vmflux_core::write::{RetryConfig, SinkConfig, WriteDispatcher, DEFAULT_SINK_PORT};

/// Performance sample shipper for virtualization environments.
#[derive(Parser)]
#[command(name = "vmflux", about = "Virtualization metrics to time-series sink", version)]
struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect samples and emit line-protocol records.
    Collect(CollectArgs),
    /// Ship pre-rendered line-protocol records to the sink.
    Write(WriteArgs),
    /// Collect and immediately ship in one invocation.
    Run(RunArgs),
    /// Create the suppression marker; runs no-op while it is fresh.
    Suppress(MarkerArgs),
    /// Remove the suppression marker.
    Resume(MarkerArgs),
}

#[derive(Args)]
struct SourceArgs {
    /// Source server identifier, emitted as the `vc` tag.
    #[arg(long, env = "VMFLUX_SERVER")]
    server: String,

    /// Base URL of the Metrics Source API.
    #[arg(long, env = "VMFLUX_SOURCE_URL")]
    source_url: String,

    /// Metrics Source user.
    #[arg(long, env = "VMFLUX_SOURCE_USER")]
    source_user: String,

    /// Metrics Source password.
    #[arg(long, env = "VMFLUX_SOURCE_PASSWORD", hide_env_values = true)]
    source_password: String,
}

#[derive(Args)]
struct MarkerArgs {
    /// Suppression marker path. Defaults to the conventional location
    /// under the OS temp directory.
    #[arg(long)]
    marker_path: Option<PathBuf>,

    /// Maximum suppression marker age in minutes; older markers are
    /// removed and runs proceed.
    #[arg(long, default_value = "20")]
    suppression_window_mins: u64,
}

impl MarkerArgs {
    fn controller(&self) -> AdmissionController {
        let path = self
            .marker_path
            .clone()
            .unwrap_or_else(AdmissionController::default_marker_path);
        AdmissionController::new(path, Duration::from_secs(self.suppression_window_mins * 60))
    }
}

#[derive(Args)]
struct CollectionOpts {
    /// Report to collect: hosts, vms or io.
    #[arg(long, default_value = "vms")]
    report: ReportType,

    /// Cardinality mode: standard, advanced or overkill.
    #[arg(long, default_value = "standard")]
    cardinality: CardinalityMode,

    /// Upper bound in seconds for the randomized startup delay; 0 disables.
    #[arg(long, default_value = "0")]
    jitter_max: u64,

    /// Volume names excluded before workload classification (repeatable).
    #[arg(long = "exclude", value_name = "NAME")]
    excludes: Vec<String>,

    /// Regex pattern for volume exclusion.
    #[arg(long, value_name = "PATTERN")]
    exclude_pattern: Option<String>,
}

impl CollectionOpts {
    fn filters(&self) -> Result<ExclusionFilters, Box<dyn Error>> {
        Ok(ExclusionFilters::new(
            self.excludes.clone(),
            self.exclude_pattern.as_deref(),
        )?)
    }
}

#[derive(Args)]
struct CollectArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[command(flatten)]
    marker: MarkerArgs,

    #[command(flatten)]
    opts: CollectionOpts,

    /// Output mode: stream (stdout), file or passthrough (raw samples as
    /// JSON lines).
    #[arg(long, default_value = "stream")]
    output: OutputMode,

    /// Directory for file artifacts. Defaults to the OS temp directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args)]
struct SinkArgs {
    /// Sink host.
    #[arg(long, env = "VMFLUX_SINK_HOST")]
    sink_host: String,

    /// Sink port.
    #[arg(long, default_value_t = DEFAULT_SINK_PORT)]
    sink_port: u16,

    /// Sink scheme: http or https.
    #[arg(long, default_value = "http")]
    sink_scheme: String,

    /// Sink database name.
    #[arg(long, default_value = "telegraf")]
    sink_db: String,

    /// Path to a JSON credential file ({"user": ..., "password": ...}).
    #[arg(long)]
    credential_file: Option<PathBuf>,

    /// Sink user (with --sink-password).
    #[arg(long)]
    sink_user: Option<String>,

    /// Sink password (with --sink-user).
    #[arg(long)]
    sink_password: Option<String>,

    /// Allow plaintext sink credentials from VMFLUX_SINK_USER /
    /// VMFLUX_SINK_PASSWORD.
    #[arg(long)]
    allow_plaintext_env: bool,

    /// Cap the sink connection pool at 2 instead of closing after every
    /// write.
    #[arg(long)]
    throttle: bool,

    /// Disable write retries (single attempt per record).
    #[arg(long)]
    no_retry: bool,
}

impl SinkArgs {
    fn dispatcher(&self) -> Result<WriteDispatcher, Box<dyn Error>> {
        let options = CredentialOptions {
            inline: None,
            file: self.credential_file.clone(),
            default_file: default_credential_path(),
            user: self.sink_user.clone(),
            password: self.sink_password.clone(),
            allow_plaintext: self.allow_plaintext_env,
        };
        let credentials = credentials::resolve_chain(&options)?;

        let sink = SinkConfig {
            scheme: self.sink_scheme.clone(),
            host: self.sink_host.clone(),
            port: self.sink_port,
            database: self.sink_db.clone(),
        };
        let retry = if self.no_retry {
            RetryConfig::no_retry()
        } else {
            RetryConfig::default()
        };
        Ok(WriteDispatcher::new(
            &sink,
            &credentials,
            retry,
            self.throttle,
        )?)
    }
}

#[derive(Args)]
struct WriteArgs {
    #[command(flatten)]
    sink: SinkArgs,

    /// File with newline-terminated line-protocol records; stdin when
    /// omitted.
    #[arg(long)]
    input: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[command(flatten)]
    marker: MarkerArgs,

    #[command(flatten)]
    opts: CollectionOpts,

    #[command(flatten)]
    sink: SinkArgs,
}

/// Default on-disk credential location, `~/.vmflux/credentials.json`.
fn default_credential_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".vmflux/credentials.json"))
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("vmflux={}", level).parse().unwrap())
        .add_directive(format!("vmflux_core={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn connect_source(args: &SourceArgs) -> Result<HttpSource, Box<dyn Error>> {
    Ok(HttpSource::connect(
        &args.source_url,
        &args.source_user,
        &args.source_password,
        SourceTimeouts::default(),
    )?)
}

fn build_context(source: &SourceArgs, opts: &CollectionOpts) -> RunContext {
    let mut ctx = RunContext::new(&source.server);
    ctx.cardinality = opts.cardinality;
    ctx.jitter_max_secs = opts.jitter_max;
    ctx
}

fn cmd_collect(args: &CollectArgs) -> Result<(), Box<dyn Error>> {
    let filters = args.opts.filters()?;
    let mut ctx = build_context(&args.source, &args.opts);
    ctx.output = args.output;
    if let Some(dir) = &args.output_dir {
        ctx.output_dir = dir.clone();
    }

    let source = connect_source(&args.source)?;
    let output = run::run_collection(
        &source,
        &ctx,
        args.opts.report,
        &filters,
        &args.marker.controller(),
    )?;

    match output {
        CollectionOutput::Suppressed => {
            warn!("collection currently suppressed, exiting without side effects");
        }
        CollectionOutput::Records(records) => {
            for record in &records {
                println!("{}", record.to_line());
            }
        }
        CollectionOutput::Artifact(path) => {
            println!("{}", path.display());
        }
        CollectionOutput::RawSamples(samples) => {
            for sample in &samples {
                println!("{}", serde_json::to_string(sample)?);
            }
        }
    }
    Ok(())
}

fn cmd_write(args: &WriteArgs) -> Result<(), Box<dyn Error>> {
    let lines: Vec<String> = match &args.input {
        Some(path) => BufReader::new(std::fs::File::open(path)?)
            .lines()
            .collect::<Result<_, _>>()?,
        None => std::io::stdin()
            .lock()
            .lines()
            .collect::<Result<_, _>>()?,
    };

    let dispatcher = args.sink.dispatcher()?;
    let report = dispatcher.write_lines(&lines)?;
    info!(written = report.written, "write complete");
    Ok(())
}

fn cmd_run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let filters = args.opts.filters()?;
    let ctx = build_context(&args.source, &args.opts);

    let source = connect_source(&args.source)?;
    let output = run::run_collection(
        &source,
        &ctx,
        args.opts.report,
        &filters,
        &args.marker.controller(),
    )?;

    let records = match output {
        CollectionOutput::Suppressed => {
            warn!("collection currently suppressed, exiting without side effects");
            return Ok(());
        }
        CollectionOutput::Records(records) => records,
        // `run` always collects in stream mode.
        other => unreachable!("unexpected collection output: {:?}", other),
    };

    if records.is_empty() {
        warn!("no records collected, nothing to write");
        return Ok(());
    }

    let dispatcher = args.sink.dispatcher()?;
    let report = run::run_write(&dispatcher, &records)?;
    info!(written = report.written, "run complete");
    Ok(())
}

fn real_main(cli: &Cli) -> Result<(), Box<dyn Error>> {
    match &cli.command {
        Command::Collect(args) => cmd_collect(args),
        Command::Write(args) => cmd_write(args),
        Command::Run(args) => cmd_run(args),
        Command::Suppress(args) => Ok(args.controller().suppress()?),
        Command::Resume(args) => Ok(args.controller().resume()?),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    info!(
        "vmflux {} ({}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_SHA")
    );

    if let Err(e) = real_main(&cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}
