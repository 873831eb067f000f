//! Static Topic Remapper CLI
//!
//! Moves the logical queues of a static topic onto a new set of brokers, or
//! applies a previously written mapping file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use topic_remapper_core::config::{LoggingConfig, RemapperConfig};
use topic_remapper_core::{
    BrokerClient, Orchestrator, RemapMetrics, RemapRequest, RunReport, StaticTopology,
    TargetSelector,
};

/// Exit code when the plan reached only some brokers.
const EXIT_PARTIAL: u8 = 2;

/// Remap a static topic's logical queues onto a new broker set.
#[derive(Parser)]
#[command(name = "topic-remapper")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Topic to remap.
    #[arg(short, long)]
    topic: String,

    /// Target brokers, comma separated.
    #[arg(
        short,
        long,
        value_delimiter = ',',
        conflicts_with = "clusters",
        required_unless_present_any = ["clusters", "map_file"]
    )]
    brokers: Vec<String>,

    /// Target clusters, comma separated; every broker in them becomes a target.
    #[arg(short = 'c', long, value_delimiter = ',')]
    clusters: Vec<String>,

    /// Apply this mapping file instead of planning a new one.
    #[arg(short = 'f', long, conflicts_with_all = ["brokers", "clusters"])]
    map_file: Option<PathBuf>,

    /// Let brokers replace whatever mapping epoch they hold.
    #[arg(long)]
    force_replace: bool,

    /// Path to configuration file.
    #[arg(long, default_value = "remapper.yaml")]
    config: String,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn request(&self) -> RemapRequest {
        let targets = if !self.brokers.is_empty() {
            Some(TargetSelector::Brokers(self.brokers.clone()))
        } else if !self.clusters.is_empty() {
            Some(TargetSelector::Clusters(self.clusters.clone()))
        } else {
            None
        };
        RemapRequest {
            topic: self.topic.clone(),
            targets,
            force: self.force_replace,
            map_file: self.map_file.clone(),
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let config = RemapperConfig::from_file(&args.config)
        .with_context(|| format!("loading configuration from '{}'", args.config))?;

    let log_config = match args.verbose {
        0 => config.logging.clone(),
        1 => LoggingConfig {
            level: "debug".to_string(),
            ..config.logging.clone()
        },
        _ => LoggingConfig {
            level: "trace".to_string(),
            ..config.logging.clone()
        },
    };
    setup_tracing(&log_config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        topic = %args.topic,
        artifact_dir = %config.remap.artifact_dir().display(),
        "starting static topic remapper"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let request = args.request();
    runtime.block_on(async move { run(config, request).await })
}

fn setup_tracing(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        subscriber.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

async fn run(config: RemapperConfig, request: RemapRequest) -> anyhow::Result<ExitCode> {
    let metrics = config.metrics.enabled.then(|| Arc::new(RemapMetrics::new()));

    let mut orchestrator = Orchestrator::new(
        Arc::new(StaticTopology::from_config(&config.cluster)),
        Arc::new(BrokerClient::new(&config.admin)),
        &config,
    );
    if let Some(metrics) = &metrics {
        orchestrator = orchestrator.with_metrics(Arc::clone(metrics));
    }

    let result = orchestrator.run(&request).await;

    if let (Some(metrics), Some(path)) = (&metrics, &config.metrics.textfile) {
        write_metrics(metrics, path)?;
    }

    let report = result?;
    print_report(&report);

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_PARTIAL))
    }
}

fn write_metrics(metrics: &RemapMetrics, path: &Path) -> anyhow::Result<()> {
    let body = metrics.encode()?;
    std::fs::write(path, body)
        .with_context(|| format!("writing metrics to '{}'", path.display()))?;
    info!(path = %path.display(), "wrote metrics");
    Ok(())
}

fn print_report(report: &RunReport) {
    let plan = &report.plan;
    println!("topic:    {}", report.topic);
    println!("epoch:    {} ({:?})", plan.epoch, plan.kind);
    if let Some(path) = &report.before_artifact {
        println!("before:   {}", path.display());
    }
    if let Some(path) = &report.after_artifact {
        println!("after:    {}", path.display());
    }
    if !plan.map_out.is_empty() || !plan.map_in.is_empty() {
        println!("map out:  {}", join(&plan.map_out));
        println!("map in:   {}", join(&plan.map_in));
    }
    for outcome in &report.apply.outcomes {
        match &outcome.result {
            Ok(()) => println!("  {:<24} {:<22} ok", outcome.broker, outcome.address),
            Err(e) => println!("  {:<24} {:<22} {e}", outcome.broker, outcome.address),
        }
    }
    println!("{}", report.apply.summary());
}

fn join<'a>(names: impl IntoIterator<Item = &'a String>) -> String {
    names
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",")
}
