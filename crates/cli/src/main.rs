use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use kawait_api::{CheckError, CheckResult, Checker, Report};
use kawait_core::Target;
use kawait_store::{ResourceStore, StoreConfig};
use serde::Serialize;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kawait", version, about = "Check that Kubernetes objects report ready through their status conditions")]
struct Cli {
    /// Objects to check, as <type>:[<namespace>/]<name> (e.g. deployments.apps:kube-system/coredns).
    /// With none given, objects are collected from manifests under --dir.
    identifiers: Vec<String>,

    /// Directory scanned for manifests when no identifiers are given
    #[arg(long = "dir", env = "KAWAIT_DIR", default_value = ".")]
    dir: PathBuf,

    /// File name suffix of manifests to read
    #[arg(long = "suffix", env = "KAWAIT_SUFFIX", default_value = ".yaml")]
    suffix: String,

    /// Period of the full re-list behind each watch
    #[arg(long = "resync-secs", env = "KAWAIT_RESYNC_SECS", default_value_t = 60)]
    resync_secs: u64,

    /// Keep re-evaluating until ready or failed, for at most this many seconds
    #[arg(long = "timeout", env = "KAWAIT_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Human)]
    output: Output,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

/// One unit of work: either an identifier typed by the user or an object
/// read from a manifest.
enum Item {
    Identifier(String),
    Declared(Target),
}

impl Item {
    fn label(&self) -> String {
        match self {
            Item::Identifier(s) => s.clone(),
            Item::Declared(t) => t.to_string(),
        }
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    identifier: &'a str,
    ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a Report>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonError>,
}

#[derive(Serialize)]
struct JsonError {
    kind: &'static str,
    message: String,
}

fn init_tracing() {
    let env = std::env::var("KAWAIT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KAWAIT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KAWAIT_METRICS_ADDR; expected host:port");
        }
    }
}

fn collect_items(cli: &Cli) -> Result<Vec<Item>> {
    if !cli.identifiers.is_empty() {
        return Ok(cli.identifiers.iter().cloned().map(Item::Identifier).collect());
    }
    let refs = kawait_manifest::collect(&cli.dir, &cli.suffix)
        .with_context(|| format!("collecting manifests under {}", cli.dir.display()))?;
    info!(dir = %cli.dir.display(), objects = refs.len(), "collected manifest objects");
    Ok(refs.iter().map(|r| Item::Declared(r.target())).collect())
}

async fn run_item(checker: &Checker, item: &Item, timeout: Option<Duration>) -> CheckResult<Report> {
    let target = match item {
        Item::Identifier(s) => kawait_core::parse(s)?,
        Item::Declared(t) => t.clone(),
    };
    match timeout {
        Some(t) => checker.wait(&target, t).await,
        None => checker.check(&target).await,
    }
}

fn print_result(output: Output, label: &str, result: &CheckResult<Report>) -> Result<()> {
    match (output, result) {
        (Output::Human, Ok(report)) => {
            println!("{}", report);
            println!("{:?} is ready={}", label, report.ready());
        }
        (Output::Human, Err(e)) => println!("Error on {:?}: {}: {}", label, e.kind(), e),
        (Output::Json, Ok(report)) => {
            let line = JsonLine { identifier: label, ready: report.ready(), report: Some(report), error: None };
            println!("{}", serde_json::to_string(&line)?);
        }
        (Output::Json, Err(e)) => {
            let line = JsonLine {
                identifier: label,
                ready: false,
                report: None,
                error: Some(JsonError { kind: e.kind(), message: e.to_string() }),
            };
            println!("{}", serde_json::to_string(&line)?);
        }
    }
    Ok(())
}

/// Checks every item in order; true when all of them are ready.
async fn run(cli: &Cli, checker: &Checker, items: &[Item]) -> Result<bool> {
    let timeout = cli.timeout_secs.map(Duration::from_secs);
    let mut all_ready = true;
    for item in items {
        let label = item.label();
        let result = run_item(checker, item, timeout).await;
        if let Err(e) = &result {
            match e {
                CheckError::LookupFailed { .. } => warn!(identifier = %label, kind = e.kind(), error = %e, "check failed"),
                _ => error!(identifier = %label, kind = e.kind(), error = %e, "check failed"),
            }
        }
        all_ready &= matches!(&result, Ok(r) if r.ready());
        print_result(cli.output, &label, &result)?;
    }
    Ok(all_ready)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    init_metrics();

    let items = collect_items(&cli)?;
    if cli.output == Output::Human {
        let labels: Vec<String> = items.iter().map(Item::label).collect();
        println!("Awaiting {:?}", labels);
    }
    if items.is_empty() {
        warn!("nothing to check");
        return Ok(ExitCode::SUCCESS);
    }

    let client = kawait_kubehub::get_kube_client().await.context("building kube client")?;
    let catalog = kawait_kubehub::discover_catalog(client.clone())
        .await
        .context("discovery catalog unavailable")?;
    let catalog = Arc::new(catalog);
    let source = Arc::new(kawait_kubehub::KubeSource::new(client, Arc::clone(&catalog)));
    let config = StoreConfig { resync: Duration::from_secs(cli.resync_secs), ..StoreConfig::default() };
    let store = Arc::new(ResourceStore::with_config(source, config));
    let checker = Checker::new(catalog, Arc::clone(&store));

    let outcome = tokio::select! {
        res = run(&cli, &checker, &items) => res,
        _ = signal::ctrl_c() => {
            warn!("interrupted");
            Ok(false)
        }
    };
    store.shutdown().await;

    Ok(if outcome? { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
