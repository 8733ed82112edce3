//! CLI entry point for the lanscope-scan daemon.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use lanscope_core::rules::RuleSet;
use lanscope_scan::config::ScanConfig;
use lanscope_scan::monitor::Monitor;
use lanscope_scan::probe::NmapProbe;
use lanscope_scan::store::TopologyStore;

#[derive(Parser)]
#[command(name = "lanscope-scan")]
#[command(about = "Discovers and classifies devices on a local network segment")]
struct Cli {
    /// Network range to scan (CIDR, e.g. 192.168.1.0/24); overrides config.
    #[arg(short, long)]
    range: Option<String>,

    /// Run a single scan cycle and exit.
    #[arg(long)]
    once: bool,

    /// Run as daemon with scheduled cycles.
    #[arg(long)]
    daemon: bool,

    /// Path to the SQLite topology database; overrides config.
    #[arg(long)]
    db: Option<String>,

    /// Path to a recognition rule file; overrides config.
    #[arg(long)]
    rules: Option<String>,

    /// Config file prefix (default: lanscope).
    #[arg(short, long, default_value = "lanscope")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let mut scan_config = load_scan_config(&cli.config)?;
    if let Some(range) = &cli.range {
        scan_config.network_range = range.clone();
    }
    if let Some(db) = &cli.db {
        scan_config.db_path = db.clone();
    }
    if let Some(rules) = &cli.rules {
        scan_config.rules_path = Some(rules.clone());
    }
    scan_config.validate()?;

    // The rule set must validate before monitoring begins; a bad rule
    // file is fatal here.
    let rules = Arc::new(match &scan_config.rules_path {
        Some(path) => RuleSet::load(path)?,
        None => RuleSet::builtin(),
    });

    let probe = NmapProbe::new(&scan_config.nmap_path, scan_config.probe_timeout_secs);
    let version = probe.verify_installation().await?;
    tracing::info!(nmap_version = %version.trim(), "Nmap verified");

    let store = TopologyStore::open(&scan_config.db_path)?;
    tracing::info!(db = %scan_config.db_path, "Topology store opened");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let mut monitor = Monitor::new(scan_config, rules, Arc::new(probe), store, shutdown)?;

    if cli.once {
        let summary = monitor.run_cycle().await?;
        tracing::info!(
            cycle_id = %summary.cycle_id,
            hosts = summary.hosts,
            inserted = summary.reconcile.inserted,
            updated = summary.reconcile.updated,
            "Scan complete"
        );
    } else if cli.daemon {
        monitor.run().await;
    } else {
        anyhow::bail!("Specify --once (single cycle) or --daemon (scheduled monitoring)");
    }

    Ok(())
}

fn load_scan_config(file_prefix: &str) -> anyhow::Result<ScanConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("LANSCOPE")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<ScanConfig>("scan") {
        Ok(c) => Ok(c),
        Err(_) => Ok(ScanConfig::default()),
    }
}
