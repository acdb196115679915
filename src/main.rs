use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use uplink_failover::config::{FileConfig, DEFAULT_CONFIG_PATH};
use uplink_failover::{
    interface_exists, lease, notify, telemetry, Backends, FailoverEngine, FailoverError, IpRoute2,
    Link, Settings,
};

/// Uplink Failover - cable/cellular default route manager
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
struct Args {
    /// Path to configuration file
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Run one full evaluation (meant for cron)
    Run,

    /// Manually move the default route to a link (cable or cell)
    Failover {
        /// Link to fail over to
        #[clap(value_parser = parse_link)]
        link: Link,
    },

    /// Assign the cell lease address and build the cell route table (boot time)
    ConfigureCell,

    /// Evaluate repeatedly until interrupted
    Watch {
        /// Seconds between evaluations
        #[clap(short = 't', long, default_value_t = 60)]
        interval: u64,
    },
}

fn parse_link(value: &str) -> Result<Link, String> {
    value.parse().map_err(|e: FailoverError| e.to_string())
}

fn log_with_timestamp(msg: &str) {
    info!("[{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), msg);
}

fn warn_if_not_root() {
    // SAFETY: geteuid has no preconditions and cannot fail
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        warn!("{}", FailoverError::InsufficientPermissions);
    }
}

fn load_settings(args: &Args) -> Result<Settings> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    log_with_timestamp(&format!("Configuration file path: {:?}", config_path));

    let file = FileConfig::load(&config_path)
        .with_context(|| format!("Failed to read config file {:?}", config_path))?;
    let settings = Settings::resolve(file).context("Invalid configuration")?;

    for link in [&settings.cable, &settings.cell] {
        if !interface_exists(&link.interface) {
            warn!("{} interface {} does not exist", link.link, link.interface);
        }
    }
    Ok(settings)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let settings = load_settings(&args)?;

    info!(
        "Cable: {} (table {}), Cell: {} (table {})",
        settings.cable.interface, settings.cable.table, settings.cell.interface, settings.cell.table
    );

    let host = IpRoute2::new(settings.probe.timeout);
    let cable_leases = lease::source_for(&settings.cable);
    let cell_leases = lease::source_for(&settings.cell);
    let notifier = notify::notifier_for(&settings.notify);
    let metrics = telemetry::store_for(&settings.metrics);

    let engine = FailoverEngine::new(
        &settings,
        Backends {
            cable_leases: cable_leases.as_ref(),
            cell_leases: cell_leases.as_ref(),
            tables: &host,
            links: &host,
            prober: &host,
            notifier: notifier.as_ref(),
            metrics: metrics.as_ref(),
        },
    );

    warn_if_not_root();

    match args.command {
        Commands::Run => {
            let report = engine.run_cycle();
            log_with_timestamp(&format!("Evaluation finished: {:?}", report.transition));
        }
        Commands::Failover { link } => {
            engine
                .manual_failover(link)
                .with_context(|| format!("Failed to fail over to {}", link))?;
            log_with_timestamp(&format!("Default route now on {}", link));
        }
        Commands::ConfigureCell => {
            engine
                .configure_cell()
                .context("Failed to configure cell interface")?;
            log_with_timestamp("Cell interface configured");
        }
        Commands::Watch { interval } => {
            let running = Arc::new(AtomicBool::new(true));
            let flag = running.clone();
            ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
                .context("Failed to install Ctrl-C handler")?;

            let interval = Duration::from_secs(interval);
            log_with_timestamp(&format!("Evaluating every {:?}", interval));
            while running.load(Ordering::SeqCst) {
                let report = engine.run_cycle();
                log_with_timestamp(&format!("Evaluation finished: {:?}", report.transition));

                // Sleep in short steps so Ctrl-C is honoured between runs
                let started = Instant::now();
                while running.load(Ordering::SeqCst) && started.elapsed() < interval {
                    thread::sleep(Duration::from_millis(250));
                }
            }
            log_with_timestamp("Interrupted, exiting");
        }
    }

    Ok(())
}
