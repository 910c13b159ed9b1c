//! cross-send - Crosspost daemon
//!
//! Serves the signed trigger endpoint and live notification streams, and
//! runs the internal scheduler for due posts and subscription expiry.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use libcrosspost::api::{router, ApiState};
use libcrosspost::logging::{LogFormat, LoggingConfig};
use libcrosspost::scheduling::publish_due;
use libcrosspost::{Config, CrosspostError, CrosspostService};
use tokio::time::{sleep, Duration, Instant};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "cross-send")]
#[command(version)]
#[command(about = "Crosspost daemon: triggers, live events and scheduled publishing")]
#[command(long_about = "\
cross-send - Crosspost daemon

DESCRIPTION:
    cross-send hosts the HTTP surface of the publishing pipeline:

        POST /api/triggers            signed deferred jobs
        GET  /api/events/{user_id}    live notification stream (SSE)
        GET  /api/notifications/{user_id}

    It also polls for scheduled posts that are due and expires overdue
    subscriptions, so it works without an external scheduler.

USAGE:
    # Run in foreground (logs to stderr)
    cross-send

    # Bind elsewhere and poll every 10 seconds
    cross-send --bind 0.0.0.0:9000 --poll-interval 10

    # Process due posts and the expiry sweep once, then exit
    cross-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes in-flight requests)

CONFIGURATION:
    Configuration file: ~/.config/crosspost/config.toml
    Override with CROSSPOST_CONFIG or --config.

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "CROSSPOST_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides config)
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Due-post poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Log format: text, json or pretty
    #[arg(long, default_value = "text", env = "CROSSPOST_LOG_FORMAT")]
    log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run the scheduler once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    LoggingConfig::new(cli.log_format, "info".to_string(), cli.verbose).init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(cli, config).await {
        error!("cross-send failed: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> libcrosspost::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(secs) = cli.poll_interval {
        config.triggers.due_poll_interval_secs = secs;
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let service = CrosspostService::from_config(config)
        .await
        .context("failed to initialize service")?;

    if cli.once {
        run_scheduler_once(&service).await?;
        info!("cross-send: processed scheduler once, exiting");
        return Ok(());
    }

    info!("cross-send daemon starting");
    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let bind = service.config().server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!(address = %bind, "Listening");

    let app = router(ApiState::new(service.clone()));
    let server = axum::serve(listener, app).with_graceful_shutdown(wait_for(shutdown.clone()));

    let scheduler = tokio::spawn(run_scheduler_loop(service, shutdown.clone()));

    server.await.context("server error")?;
    // the server only returns on shutdown or error; stop the scheduler either way
    shutdown.store(true, Ordering::Relaxed);
    if let Err(e) = scheduler.await {
        warn!(error = %e, "Scheduler task ended abnormally");
    }

    info!("cross-send daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("signal setup failed")?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

async fn wait_for(shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        sleep(Duration::from_millis(250)).await;
    }
}

async fn run_scheduler_once(service: &CrosspostService) -> libcrosspost::Result<()> {
    let now = chrono::Utc::now().timestamp();
    let reports = publish_due(service.database(), service.orchestrator(), now).await?;
    let expired = service.sweeper().expire_overdue(now).await?;
    info!(
        published = reports.len(),
        expired = expired.len(),
        "Scheduler pass complete"
    );
    Ok(())
}

/// Poll due posts and sweep subscriptions on their own intervals
async fn run_scheduler_loop(service: CrosspostService, shutdown: Arc<AtomicBool>) {
    let triggers = &service.config().triggers;
    let poll_every = Duration::from_secs(triggers.due_poll_interval_secs.max(1));
    let sweep_every = Duration::from_secs(triggers.sweep_interval_secs.max(1));
    info!(
        poll_secs = poll_every.as_secs(),
        sweep_secs = sweep_every.as_secs(),
        "Scheduler started"
    );

    let mut next_poll = Instant::now();
    let mut next_sweep = Instant::now();
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        let timestamp = chrono::Utc::now().timestamp();

        if now >= next_poll {
            if let Err(e) = publish_due(service.database(), service.orchestrator(), timestamp).await {
                report_error("publish_due", &e);
            }
            next_poll = now + poll_every;
        }
        if now >= next_sweep {
            if let Err(e) = service.sweeper().expire_overdue(timestamp).await {
                report_error("expire_subscriptions", &e);
            }
            next_sweep = now + sweep_every;
        }

        sleep(Duration::from_secs(1)).await;
    }
}

fn report_error(job: &str, e: &CrosspostError) {
    error!(job, error = %e, "Scheduled job failed");
}
