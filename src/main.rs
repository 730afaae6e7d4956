//! # MailTask: Recurring Report Mailer
//!
//! Polls the task store, renders each due report once per domain value and
//! emails it with inline images.
//!
//! Usage:
//!   mailtask                              # Run until Ctrl-C (~/.mailtask/config.toml)
//!   mailtask --config /etc/mailtask.toml  # Custom config file
//!   mailtask --once                       # Run a single cycle and exit

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use mailtask_channels::SmtpMailer;
use mailtask_core::{MailTaskConfig, Sender};
use mailtask_scheduler::{
    Dispatcher, ReportRenderer, SchedulerEngine, SystemClock, TaskProcessor, open_store,
    spawn_scheduler,
};

#[derive(Parser)]
#[command(name = "mailtask", version, about = "📬 MailTask — Recurring Report Mailer")]
struct Cli {
    /// Config file (default: ~/.mailtask/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run one scheduling cycle and exit
    #[arg(long)]
    once: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json);

    let config = match &cli.config {
        Some(path) => MailTaskConfig::load_from(path),
        None => MailTaskConfig::load(),
    }
    .context("loading config")?
    .with_env_overrides();
    config.validate().context("invalid config")?;

    let store = open_store(&config.daemon).await.context("opening task store")?;
    let transport = Arc::new(SmtpMailer::new(&config.mail).context("building SMTP transport")?);
    let clock = Arc::new(SystemClock);

    let sender = Sender {
        email: config.mail.from_email.clone(),
        name: Some(config.mail.from_name.clone()).filter(|n| !n.trim().is_empty()),
    };
    let processor = TaskProcessor::new(
        ReportRenderer::new(config.daemon.styles_path()),
        Dispatcher::new(sender, config.mail.subject.clone(), transport),
        clock.clone(),
    );
    let engine = Arc::new(SchedulerEngine::new(
        store,
        processor,
        clock,
        Duration::from_secs(config.daemon.interval_secs),
    ));

    let cancel = CancellationToken::new();

    if cli.once {
        let report = engine.run_cycle(&cancel).await.context("scheduling cycle")?;
        tracing::info!(
            "✅ Single cycle: {} due, {} processed, {} failed",
            report.due,
            report.processed,
            report.failed
        );
        return Ok(());
    }

    let handle = spawn_scheduler(engine, cancel.clone());

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("🛑 Shutdown requested");
    cancel.cancel();
    handle.await.context("scheduler task")?;
    Ok(())
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "mailtask=debug,mailtask_scheduler=debug,mailtask_channels=debug"
    } else {
        "mailtask=info,mailtask_scheduler=info,mailtask_channels=info"
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
