//! Stepmirror replay tool
//!
//! Reads host notifications as JSON lines and reports them to the
//! configured reporting service.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use stepmirror_common::{HttpReportingClient, ReporterConfig};
use stepmirror_reporter::{HostEvent, Reporter, ReporterHandle};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "stepmirror")]
#[command(about = "Stepmirror - replay host test events into a reporting service")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "stepmirror.toml")]
    config: PathBuf,

    /// Event stream (JSON lines), `-` for stdin
    #[arg(short, long, default_value = "-")]
    events: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("stepmirror: {:#}", e);
            std::process::exit(2);
        }
    };

    // Initialize logging
    let filter = if config.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    info!("Stepmirror v{}", stepmirror_common::VERSION);
    debug!(endpoint = %config.endpoint, project = %config.project, "configuration loaded");

    let client = Arc::new(HttpReportingClient::new(&config)?);
    let handle = ReporterHandle::spawn(Reporter::new(client, &config));

    if cli.events == "-" {
        replay(&handle, BufReader::new(tokio::io::stdin())).await?;
    } else {
        let file = tokio::fs::File::open(&cli.events)
            .await
            .with_context(|| format!("opening event stream {}", cli.events))?;
        replay(&handle, BufReader::new(file)).await?;
    }

    if let Ok(launch) = handle.launch_id().await {
        debug!(%launch, "event stream drained");
    }

    match handle.finish().await {
        Ok(Some(finished)) => {
            info!(
                launch = %finished.id,
                number = ?finished.number,
                link = finished.link.as_deref().unwrap_or("-"),
                "report complete"
            );
            Ok(())
        }
        Ok(None) => {
            info!("report complete");
            Ok(())
        }
        Err(e) => fatal(e),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ReporterConfig> {
    let mut config = ReporterConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?
        .with_env()?;
    if cli.debug {
        config.debug = true;
    }
    config.validate()?;
    Ok(config)
}

/// Feed every event in `reader` to the reporter, in order
async fn replay<R>(handle: &ReporterHandle, reader: R) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: HostEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping malformed event");
                continue;
            }
        };

        match event {
            HostEvent::RunStarted => {
                if let Err(e) = handle.run_started().await {
                    fatal(e)?;
                }
            }
            event => handle.notify(event)?,
        }
    }
    Ok(())
}

/// Report a run-stopping error and exit
fn fatal(e: stepmirror_common::Error) -> anyhow::Result<()> {
    if !e.is_fatal() {
        return Err(e.into());
    }
    error!(error = %e, "reporting cannot continue");
    eprintln!("stepmirror: {}", e);
    std::process::exit(1);
}
