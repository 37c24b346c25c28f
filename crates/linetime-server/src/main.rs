//! linetime server binary
//!
//! Reads one JSON request per line on stdin and writes one JSON response per
//! line on stdout. Requests run concurrently; clients that need ordering set
//! `previous_request_id`. Logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! linetime-server --database ~/.local/share/linetime/linetime.db
//! echo '{"request_id":1,"op":"create_session"}' | linetime-server
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use linetime_kernel::{KernelConfig, Request, Response, SessionManager};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "linetime-server")]
#[command(about = "Line-granular version history over JSON lines")]
struct Args {
    /// RON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database (overrides the config file)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Start new documents with version merging off
    #[arg(long)]
    no_merge: bool,

    /// Causal wait timeout in milliseconds (overrides the config file)
    #[arg(long)]
    causal_wait_ms: Option<u64>,
}

impl Args {
    fn kernel_config(&self) -> anyhow::Result<KernelConfig> {
        let mut config = match &self.config {
            Some(path) => {
                KernelConfig::load(path).with_context(|| format!("reading config {}", path.display()))?
            }
            None => KernelConfig::default(),
        };
        if let Some(database) = &self.database {
            config.database = Some(database.clone());
        }
        if self.no_merge {
            config.version_merging = false;
        }
        if let Some(ms) = self.causal_wait_ms {
            config.causal_wait_ms = ms;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Server error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.kernel_config()?;
    let manager = Arc::new(SessionManager::new(config).context("starting session manager")?);
    tracing::info!("linetime server reading requests from stdin");

    let (tx, rx) = mpsc::unbounded_channel::<Response>();
    let writer = tokio::spawn(write_responses(rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let request = match parse(&line) {
            Ok(request) => request,
            Err(response) => {
                let _ = tx.send(response);
                continue;
            }
        };
        let manager = manager.clone();
        let tx = tx.clone();
        in_flight.spawn(async move {
            let _ = tx.send(manager.handle(request).await);
        });
        // reap finished tasks as we go
        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
    drop(tx);
    writer.await.context("response writer panicked")??;

    tracing::info!("stdin closed, shutting down");
    manager.shutdown().await.context("flushing store")?;
    Ok(())
}

/// Parse one request line. A bad line still gets a response, addressed to
/// its `request_id` if one can be found.
fn parse(line: &str) -> Result<Request, Response> {
    serde_json::from_str(line).map_err(|e| {
        let request_id = serde_json::from_str::<serde_json::Value>(line)
            .ok()
            .and_then(|v| v.get("request_id").and_then(|id| id.as_u64()))
            .unwrap_or(0);
        tracing::warn!(request_id, error = %e, "malformed request");
        Response::error(request_id, format!("malformed request: {e}"))
    })
}

async fn write_responses(mut rx: mpsc::UnboundedReceiver<Response>) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_vec(&response)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        stdout.flush().await?;
    }
    Ok(())
}
