//! CLI entry point for the fleet speed pipeline.
//!
//! One binary plays every role: the server (ingestion, dispatch and query
//! endpoints), batch workers, a vehicle replay simulator and a query client.

use anyhow::Result;
use clap::{Parser, Subcommand};
use fleet_speeds::config::PipelineConfig;
use fleet_speeds::ingest::replay;
use fleet_speeds::rpc::{Endpoint, RemoteDispatcher, RemoteIngest, RemoteQuery};
use fleet_speeds::server;
use fleet_speeds::worker::{Worker, WorkerConfig, generate_worker_id};
use serde::Serialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "fleet_speeds")]
#[command(about = "Distributed average-speed pipeline for bus telemetry", long_about = None)]
struct Cli {
    /// JSON config file; defaults apply to anything it omits
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion, dispatch and query endpoints
    Serve {
        /// Override the datagram file the tailer follows
        #[arg(long)]
        data_file: Option<PathBuf>,
    },
    /// Pull batches from a dispatcher and process them
    Work {
        /// Dispatcher address (host:port or URL)
        #[arg(short, long)]
        dispatcher: Option<String>,

        /// Worker id; generated when omitted
        #[arg(long)]
        worker_id: Option<String>,

        /// Size of the processing pool
        #[arg(short, long)]
        threads: Option<usize>,
    },
    /// Replay a datagram CSV export to the ingestion endpoint
    Replay {
        #[arg(value_name = "CSV")]
        source: PathBuf,

        /// Ingestion address (host:port or URL)
        #[arg(short, long)]
        ingest: Option<String>,

        /// Delay between datagrams in milliseconds
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },
    /// Ask the query endpoint for speeds and statistics
    Query {
        /// Query address (host:port or URL)
        #[arg(short, long)]
        address: Option<String>,

        #[command(subcommand)]
        query: QueryCommand,
    },
}

#[derive(Subcommand)]
enum QueryCommand {
    /// Average speed of one arc, e.g. 241-100-200
    Arc { key: String },
    /// Arcs of a line, fastest first
    Line { line_id: i64 },
    /// Observation-weighted average speed of a line
    LineAverage { line_id: i64 },
    /// Every line seen so far
    Lines,
    /// Slowest arcs with data
    Slowest {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: i64,
    },
    /// Fastest arcs with data
    Fastest {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: i64,
    },
    /// Global aggregate statistics
    Statistics,
    /// Server pipeline counters
    Stats,
    /// Check the endpoint is alive
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/fleet_speeds.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("fleet_speeds.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::load_or_default(cli.config.as_deref())?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    match cli.command {
        Commands::Serve { data_file } => {
            if let Some(data_file) = data_file {
                config.data_file = data_file;
            }
            let handle = server::start(&config).await?;
            cancel.cancelled().await;
            handle.shutdown().await?;
        }
        Commands::Work {
            dispatcher,
            worker_id,
            threads,
        } => {
            let address = dispatcher.unwrap_or_else(|| config.dispatch_addr.clone());
            let remote = RemoteDispatcher::new(Endpoint::connect_with_timeout(
                &address,
                config.request_timeout(),
            )?);
            let worker_config = WorkerConfig {
                poll_interval: config.poll_interval(),
                max_empty_pulls: config.max_empty_pulls,
                ..WorkerConfig::new(
                    worker_id.unwrap_or_else(generate_worker_id),
                    threads.unwrap_or(config.worker_threads),
                )
            };

            let worker = Worker::new(remote, worker_config);
            info!(dispatcher = %address, worker_id = %worker.worker_id(), "Starting worker");
            let summary = worker.run(cancel).await?;
            info!(
                worker_id = %worker.worker_id(),
                batches = summary.batches,
                datagrams = summary.datagrams,
                rate = %format!("{:.0}/s", summary.datagrams_per_sec()),
                "Worker finished"
            );
        }
        Commands::Replay {
            source,
            ingest,
            delay_ms,
        } => {
            let address = ingest.unwrap_or_else(|| config.ingest_addr.clone());
            let remote = RemoteIngest::new(Endpoint::connect_with_timeout(
                &address,
                config.request_timeout(),
            )?);
            replay(&source, &remote, Duration::from_millis(delay_ms), cancel).await?;
        }
        Commands::Query { address, query } => {
            let address = address.unwrap_or_else(|| config.query_addr.clone());
            let remote = RemoteQuery::new(Endpoint::connect_with_timeout(
                &address,
                config.request_timeout(),
            )?);
            run_query(&remote, query).await?;
        }
    }

    Ok(())
}

async fn run_query(remote: &RemoteQuery, query: QueryCommand) -> Result<()> {
    match query {
        QueryCommand::Arc { key } => print_json(&remote.arc_info(&key).await?),
        QueryCommand::Line { line_id } => print_json(&remote.arcs_for_line(line_id).await?),
        QueryCommand::LineAverage { line_id } => {
            print_json(&remote.line_average_speed(line_id).await?)
        }
        QueryCommand::Lines => print_json(&remote.all_lines().await?),
        QueryCommand::Slowest { limit } => print_json(&remote.slowest_arcs(limit).await?),
        QueryCommand::Fastest { limit } => print_json(&remote.fastest_arcs(limit).await?),
        QueryCommand::Statistics => print_json(&remote.global_statistics().await?),
        QueryCommand::Stats => print_json(&remote.pipeline_stats().await?),
        QueryCommand::Ping => print_json(&remote.ping().await?),
    }
}

/// Logs a query result as pretty-printed JSON.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancels `cancel` on SIGINT or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        res = ctrl_c => {
            if let Err(e) = res {
                error!(error = %e, "Failed to listen for SIGINT");
                return;
            }
            info!("Received SIGINT, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }

    cancel.cancel();
}
