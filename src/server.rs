//! Wires the server-side components together and runs the three endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::PipelineConfig;
use crate::dispatch::Dispatcher;
use crate::ingest::{DatagramRepository, IngestReceiver};
use crate::pipeline::{BatchQueue, FileSource, Tailer};
use crate::query::QueryService;
use crate::rpc::server::{bind, serve};
use crate::rpc::{QueryState, dispatch_router, ingest_router, query_router};
use crate::stats::StatsCollector;

/// A running server. Dropping it leaves the tasks running; call [`ServerHandle::shutdown`].
pub struct ServerHandle {
    pub ingest_addr: SocketAddr,
    pub dispatch_addr: SocketAddr,
    pub query_addr: SocketAddr,
    pub aggregator: Arc<Aggregator>,
    pub dispatcher: Arc<Dispatcher>,
    pub query: QueryService,
    pub stats: StatsCollector,
    tail_cancel: CancellationToken,
    serve_cancel: CancellationToken,
    tailer: JoinHandle<Result<()>>,
    tasks: Vec<JoinHandle<Result<()>>>,
    flush_timeout: Duration,
}

/// Builds every component, binds the endpoints and spawns the tailer.
#[tracing::instrument(skip_all, fields(data_file = %config.data_file.display()))]
pub async fn start(config: &PipelineConfig) -> Result<ServerHandle> {
    config.validate()?;

    let repository = Arc::new(
        DatagramRepository::open(&config.data_file).context("opening datagram repository")?,
    );
    let receiver = Arc::new(IngestReceiver::new(repository));
    let queue = Arc::new(BatchQueue::new(config.queue_capacity));
    let aggregator = Arc::new(Aggregator::new(config.reject_duplicate_batches));
    let dispatcher = Arc::new(Dispatcher::new(queue.clone(), aggregator.clone()));
    let query = QueryService::new(aggregator.clone());

    let tailer = Tailer::new(FileSource::new(&config.data_file), queue.clone(), config.tailer());
    let stats = StatsCollector {
        receiver: receiver.clone(),
        tailer: tailer.stats(),
        queue,
        dispatcher: dispatcher.clone(),
        aggregator: aggregator.clone(),
    };

    let ingest_listener = bind(&config.ingest_addr).await?;
    let dispatch_listener = bind(&config.dispatch_addr).await?;
    let query_listener = bind(&config.query_addr).await?;
    let ingest_addr = ingest_listener.local_addr()?;
    let dispatch_addr = dispatch_listener.local_addr()?;
    let query_addr = query_listener.local_addr()?;

    let tail_cancel = CancellationToken::new();
    let serve_cancel = CancellationToken::new();

    let tailer = tokio::spawn(tailer.run(tail_cancel.clone()));
    let mut tasks = vec![
        tokio::spawn(serve(
            "ingest",
            ingest_listener,
            ingest_router(receiver),
            serve_cancel.clone(),
        )),
        tokio::spawn(serve(
            "dispatch",
            dispatch_listener,
            dispatch_router(dispatcher.clone()),
            serve_cancel.clone(),
        )),
        tokio::spawn(serve(
            "query",
            query_listener,
            query_router(QueryState {
                query: query.clone(),
                stats: Some(stats.clone()),
            }),
            serve_cancel.clone(),
        )),
    ];

    if config.stats_interval_secs > 0 {
        tasks.push(tokio::spawn(log_stats(
            stats.clone(),
            config.stats_interval(),
            serve_cancel.clone(),
        )));
    }

    info!(%ingest_addr, %dispatch_addr, %query_addr, "Server started");

    Ok(ServerHandle {
        ingest_addr,
        dispatch_addr,
        query_addr,
        aggregator,
        dispatcher,
        query,
        stats,
        tail_cancel,
        serve_cancel,
        tailer,
        tasks,
        flush_timeout: Duration::from_secs(config.flush_timeout_secs),
    })
}

async fn log_stats(
    stats: StatsCollector,
    every: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval(every);
    // first tick completes immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => stats.collect().log(),
        }
    }
}

impl ServerHandle {
    /// Stops ingestion, tells workers no more work is coming, then closes
    /// the endpoints once in-flight requests finish.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down server");
        self.tail_cancel.cancel();

        // the tailer may still be waiting on a full queue; give it the flush window plus slack
        let grace = self.flush_timeout + Duration::from_secs(1);
        match tokio::time::timeout(grace, self.tailer).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!(error = %e, "Tailer failed"),
            Ok(Err(e)) => error!(error = %e, "Tailer task panicked"),
            Err(_) => warn!("Tailer did not stop in time"),
        }

        self.dispatcher.stop();
        self.serve_cancel.cancel();

        for task in self.tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Endpoint failed"),
                Err(e) => error!(error = %e, "Endpoint task panicked"),
            }
        }

        self.stats.collect().log();
        info!("Server stopped");
        Ok(())
    }
}
