use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fleet_speeds::aggregator::Aggregator;
use fleet_speeds::config::PipelineConfig;
use fleet_speeds::dispatch::{DispatchApi, Dispatcher};
use fleet_speeds::ingest::DatagramRepository;
use fleet_speeds::model::{Datagram, NO_BATCH_ID};
use fleet_speeds::pipeline::{BatchQueue, FileSource, Step, Tailer, TailerConfig};
use fleet_speeds::query::QueryService;
use fleet_speeds::rpc::{Endpoint, RemoteDispatcher, RemoteIngest, RemoteQuery};
use fleet_speeds::server;
use fleet_speeds::worker::{StopReason, Worker, WorkerConfig};
use tokio_util::sync::CancellationToken;

fn temp_file(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("fleet_speeds_it");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

/// Bus 1 on trip 5 of line 241: stop 100 to stop 200, 5 km in ten minutes.
fn thirty_kmh_pair() -> Vec<Datagram> {
    [
        "E,2024-01-01 12:00:00,100,0,3.40,-76.50,1,241,5,,2024-01-01 12:00:00,1",
        "E,2024-01-01 12:10:00,200,5000,3.44,-76.50,1,241,5,,2024-01-01 12:10:00,1",
    ]
    .iter()
    .map(|row| Datagram::from_csv_line(row).unwrap())
    .collect()
}

// A single chunk keeps both samples of the pair together.
fn fast_worker(id: &str, max_empty_pulls: u32) -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(10),
        max_empty_pulls,
        ..WorkerConfig::new(id, 1)
    }
}

#[tokio::test]
async fn test_file_to_query_in_process() {
    let path = temp_file("in_process.csv");
    let repo = DatagramRepository::open(&path).unwrap();
    repo.save_all(&thirty_kmh_pair()).unwrap();

    let queue = Arc::new(BatchQueue::new(4));
    let aggregator = Arc::new(Aggregator::default());
    let dispatcher = Arc::new(Dispatcher::new(queue.clone(), aggregator.clone()));

    let config = TailerConfig {
        batch_size: 10,
        ..Default::default()
    };
    let mut tailer = Tailer::new(FileSource::new(&path), queue.clone(), config);
    assert_eq!(tailer.step().await.unwrap(), Step::Consumed { records: 2 });
    tailer.flush().await.unwrap();
    queue.finish_producing();

    let summary = Worker::new(dispatcher.clone(), fast_worker("w-local", 5))
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.stop_reason, StopReason::NoMoreWork);

    let query = QueryService::new(aggregator);
    let info = query.arc_info("241-100-200");
    assert_eq!(info.observation_count, 1);
    assert!((info.avg_speed - 30.0).abs() < 1e-9);

    let stats = query.global_statistics();
    assert_eq!(stats.arc_count, 1);
    assert_eq!(stats.line_count, 1);

    std::fs::remove_file(&path).unwrap();
}

#[tokio::test]
async fn test_resubmitted_result_is_not_double_counted() {
    let queue = Arc::new(BatchQueue::new(4));
    let aggregator = Arc::new(Aggregator::new(true));
    let dispatcher = Dispatcher::new(queue.clone(), aggregator.clone());

    queue.enqueue(thirty_kmh_pair()).await.unwrap();
    let batch = DispatchApi::pull_batch(&dispatcher).await.unwrap();
    let result = fleet_speeds::worker::BatchProcessor::new(1)
        .process(batch, "w1")
        .await;

    dispatcher.submit_partial_result(&result);
    dispatcher.submit_partial_result(&result);

    let key = "241-100-200".parse().unwrap();
    assert_eq!(aggregator.count(&key), 1);
    assert_eq!(aggregator.duplicates_rejected(), 1);
}

fn http_config(name: &str) -> PipelineConfig {
    PipelineConfig {
        ingest_addr: "127.0.0.1:0".to_string(),
        dispatch_addr: "127.0.0.1:0".to_string(),
        query_addr: "127.0.0.1:0".to_string(),
        data_file: temp_file(name),
        batch_size: 2,
        queue_capacity: 4,
        worker_threads: 2,
        tail_idle_ms: 10,
        tail_missing_ms: 10,
        flush_timeout_secs: 1,
        stats_interval_secs: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_empty_pull_over_http() {
    let config = http_config("http_empty.csv");
    let handle = server::start(&config).await.unwrap();

    let dispatcher = RemoteDispatcher::new(Endpoint::connect(&handle.dispatch_addr.to_string()).unwrap());
    let batch = dispatcher.pull_batch().await.unwrap();
    assert_eq!(batch.batch_id, NO_BATCH_ID);
    assert!(batch.datagrams.is_empty());
    assert!(dispatcher.has_more_work().await.unwrap());

    handle.shutdown().await.unwrap();
    let _ = std::fs::remove_file(&config.data_file);
}

#[tokio::test]
async fn test_datagrams_to_query_over_http() {
    let config = http_config("http_end_to_end.csv");
    let handle = server::start(&config).await.unwrap();

    let ingest = RemoteIngest::new(Endpoint::connect(&handle.ingest_addr.to_string()).unwrap());
    assert!(ingest.ping().await.unwrap());
    for datagram in thirty_kmh_pair() {
        assert!(ingest.submit_datagram(&datagram).await.unwrap());
    }

    let remote = RemoteDispatcher::new(Endpoint::connect(&handle.dispatch_addr.to_string()).unwrap());
    let worker_cancel = CancellationToken::new();
    let worker = tokio::spawn({
        let cancel = worker_cancel.clone();
        async move { Worker::new(remote, fast_worker("w-http", 1_000)).run(cancel).await }
    });

    let query = RemoteQuery::new(Endpoint::connect(&handle.query_addr.to_string()).unwrap());
    let mut info = query.arc_info("241-100-200").await.unwrap();
    for _ in 0..500 {
        if info.observation_count > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        info = query.arc_info("241-100-200").await.unwrap();
    }
    assert_eq!(info.observation_count, 1);
    assert!((info.avg_speed - 30.0).abs() < 1e-9);

    let slowest = query.slowest_arcs(1).await.unwrap();
    assert_eq!(slowest.len(), 1);
    assert_eq!(slowest[0].arc_key, "241-100-200");

    let lines = query.all_lines().await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].name, "Line 241");

    let fastest = query.fastest_arcs(0).await.unwrap();
    assert_eq!(fastest.len(), 1);
    assert_eq!(fastest[0].arc_key, "241-100-200");

    let line_arcs = query.arcs_for_line(241).await.unwrap();
    assert_eq!(line_arcs.len(), 1);
    assert_eq!((line_arcs[0].origin, line_arcs[0].destination), (100, 200));
    assert!(query.arcs_for_line(999).await.unwrap().is_empty());

    let line_avg = query.line_average_speed(241).await.unwrap().unwrap();
    assert!((line_avg - 30.0).abs() < 1e-9);
    assert_eq!(query.line_average_speed(999).await.unwrap(), None);

    let global = query.global_statistics().await.unwrap();
    assert_eq!(global.line_count, 1);
    assert_eq!(global.arc_count, 1);
    assert_eq!(global.total_observations, 1);
    assert_eq!(global.batches_merged, 1);
    assert!((global.global_avg_speed.unwrap() - 30.0).abs() < 1e-9);

    let stats = query.pipeline_stats().await.unwrap();
    assert_eq!(stats.datagrams_received, 2);
    assert_eq!(stats.records_ingested, 2);
    assert_eq!(stats.workers, 1);

    worker_cancel.cancel();
    let summary = worker.await.unwrap().unwrap();
    assert_eq!(summary.batches, 1);

    handle.shutdown().await.unwrap();
    let _ = std::fs::remove_file(&config.data_file);
}
