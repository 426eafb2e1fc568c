pub mod aggregator;
pub mod config;
pub mod dispatch;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod query;
pub mod rpc;
pub mod server;
pub mod stats;
pub mod worker;
