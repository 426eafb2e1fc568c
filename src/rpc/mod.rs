//! JSON-over-HTTP transport between vehicles, workers, clients and the server.

mod client;
pub mod remote;
pub mod server;

pub use client::{BasicClient, HttpClient};
pub use remote::{Endpoint, RemoteDispatcher, RemoteIngest, RemoteQuery};
pub use server::{QueryState, dispatch_router, ingest_router, query_router};
