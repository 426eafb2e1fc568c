//! Typed HTTP proxies for the three server endpoints.
//!
//! Expected conditions arrive as values (`false`, the sentinel batch,
//! `None`); only transport and protocol failures become errors.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Method, Request, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::client::{BasicClient, HttpClient};
use super::server::RegisterWorker;
use crate::dispatch::DispatchApi;
use crate::model::{Batch, Datagram, PartialResult};
use crate::query::{ArcInfo, GlobalStatistics, LineInfo};
use crate::stats::PipelineStats;

/// Base URL plus the client used to reach it.
pub struct Endpoint<C = BasicClient> {
    client: Arc<C>,
    base: Url,
}

impl<C> Clone for Endpoint<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            base: self.base.clone(),
        }
    }
}

impl Endpoint<BasicClient> {
    /// Accepts either a full URL or a bare `host:port`.
    pub fn connect(address: &str) -> Result<Self> {
        Self::with_client(Arc::new(BasicClient::new()), address)
    }

    /// Like [`Endpoint::connect`], with every request bounded by `timeout`.
    pub fn connect_with_timeout(address: &str, timeout: Duration) -> Result<Self> {
        let client = BasicClient::with_timeout(timeout).context("failed to build HTTP client")?;
        Self::with_client(Arc::new(client), address)
    }
}

impl<C: HttpClient> Endpoint<C> {
    pub fn with_client(client: Arc<C>, address: &str) -> Result<Self> {
        let raw = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let base = Url::parse(&raw).with_context(|| format!("invalid endpoint address {address:?}"))?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("endpoint {} cannot take a path", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, mut req: Request, body: Option<Vec<u8>>) -> Result<reqwest::Response> {
        if let Some(body) = body {
            req.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            *req.body_mut() = Some(body.into());
        }
        let target = format!("{} {}", req.method(), req.url());
        let resp = self
            .client
            .execute(req)
            .await
            .with_context(|| format!("{target} failed"))?;
        resp.error_for_status()
            .with_context(|| format!("{target} returned an error status"))
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self.send(Request::new(Method::GET, url), None).await?;
        Ok(resp.json().await?)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, url: Url, body: &B) -> Result<T> {
        let body = serde_json::to_vec(body)?;
        let resp = self.send(Request::new(Method::POST, url), Some(body)).await?;
        Ok(resp.json().await?)
    }

    async fn post_no_content<B: Serialize + ?Sized>(&self, url: Url, body: &B) -> Result<()> {
        let body = serde_json::to_vec(body)?;
        self.send(Request::new(Method::POST, url), Some(body)).await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<bool> {
        self.get(self.url(&["ping"])?).await
    }
}

/// Worker-side view of a remote dispatcher.
pub struct RemoteDispatcher<C = BasicClient> {
    endpoint: Endpoint<C>,
}

impl<C: HttpClient> RemoteDispatcher<C> {
    pub fn new(endpoint: Endpoint<C>) -> Self {
        Self { endpoint }
    }

    pub async fn ping(&self) -> Result<bool> {
        self.endpoint.ping().await
    }
}

#[async_trait]
impl<C: HttpClient> DispatchApi for RemoteDispatcher<C> {
    async fn pull_batch(&self) -> Result<Batch> {
        let url = self.endpoint.url(&["batches", "pull"])?;
        self.endpoint.post(url, &()).await
    }

    async fn submit_partial_result(&self, result: PartialResult) -> Result<()> {
        let url = self.endpoint.url(&["results"])?;
        self.endpoint.post_no_content(url, &result).await
    }

    async fn has_more_work(&self) -> Result<bool> {
        self.endpoint.get(self.endpoint.url(&["work", "pending"])?).await
    }

    async fn register_worker(&self, worker_id: &str) -> Result<bool> {
        let url = self.endpoint.url(&["workers"])?;
        let body = RegisterWorker {
            worker_id: worker_id.to_string(),
        };
        self.endpoint.post(url, &body).await
    }
}

/// Client for the ingestion endpoint, used by vehicle simulators.
pub struct RemoteIngest<C = BasicClient> {
    endpoint: Endpoint<C>,
}

impl<C: HttpClient> RemoteIngest<C> {
    pub fn new(endpoint: Endpoint<C>) -> Self {
        Self { endpoint }
    }

    pub async fn ping(&self) -> Result<bool> {
        self.endpoint.ping().await
    }

    pub async fn submit_datagram(&self, datagram: &Datagram) -> Result<bool> {
        let url = self.endpoint.url(&["datagrams"])?;
        self.endpoint.post(url, datagram).await
    }
}

pub struct RemoteQuery<C = BasicClient> {
    endpoint: Endpoint<C>,
}

impl<C: HttpClient> RemoteQuery<C> {
    pub fn new(endpoint: Endpoint<C>) -> Self {
        Self { endpoint }
    }

    pub async fn ping(&self) -> Result<bool> {
        self.endpoint.ping().await
    }

    pub async fn arc_info(&self, arc_key: &str) -> Result<ArcInfo> {
        self.endpoint.get(self.endpoint.url(&["arcs", arc_key])?).await
    }

    pub async fn arcs_for_line(&self, line_id: i64) -> Result<Vec<ArcInfo>> {
        let id = line_id.to_string();
        self.endpoint.get(self.endpoint.url(&["lines", &id, "arcs"])?).await
    }

    pub async fn line_average_speed(&self, line_id: i64) -> Result<Option<f64>> {
        let id = line_id.to_string();
        self.endpoint.get(self.endpoint.url(&["lines", &id, "average"])?).await
    }

    pub async fn all_lines(&self) -> Result<Vec<LineInfo>> {
        self.endpoint.get(self.endpoint.url(&["lines"])?).await
    }

    pub async fn slowest_arcs(&self, limit: i64) -> Result<Vec<ArcInfo>> {
        self.ranked("slowest", limit).await
    }

    pub async fn fastest_arcs(&self, limit: i64) -> Result<Vec<ArcInfo>> {
        self.ranked("fastest", limit).await
    }

    pub async fn global_statistics(&self) -> Result<GlobalStatistics> {
        self.endpoint.get(self.endpoint.url(&["statistics"])?).await
    }

    pub async fn pipeline_stats(&self) -> Result<PipelineStats> {
        self.endpoint.get(self.endpoint.url(&["stats"])?).await
    }

    async fn ranked(&self, order: &str, limit: i64) -> Result<Vec<ArcInfo>> {
        let mut url = self.endpoint.url(&["arcs", order])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        self.endpoint.get(url).await
    }
}
