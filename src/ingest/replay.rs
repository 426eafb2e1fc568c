//! Vehicle simulator: streams a recorded datagram export to the ingestion endpoint.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::model::Datagram;
use crate::model::datagram::is_header_line;
use crate::rpc::{HttpClient, RemoteIngest};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReplaySummary {
    pub sent: u64,
    pub rejected: u64,
    pub malformed: u64,
}

/// Sends every row of `path` after checking the endpoint answers `ping`.
///
/// A header on the first line is skipped. Malformed rows and rejected
/// datagrams are counted and skipped; transport errors abort the replay.
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
pub async fn replay<C: HttpClient>(
    path: impl AsRef<Path>,
    ingest: &RemoteIngest<C>,
    delay: Duration,
    cancel: CancellationToken,
) -> Result<ReplaySummary> {
    let path = path.as_ref();
    if !ingest.ping().await.context("ingest endpoint unreachable")? {
        anyhow::bail!("ingest endpoint refused ping");
    }
    info!(delay_ms = delay.as_millis() as u64, "Connected, replaying datagrams");

    let file = File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut summary = ReplaySummary::default();
    let mut first = true;

    while let Some(line) = lines.next_line().await? {
        if cancel.is_cancelled() {
            info!("Replay cancelled");
            break;
        }
        if std::mem::take(&mut first) && is_header_line(&line) {
            continue;
        }

        let datagram = match Datagram::from_csv_line(&line) {
            Ok(d) => d,
            Err(e) => {
                summary.malformed += 1;
                warn!(error = %e, "Skipping malformed row");
                continue;
            }
        };

        if ingest.submit_datagram(&datagram).await? {
            summary.sent += 1;
            if summary.sent % 100 == 0 {
                info!(sent = summary.sent, "Replay progress");
            }
        } else {
            summary.rejected += 1;
            warn!(bus_id = datagram.bus_id, "Server rejected datagram");
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    info!(
        sent = summary.sent,
        rejected = summary.rejected,
        malformed = summary.malformed,
        "Replay finished"
    );
    Ok(summary)
}
