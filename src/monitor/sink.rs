use crate::monitor::metrics::CallMetrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Receives finished call records, at most one per call.
///
/// `report` runs on the call's own thread inside the terminal event, so
/// implementations must hand the record off instead of doing I/O inline.
pub trait MetricsSink: Send + Sync {
    fn report(&self, metrics: CallMetrics);
}

impl<F> MetricsSink for F
where
    F: Fn(CallMetrics) + Send + Sync,
{
    fn report(&self, metrics: CallMetrics) {
        self(metrics)
    }
}

/// Sink that queues records for a background writer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<CallMetrics>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CallMetrics>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl MetricsSink for ChannelSink {
    fn report(&self, metrics: CallMetrics) {
        match self.tx.try_send(metrics) {
            Ok(()) => {}
            Err(TrySendError::Full(m)) => {
                warn!(
                    "Metrics queue is full, dropping record for {}",
                    m.url.as_deref().unwrap_or("<unknown>")
                );
            }
            Err(TrySendError::Closed(m)) => {
                debug!(
                    "Metrics queue is closed, dropping record for {}",
                    m.url.as_deref().unwrap_or("<unknown>")
                );
            }
        }
    }
}

/// One JSON line as written by the report writer.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord<'a> {
    pub reported_at: DateTime<Utc>,
    pub status_code: String,
    pub is_first_connection: bool,
    #[serde(flatten)]
    pub metrics: &'a CallMetrics,
}

impl<'a> ReportRecord<'a> {
    pub fn new(metrics: &'a CallMetrics) -> Self {
        Self {
            reported_at: Utc::now(),
            status_code: metrics.status_code(),
            is_first_connection: metrics.is_first_connection(),
            metrics,
        }
    }
}

/// Drains `rx` into `out` as JSON lines until every sender is gone.
/// Returns the number of records written.
pub async fn write_reports<W>(
    mut rx: mpsc::Receiver<CallMetrics>,
    mut out: W,
) -> Result<usize, anyhow::Error>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(metrics) = rx.recv().await {
        debug!("{}", metrics);
        let mut line = serde_json::to_vec(&ReportRecord::new(&metrics))?;
        line.push(b'\n');
        out.write_all(&line).await?;
        out.flush().await?;
        written += 1;
    }
    Ok(written)
}

/// Spawns the report writer: appends to `report_file` when given, else stderr.
pub fn spawn_report_writer(
    rx: mpsc::Receiver<CallMetrics>,
    report_file: Option<PathBuf>,
) -> JoinHandle<Result<usize, anyhow::Error>> {
    tokio::spawn(async move {
        match report_file {
            Some(path) => {
                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await
                    .map_err(|e| anyhow!("Failed to open report file {}: {}", path.display(), e))?;
                write_reports(rx, file).await
            }
            None => write_reports(rx, tokio::io::stderr()).await,
        }
    })
}
