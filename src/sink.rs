use crate::errors::SinkError;
use crate::results::JobRecord;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

/// A batch that stopped part way; `records` never reached the sink
#[derive(Debug, Error)]
#[error("{} record(s) undelivered: {source}", .records.len())]
pub struct Undelivered {
    pub source: SinkError,
    pub records: Vec<JobRecord>,
}

/// Append-only destination for emitted records.
///
/// Sinks are not expected to dedup; the harvester never pushes the same
/// identity twice within a run.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn push(&self, record: JobRecord) -> Result<(), SinkError>;

    /// Push in order, stopping at the first failure
    async fn push_batch(&self, records: Vec<JobRecord>) -> Result<(), Undelivered> {
        let mut pending = records.into_iter();
        while let Some(record) = pending.next() {
            if let Err(source) = self.push(record.clone()).await {
                let mut records = vec![record];
                records.extend(pending);
                return Err(Undelivered { source, records });
            }
        }
        Ok(())
    }
}

/// Forwards records to a channel receiver
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<JobRecord>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<JobRecord>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl RecordSink for ChannelSink {
    async fn push(&self, record: JobRecord) -> Result<(), SinkError> {
        self.tx.send(record).await.map_err(|_| SinkError::Closed)
    }
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<JobRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<JobRecord> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn push(&self, record: JobRecord) -> Result<(), SinkError> {
        self.records.lock().await.push(record);
        Ok(())
    }

    async fn push_batch(&self, records: Vec<JobRecord>) -> Result<(), Undelivered> {
        self.records.lock().await.extend(records);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titled(title: &str) -> JobRecord {
        let mut record = JobRecord::empty();
        record.title = Some(title.to_string());
        record
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_batch() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ChannelSink::new(tx);
        sink.push_batch(vec![titled("A"), titled("B")]).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().title.as_deref(), Some("A"));
        assert_eq!(rx.recv().await.unwrap().title.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = ChannelSink::new(tx);
        assert!(matches!(sink.push(titled("A")).await, Err(SinkError::Closed)));
    }

    #[tokio::test]
    async fn test_batch_returns_undelivered_tail() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx);
        sink.push(titled("Queued")).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.title.as_deref(), Some("Queued"));
        drop(rx);

        let err = sink
            .push_batch(vec![titled("A"), titled("B")])
            .await
            .unwrap_err();
        assert!(matches!(err.source, SinkError::Closed));
        let titles = err
            .records
            .iter()
            .filter_map(|r| r.title.as_deref())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_memory_sink() {
        let sink = MemorySink::new();
        sink.push(titled("A")).await.unwrap();
        sink.push_batch(vec![titled("B")]).await.unwrap();
        assert_eq!(sink.len().await, 2);
    }
}
