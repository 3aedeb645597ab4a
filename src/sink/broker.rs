//! In-memory broker

use super::online::BrokerWriter;
use crate::engine::Options;
use crate::error::Result;
use crate::schema::EncodedRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Broker keeping every record per topic, used for local runs and tests
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    topics: DashMap<String, Vec<EncodedRecord>>,
    sends: AtomicU64,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records of a topic in send order
    pub fn records(&self, topic: &str) -> Vec<EncodedRecord> {
        self.topics
            .get(topic)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    pub fn topic_len(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|r| r.len()).unwrap_or(0)
    }

    /// Number of `send` calls received
    pub fn send_count(&self) -> u64 {
        self.sends.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BrokerWriter for InMemoryBroker {
    async fn send(&self, topic: &str, records: Vec<EncodedRecord>, options: &Options) -> Result<()> {
        self.sends.fetch_add(1, Ordering::Relaxed);
        debug!(topic, records = records.len(), options = options.len(), "Publishing records");
        self.topics
            .entry(topic.to_string())
            .or_default()
            .extend(records);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_send_appends_per_topic() {
        let broker = InMemoryBroker::new();
        let record = EncodedRecord {
            key: Bytes::from_static(b"k"),
            value: Bytes::from_static(b"v"),
        };
        broker
            .send("t1", vec![record.clone(), record.clone()], &Options::new())
            .await
            .unwrap();
        broker.send("t1", vec![record.clone()], &Options::new()).await.unwrap();
        assert_eq!(broker.topic_len("t1"), 3);
        assert_eq!(broker.topic_len("t2"), 0);
        assert_eq!(broker.send_count(), 2);
        assert_eq!(broker.records("t1")[0], record);
    }
}
