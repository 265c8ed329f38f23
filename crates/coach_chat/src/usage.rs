//! Token usage telemetry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ChatResult;
use crate::types::Domain;

/// Summed token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One generator call, as written to the usage table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    /// Unique ID for this record
    pub id: String,
    /// Agent that made the call
    pub domain: Domain,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(domain: Domain, model: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            domain,
            model: model.into(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            timestamp: Utc::now(),
        }
    }
}

/// Destination of usage batches.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn insert_usage(&self, batch: Vec<UsageRecord>) -> ChatResult<()>;
}

/// Hand a batch to the sink without waiting for it. Failures are logged only.
pub fn spawn_usage_report(sink: Arc<dyn UsageSink>, batch: Vec<UsageRecord>) {
    if batch.is_empty() {
        return;
    }
    tokio::spawn(async move {
        let count = batch.len();
        match sink.insert_usage(batch).await {
            Ok(()) => debug!("Recorded {} usage record(s)", count),
            Err(e) => warn!("Failed to record token usage: {}", e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        batches: Mutex<Vec<Vec<UsageRecord>>>,
    }

    #[async_trait]
    impl UsageSink for CollectingSink {
        async fn insert_usage(&self, batch: Vec<UsageRecord>) -> ChatResult<()> {
            self.batches.lock().push(batch);
            Ok(())
        }
    }

    #[test]
    fn test_usage_sums() {
        let mut usage = TokenUsage::new(100, 20);
        usage.add(TokenUsage::new(50, 5));
        assert_eq!(usage, TokenUsage::new(150, 25));
        assert_eq!(usage.total(), 175);
    }

    #[tokio::test]
    async fn test_spawned_report_reaches_sink() {
        let sink = Arc::new(CollectingSink::default());
        let record = UsageRecord::new(Domain::Nutrition, "mock-model", TokenUsage::new(10, 2));
        spawn_usage_report(sink.clone(), vec![record]);

        for _ in 0..50 {
            if !sink.batches.lock().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(sink.batches.lock().len(), 1);
    }
}
