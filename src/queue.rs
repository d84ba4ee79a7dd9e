use async_trait::async_trait;
use std::fmt;

/// The three durable work queues fed by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    TimeSeries,
    Archive,
    Alerts,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [QueueName::TimeSeries, QueueName::Archive, QueueName::Alerts];
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueueName::TimeSeries => "timeseries",
            QueueName::Archive => "archive",
            QueueName::Alerts => "alerts",
        })
    }
}

#[async_trait]
pub trait QueueSender: Send + Sync {
    /// Durably enqueues `body`. `key` groups related messages (same sensor).
    async fn send(&self, queue: QueueName, key: &str, body: &str) -> anyhow::Result<()>;
}
