pub mod matrix;
pub mod max;
pub mod telegram;

use async_trait::async_trait;

use crate::error::RelayError;

/// A message relayed from Max to the downstream platforms.
///
/// Immutable once built: the relay only ever hands out shared references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: i64,
    text: String,
    sender_id: String,
    sender_name: String,
    /// Producer-assigned event time, informational only
    timestamp: Option<i64>,
}

impl Message {
    pub fn new(
        id: i64,
        text: impl Into<String>,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        timestamp: Option<i64>,
    ) -> Self {
        Self {
            id,
            text: text.into(),
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            timestamp,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn sender_name(&self) -> &str {
        &self.sender_name
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }
}

/// A downstream chat platform that accepts relayed messages.
///
/// Implementations are shared between the poll and stream loops, so `send`
/// may run concurrently and must not rely on interior mutable state.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short platform name used in logs and errors.
    fn name(&self) -> &str;

    /// Deliver one message to the configured destination.
    async fn send(&self, message: &Message) -> Result<(), RelayError>;
}
