use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::RelayError;

/// Things the relay core reports instead of writing logs itself.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// One poll cycle finished.
    PollCompleted {
        fetched: usize,
        relayed: usize,
        cursor: i64,
    },
    /// A sink accepted a message.
    Delivered { sink: String, message_id: i64 },
    /// The cross-path dedup gate dropped a message it had already seen.
    DuplicateSkipped { message_id: i64 },
    StreamConnected,
    StreamClosed,
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// The reconnect policy gave up; the stream loop has ended.
    ReconnectAbandoned { attempts: u32 },
    /// A recovered failure.
    Failed(RelayError),
}

/// Receives relay events. Shared by both loops, so it must be thread-safe.
pub trait RelayObserver: Send + Sync {
    fn on_event(&self, event: RelayEvent);
}

/// Production observer: forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RelayObserver for TracingObserver {
    fn on_event(&self, event: RelayEvent) {
        match event {
            RelayEvent::PollCompleted {
                fetched,
                relayed,
                cursor,
            } => {
                if relayed > 0 {
                    info!(
                        "Poll cycle: relayed {} of {} fetched (cursor {})",
                        relayed, fetched, cursor
                    );
                } else {
                    debug!("Poll cycle: nothing new ({} fetched)", fetched);
                }
            }
            RelayEvent::Delivered { sink, message_id } => {
                debug!("Message {} delivered to {}", message_id, sink);
            }
            RelayEvent::DuplicateSkipped { message_id } => {
                debug!("Message {} already relayed, skipping", message_id);
            }
            RelayEvent::StreamConnected => info!("Connected to Max stream"),
            RelayEvent::StreamClosed => info!("Max stream closed"),
            RelayEvent::ReconnectScheduled { attempt, delay } => {
                info!(
                    "Reconnecting to Max stream in {:?} (attempt {})",
                    delay, attempt
                );
            }
            RelayEvent::ReconnectAbandoned { attempts } => {
                error!(
                    "Giving up on Max stream after {} reconnect attempts",
                    attempts
                );
            }
            RelayEvent::Failed(err) => match err {
                RelayError::MalformedFrame(_) => warn!("{}", err),
                _ => error!("{}", err),
            },
        }
    }
}
