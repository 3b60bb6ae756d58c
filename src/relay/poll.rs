use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::RelayError;
use crate::platform::Message;
use crate::relay::cursor::Cursor;
use crate::relay::dispatcher::Dispatcher;
use crate::relay::observer::RelayEvent;

/// A feed that can return its most recent page of messages.
#[async_trait]
pub trait RecentMessages: Send + Sync {
    /// Up to `limit` recent messages, in whatever order upstream returns them.
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<Message>, RelayError>;
}

/// Timing of the poll loop.
#[derive(Debug, Clone, Copy)]
pub struct PollSchedule {
    /// Sleep after a normal cycle
    pub interval: Duration,
    /// Sleep after a cycle that blew up
    pub error_backoff: Duration,
}

/// Poll-mode source adapter. Owns the cursor outright.
pub struct Poller {
    source: Arc<dyn RecentMessages>,
    cursor: Cursor,
    limit: usize,
}

/// Result of one fetch: how many came back and which of them are new.
#[derive(Debug)]
pub struct PollBatch {
    pub fetched: usize,
    pub fresh: Vec<Message>,
}

impl Poller {
    pub fn new(source: Arc<dyn RecentMessages>, limit: usize) -> Self {
        Self {
            source,
            cursor: Cursor::new(),
            limit,
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Fetch the recent page and keep what the cursor has not seen.
    ///
    /// New messages are judged against the cursor as it stood before the
    /// fetch; the cursor then steps through each one in upstream order.
    pub async fn poll_new(&mut self) -> Result<PollBatch, RelayError> {
        let page = self.source.fetch_recent(self.limit).await?;
        let fetched = page.len();

        let seen = self.cursor;
        let fresh: Vec<Message> = page.into_iter().filter(|m| seen.admits(m.id())).collect();
        for message in &fresh {
            self.cursor.advance(message.id());
        }

        Ok(PollBatch { fetched, fresh })
    }
}

/// Fetch once and relay every new message, strictly one after another.
/// An unavailable source counts as an empty page.
pub async fn poll_cycle(poller: &mut Poller, dispatcher: &Dispatcher) {
    let batch = match poller.poll_new().await {
        Ok(batch) => batch,
        Err(e) => {
            dispatcher.report(e);
            PollBatch {
                fetched: 0,
                fresh: Vec::new(),
            }
        }
    };

    for message in &batch.fresh {
        dispatcher.relay(message).await;
    }

    dispatcher.observer().on_event(RelayEvent::PollCompleted {
        fetched: batch.fetched,
        relayed: batch.fresh.len(),
        cursor: poller.cursor().last_message_id(),
    });
}

/// Poll forever. A cycle that panics is reported as `LoopFatal` and followed
/// by the longer error backoff instead of the normal interval.
pub async fn run_poll_loop(
    mut poller: Poller,
    dispatcher: Arc<Dispatcher>,
    schedule: PollSchedule,
) {
    loop {
        let outcome = AssertUnwindSafe(poll_cycle(&mut poller, &dispatcher))
            .catch_unwind()
            .await;

        let pause = match outcome {
            Ok(()) => schedule.interval,
            Err(panic) => {
                dispatcher.report(RelayError::from_panic(panic));
                schedule.error_backoff
            }
        };
        tokio::time::sleep(pause).await;
    }
}
