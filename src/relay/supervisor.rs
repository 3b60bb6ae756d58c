use std::sync::Arc;

use tracing::{info, warn};

use crate::relay::dispatcher::Dispatcher;
use crate::relay::poll::{run_poll_loop, PollSchedule, Poller};
use crate::relay::retry::ReconnectPolicy;
use crate::relay::stream::{run_stream_loop, StreamConnector};

/// Owns both ingestion loops and runs them side by side.
///
/// Nothing a loop hits is allowed to escape it, so `run` only returns if
/// neither loop was configured or the stream policy gave up while polling is
/// off. When both paths are on, a message seen by both is delivered twice
/// unless the dispatcher carries a dedup gate.
pub struct Supervisor {
    dispatcher: Arc<Dispatcher>,
    poll: Option<(Poller, PollSchedule)>,
    stream: Option<(Arc<dyn StreamConnector>, Box<dyn ReconnectPolicy>)>,
}

impl Supervisor {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            poll: None,
            stream: None,
        }
    }

    pub fn with_poll(mut self, poller: Poller, schedule: PollSchedule) -> Self {
        self.poll = Some((poller, schedule));
        self
    }

    pub fn with_stream(
        mut self,
        connector: Arc<dyn StreamConnector>,
        policy: Box<dyn ReconnectPolicy>,
    ) -> Self {
        self.stream = Some((connector, policy));
        self
    }

    pub async fn run(self) {
        let Supervisor {
            dispatcher,
            poll,
            stream,
        } = self;

        if poll.is_none() && stream.is_none() {
            warn!("Both poll and stream ingestion are disabled, nothing to relay");
            return;
        }

        let poll = {
            let dispatcher = dispatcher.clone();
            async move {
                if let Some((poller, schedule)) = poll {
                    info!("Starting Max poll loop (every {:?})", schedule.interval);
                    run_poll_loop(poller, dispatcher, schedule).await;
                }
            }
        };
        let stream = async move {
            if let Some((connector, policy)) = stream {
                info!("Starting Max stream loop");
                run_stream_loop(connector, dispatcher, policy).await;
            }
        };

        tokio::join!(poll, stream);
    }
}
