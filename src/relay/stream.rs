use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::RelayError;
use crate::platform::max::decode_frame;
use crate::relay::dispatcher::Dispatcher;
use crate::relay::observer::RelayEvent;
use crate::relay::retry::ReconnectPolicy;

/// Raw payloads from an open push connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Next text payload; `None` once the peer has closed the connection.
    async fn next_frame(&mut self) -> Option<Result<String, RelayError>>;
}

/// Opens authenticated push connections.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FrameStream>, RelayError>;
}

/// Relay every message frame of one connection until it ends.
///
/// Stream messages bypass the poll cursor. A malformed frame is reported and
/// skipped without closing the connection; a transport error ends the session.
pub async fn pump_frames(
    frames: &mut dyn FrameStream,
    dispatcher: &Dispatcher,
) -> Result<(), RelayError> {
    while let Some(frame) = frames.next_frame().await {
        let raw = frame?;
        match decode_frame(&raw) {
            Ok(Some(message)) => dispatcher.relay(&message).await,
            Ok(None) => {}
            Err(e) => dispatcher.report(e),
        }
    }
    Ok(())
}

/// Connecting → Connected → Closed → Connecting, for as long as `policy`
/// hands out a delay. With the default fixed delay that is forever.
pub async fn run_stream_loop(
    connector: Arc<dyn StreamConnector>,
    dispatcher: Arc<Dispatcher>,
    policy: Box<dyn ReconnectPolicy>,
) {
    let observer = dispatcher.observer();
    let mut attempt: u32 = 0;

    loop {
        match connector.connect().await {
            Ok(mut frames) => {
                attempt = 0;
                observer.on_event(RelayEvent::StreamConnected);

                let session = AssertUnwindSafe(pump_frames(frames.as_mut(), &dispatcher))
                    .catch_unwind()
                    .await;
                match session {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => dispatcher.report(e),
                    Err(panic) => dispatcher.report(RelayError::from_panic(panic)),
                }
                observer.on_event(RelayEvent::StreamClosed);
            }
            Err(e) => dispatcher.report(e),
        }

        attempt = attempt.saturating_add(1);
        let Some(delay) = policy.delay_for(attempt) else {
            observer.on_event(RelayEvent::ReconnectAbandoned {
                attempts: attempt - 1,
            });
            return;
        };
        observer.on_event(RelayEvent::ReconnectScheduled { attempt, delay });
        tokio::time::sleep(delay).await;
    }
}
