//! In-memory fakes for relay tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::RelayError;
use crate::platform::{Message, Sink};
use crate::relay::observer::{RelayEvent, RelayObserver};
use crate::relay::poll::RecentMessages;
use crate::relay::stream::{FrameStream, StreamConnector};

pub fn msg(id: i64, text: &str) -> Message {
    Message::new(id, text, "9", "A", Some(1000))
}

pub fn dyn_sink(sink: &Arc<RecordingSink>) -> Arc<dyn Sink> {
    sink.clone()
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub struct RecordingSink {
    name: String,
    fail: bool,
    panic_on: Option<i64>,
    attempts: AtomicUsize,
    received: Mutex<Vec<Message>>,
}

impl RecordingSink {
    fn build(name: &str, fail: bool, panic_on: Option<i64>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail,
            panic_on,
            attempts: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn new(name: &str) -> Arc<Self> {
        Self::build(name, false, None)
    }

    /// Every send fails.
    pub fn failing(name: &str) -> Arc<Self> {
        Self::build(name, true, None)
    }

    /// Panics on the first attempt to send `id`, accepts everything else.
    pub fn panicking_on(name: &str, id: i64) -> Arc<Self> {
        Self::build(name, false, Some(id))
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.received().iter().map(Message::id).collect()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message) -> Result<(), RelayError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.panic_on == Some(message.id()) && attempt == 0 {
            panic!("sink exploded on message {}", message.id());
        }
        if self.fail {
            return Err(RelayError::sink(&self.name, "unreachable"));
        }
        self.received.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<RelayEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RelayEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<RelayError> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RelayEvent::Failed(err) => Some(err),
                _ => None,
            })
            .collect()
    }

    pub fn delivered(&self) -> Vec<(String, i64)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RelayEvent::Delivered { sink, message_id } => Some((sink, message_id)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&RelayEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl RelayObserver for RecordingObserver {
    fn on_event(&self, event: RelayEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Hands out scripted pages, then empty pages forever.
pub struct ScriptedSource {
    pages: Mutex<VecDeque<Result<Vec<Message>, RelayError>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(pages: Vec<Result<Vec<Message>, RelayError>>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn ids(pages: &[&[i64]]) -> Arc<Self> {
        Self::new(
            pages
                .iter()
                .map(|page| Ok(page.iter().map(|id| msg(*id, "m")).collect()))
                .collect(),
        )
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecentMessages for ScriptedSource {
    async fn fetch_recent(&self, _limit: usize) -> Result<Vec<Message>, RelayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// One scripted connection attempt.
pub enum Session {
    /// Connect fails outright.
    Refused,
    /// Connect succeeds; these frames arrive, then the socket closes.
    Frames(Vec<Result<String, RelayError>>),
}

/// Replays scripted sessions; once exhausted every attempt is refused.
#[derive(Default)]
pub struct ScriptedConnector {
    sessions: Mutex<VecDeque<Session>>,
    attempts: Mutex<Vec<Instant>>,
}

impl ScriptedConnector {
    pub fn new(sessions: Vec<Session>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(sessions.into()),
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamConnector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn FrameStream>, RelayError> {
        self.attempts.lock().unwrap().push(Instant::now());
        let next = self.sessions.lock().unwrap().pop_front();
        match next {
            Some(Session::Frames(frames)) => Ok(Box::new(ScriptedFrames {
                frames: frames.into(),
            })),
            Some(Session::Refused) | None => Err(RelayError::StreamTransport(
                "connection refused".to_string(),
            )),
        }
    }
}

pub struct ScriptedFrames {
    frames: VecDeque<Result<String, RelayError>>,
}

impl ScriptedFrames {
    pub fn new(frames: Vec<Result<String, RelayError>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

#[async_trait]
impl FrameStream for ScriptedFrames {
    async fn next_frame(&mut self) -> Option<Result<String, RelayError>> {
        self.frames.pop_front()
    }
}
