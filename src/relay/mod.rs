//! Stream synchronization and delivery core.
//!
//! Two producers (the poll loop and the stream loop) feed one [`Dispatcher`],
//! which fans every message out to all sinks with per-sink failure isolation.

pub mod cursor;
pub mod dispatcher;
pub mod observer;
pub mod poll;
pub mod retry;
pub mod stream;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{Dispatcher, SeenIds};
pub use observer::{RelayObserver, TracingObserver};
pub use supervisor::Supervisor;
