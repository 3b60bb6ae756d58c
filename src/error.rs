//! Error taxonomy of the relay core.

use std::fmt::Display;

use thiserror::Error;

/// Everything that can go wrong while relaying. None of these are fatal to the
/// process: each one is recovered at the boundary that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Poll fetch failed (network, auth or an unreadable response).
    #[error("Max source unavailable: {0}")]
    SourceUnavailable(String),

    /// A single sink could not deliver a message.
    #[error("{sink} send failed: {details}")]
    Sink { sink: String, details: String },

    /// Connect or read failure on the streaming path.
    #[error("stream transport error: {0}")]
    StreamTransport(String),

    /// A stream payload that could not be turned into a message.
    #[error("malformed stream frame: {0}")]
    MalformedFrame(String),

    /// Something escaped a loop body; the loop survives it.
    #[error("loop body aborted: {0}")]
    LoopFatal(String),
}

impl RelayError {
    pub fn sink(sink: impl Into<String>, err: impl Display) -> Self {
        Self::Sink {
            sink: sink.into(),
            details: err.to_string(),
        }
    }

    /// Build a `LoopFatal` from a caught panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let details = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self::LoopFatal(details)
    }
}
