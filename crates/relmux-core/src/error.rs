//! Error types for the relay multiplexer
//!
//! Individual link failures are absorbed at the fan-out boundaries and only
//! degrade aggregate capacity; the variants here are the caller-visible
//! aggregate outcomes.

use thiserror::Error;

/// Core relmux errors
#[derive(Error, Debug)]
pub enum RelmuxError {
    // Aggregate connect outcomes
    #[error("quorum not met: {connected} of {quorum} required relays connected")]
    QuorumNotMet { connected: usize, quorum: usize },

    #[error("not connected: call connect() first")]
    NotConnected,

    #[error("multiplexer closed")]
    Closed,

    // Aggregate publish outcomes
    #[error("no active relay links")]
    NoActiveLinks,

    #[error("no relay accepted the event")]
    PublishRejected,

    // Input validation
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),

    #[error("invalid event id: {0}")]
    InvalidEventId(String),

    // Link-level failures, absorbed by the fan-out layers
    #[error("link closed")]
    LinkClosed,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type for relmux operations
pub type RelmuxResult<T> = Result<T, RelmuxError>;
