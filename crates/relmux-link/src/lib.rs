//! relmux Link Layer - the seam between the multiplexer and the transport
//!
//! This crate provides:
//! - The `Connector` and `Link` traits the multiplexer drives
//! - Per-query notice channels (`QueryNotice`, `QueryHandle`)
//! - Publish acknowledgements (`PublishAck`)
//! - A concrete channel-backed link (`ChannelLink`) any transport can serve
//!
//! Framing, message grammar and authentication live below this seam; a link
//! is an opaque duplex channel that emits discrete event, end-of-stored and
//! publish-result notifications once given a query.

pub mod channel;
pub mod link;

pub use channel::*;
pub use link::*;
