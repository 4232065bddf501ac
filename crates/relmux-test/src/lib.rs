//! relmux Test Harness - scripted relays for multiplexer validation
//!
//! This crate provides:
//! - `RelayScript`: a per-relay behavior script (stored events, the
//!   end-of-stored signal, live events, publish verdicts, stalls)
//! - `FakeRelay`: an in-memory driver serving the channel link protocol
//! - `FakeConnector`: scripted connect outcomes with open-call counting

pub mod connector;
pub mod relay;

pub use connector::*;
pub use relay::*;
