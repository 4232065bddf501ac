//! relmux Client - one logical stream/publish interface over many relays
//!
//! This crate provides:
//! - Connection supervision with a minimum-success quorum
//! - Subscriptions broadcast to every link, deduplicated by event identity,
//!   with a single aggregate end-of-stored completion signal
//! - First-success-wins publish fan-out
//! - One-shot fetch of currently stored matches
//! - The `RelayMux` aggregate handle with memoized connect and explicit close
//!
//! The transport below the `relmux_link::Link` seam is out of scope; links
//! are opaque duplex channels that stream query notices.

pub mod mux;
pub mod publish;
pub mod subscription;
pub mod supervisor;

pub use mux::*;
pub use publish::*;
pub use subscription::*;
pub use supervisor::*;
