//! relmux Core - Fundamental types for the relay multiplexer
//!
//! This crate defines the types shared across the relmux stack:
//! - Identifiers (EventId, RelayUrl)
//! - Events and filters (opaque payloads, verbatim pass-through)
//! - The error taxonomy

pub mod error;
pub mod event;
pub mod filter;
pub mod id;
pub mod url;

pub use error::*;
pub use event::*;
pub use filter::*;
pub use id::*;
pub use url::*;
