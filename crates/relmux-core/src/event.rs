//! Events
//!
//! An event is the unit a relay stores and streams. The multiplexer only
//! needs its identity token; the payload is carried verbatim for the caller
//! (its schema belongs to the wire protocol, not to this crate).

use serde_json::Value;

use crate::{EventId, RelayUrl};

/// One signed record, as delivered by a relay or handed to publish
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Identity token, unique per event across all relays
    pub id: EventId,
    /// Opaque signed payload, passed through unmodified
    pub payload: Value,
}

impl Event {
    pub fn new(id: EventId, payload: Value) -> Self {
        Event { id, payload }
    }
}

/// An event paired with the relay it was first seen on
#[derive(Clone, Debug, PartialEq)]
pub struct StoredEvent {
    pub event: Event,
    pub relay: RelayUrl,
}

impl StoredEvent {
    pub fn new(event: Event, relay: RelayUrl) -> Self {
        StoredEvent { event, relay }
    }
}
