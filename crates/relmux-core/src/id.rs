//! Event identity
//!
//! Relays report each event under a 32-byte identity token. The token is the
//! sole basis for cross-link deduplication: the multiplexer never inspects
//! payloads to decide whether two deliveries are the same event.

use std::fmt;

use crate::{RelmuxError, RelmuxResult};

/// Event identity - 32-byte token, unique per event across all relays
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventId(pub [u8; 32]);

impl EventId {
    pub const ZERO: EventId = EventId([0u8; 32]);

    #[inline]
    pub fn new(bytes: [u8; 32]) -> Self {
        EventId(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from the 64-char lowercase hex form used on the wire
    pub fn from_hex(s: &str) -> RelmuxResult<Self> {
        if s.len() != 64 {
            return Err(RelmuxError::InvalidEventId(s.to_string()));
        }

        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = hex_val(chunk[0]).ok_or_else(|| RelmuxError::InvalidEventId(s.to_string()))?;
            let lo = hex_val(chunk[1]).ok_or_else(|| RelmuxError::InvalidEventId(s.to_string()))?;
            bytes[i] = (hi << 4) | lo;
        }
        Ok(EventId(bytes))
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            s.push(hex_char(b >> 4));
            s.push(hex_char(b & 0x0F));
        }
        s
    }
}

#[inline]
fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[inline]
fn hex_char(v: u8) -> char {
    (if v < 10 { b'0' + v } else { b'a' + v - 10 }) as char
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
