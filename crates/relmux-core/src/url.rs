//! Relay endpoint addresses

use std::fmt;

use crate::{RelmuxError, RelmuxResult};

/// Address of one relay endpoint
///
/// Immutable once constructed; the multiplexer treats it as an opaque key
/// for the transport layer and for reporting event origins.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelayUrl(String);

impl RelayUrl {
    /// Parse an endpoint address. Only the `scheme://` shape is checked;
    /// everything past that belongs to the transport.
    pub fn parse(s: &str) -> RelmuxResult<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| RelmuxError::InvalidUrl(s.to_string()))?;
        if scheme.is_empty() || rest.is_empty() {
            return Err(RelmuxError::InvalidUrl(s.to_string()));
        }
        Ok(RelayUrl(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RelayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Relay({})", self.0)
    }
}

impl fmt::Display for RelayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
