//! Query filters
//!
//! Filters are caller-supplied match criteria (kind, author, referenced id,
//! limit, ...) broadcast verbatim to every relay. The multiplexer never
//! interprets their fields.

use serde_json::Value;

/// Opaque match criteria for one query
#[derive(Clone, Debug, PartialEq)]
pub struct Filter(Value);

impl Filter {
    pub fn new(criteria: Value) -> Self {
        Filter(criteria)
    }

    /// The raw criteria, as handed to the transport
    pub fn criteria(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for Filter {
    fn from(criteria: Value) -> Self {
        Filter(criteria)
    }
}
