//! Actor addressing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Location of an actor: the node it lives on and its id there.
///
/// The link driver treats both parts as opaque. The `id` is the target
/// identity interned into a batch's name table; the `address` is only
/// carried along for sender references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorAddress {
    /// Node address, e.g. `10.0.0.4:8090`.
    pub address: String,
    /// Actor id unique within its node.
    pub id: String,
}

impl ActorAddress {
    /// Create an actor address.
    pub fn new(address: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ActorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.id)
    }
}
