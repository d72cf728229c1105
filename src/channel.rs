//! Quantum channels: named (source, destination) owner pairs.
//!
//! A channel is a value type used as a lookup key for protocol app pairs and
//! depolarization bindings; it compares on the ordered owner pair.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::node::QuantumNode;
use crate::phy_entity::QuantumPhyEntity;

/// Directed owner pair identifying one quantum link.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QuantumChannel {
    src_owner: String,
    dst_owner: String,
}

impl QuantumChannel {
    #[must_use]
    pub fn new(src_owner: impl Into<String>, dst_owner: impl Into<String>) -> Self {
        Self {
            src_owner: src_owner.into(),
            dst_owner: dst_owner.into(),
        }
    }

    #[must_use]
    pub fn src_owner(&self) -> &str {
        &self.src_owner
    }

    #[must_use]
    pub fn dst_owner(&self) -> &str {
        &self.dst_owner
    }

    /// Source node, dereferenced through the entity.
    ///
    /// # Panics
    ///
    /// Panics when the owner was never registered with the entity; channels
    /// are only built over wired topologies.
    #[must_use]
    pub fn src<'a>(&self, entity: &'a QuantumPhyEntity) -> &'a QuantumNode {
        entity.node(&self.src_owner)
    }

    /// Destination node, dereferenced through the entity.
    ///
    /// # Panics
    ///
    /// Panics when the owner was never registered with the entity.
    #[must_use]
    pub fn dst<'a>(&self, entity: &'a QuantumPhyEntity) -> &'a QuantumNode {
        entity.node(&self.dst_owner)
    }

    /// Record a depolarization binding for this channel in the entity.
    pub fn set_depolar_model(&self, fidelity: f64, entity: &mut QuantumPhyEntity) {
        entity.set_depolar_model(self.src_owner.clone(), self.dst_owner.clone(), fidelity);
    }
}

impl fmt::Display for QuantumChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <--> {}", self.src_owner, self.dst_owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_order_lexicographically_on_the_pair() {
        let ab = QuantumChannel::new("Alice", "Bob");
        let ac = QuantumChannel::new("Alice", "Carol");
        let ba = QuantumChannel::new("Bob", "Alice");
        assert!(ab < ac);
        assert!(ac < ba);
        assert_eq!(ab, QuantumChannel::new("Alice", "Bob"));
    }
}
