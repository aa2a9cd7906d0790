//! Next hop and lookup result definitions

use mesh_wire::MacAddress;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metric value meaning "no usable path"
pub const MAX_METRIC: u32 = u32::MAX;

/// Interface index meaning "any interface"
pub const INTERFACE_ANY: u32 = u32::MAX;

/// Forwarding decision for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NextHop {
    /// Neighbor that retransmits the frame
    pub retransmitter: MacAddress,
    /// Interface to send on
    pub interface: u32,
    /// Path metric towards the destination (zero for broadcast)
    pub metric: u32,
}

impl NextHop {
    /// Create a new next hop
    pub fn new(retransmitter: MacAddress, interface: u32, metric: u32) -> Self {
        Self {
            retransmitter,
            interface,
            metric,
        }
    }
}

/// Route table lookup result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResult {
    /// Next hop towards the destination
    pub retransmitter: MacAddress,
    /// Interface of the next hop
    pub interface: u32,
    /// Path metric
    pub metric: u32,
    /// Destination sequence number
    pub seqno: u32,
    /// Remaining lifetime (zero once expired)
    pub lifetime: Duration,
}

impl LookupResult {
    /// Forwarding decision for this route
    pub fn next_hop(&self) -> NextHop {
        NextHop::new(self.retransmitter, self.interface, self.metric)
    }

    /// True when the lifetime has run out
    pub fn is_expired(&self) -> bool {
        self.lifetime.is_zero()
    }
}

/// Neighbor that forwards traffic for a destination through this node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Precursor {
    /// Interface the precursor is reached on
    pub interface: u32,
    /// Precursor address
    pub address: MacAddress,
}

impl Precursor {
    /// Create a precursor
    pub fn new(interface: u32, address: MacAddress) -> Self {
        Self { interface, address }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_hop_creation() {
        let hop = NextHop::new(MacAddress::from_index(2), 1, 10);
        assert_eq!(hop.retransmitter, MacAddress::from_index(2));
        assert_eq!(hop.interface, 1);
        assert_eq!(hop.metric, 10);
    }

    #[test]
    fn test_lookup_result() {
        let result = LookupResult {
            retransmitter: MacAddress::from_index(2),
            interface: 1,
            metric: 10,
            seqno: 4,
            lifetime: Duration::ZERO,
        };
        assert!(result.is_expired());
        assert_eq!(result.next_hop(), NextHop::new(MacAddress::from_index(2), 1, 10));
    }

    #[test]
    fn test_precursor_ordering() {
        let mut precursors = vec![
            Precursor::new(2, MacAddress::from_index(1)),
            Precursor::new(1, MacAddress::from_index(9)),
        ];
        precursors.sort();
        assert_eq!(precursors[0].interface, 1);
    }
}
