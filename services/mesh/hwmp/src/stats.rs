//! HWMP statistics

use mesh_wire::Element;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Control traffic counters of one interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceStats {
    /// PREQs sent
    pub tx_preq: u64,
    /// PREPs sent
    pub tx_prep: u64,
    /// PERRs sent
    pub tx_perr: u64,
    /// RANNs sent
    pub tx_rann: u64,
    /// PREQs received
    pub rx_preq: u64,
    /// PREPs received
    pub rx_prep: u64,
    /// PERRs received
    pub rx_perr: u64,
    /// RANNs received
    pub rx_rann: u64,
    /// PREQs originated by this node
    pub initiated_preq: u64,
    /// PREPs originated by this node
    pub initiated_prep: u64,
    /// PERRs originated by this node
    pub initiated_perr: u64,
    /// Control elements dropped (stale, expired TTL, unknown sender)
    pub dropped_control: u64,
}

impl InterfaceStats {
    pub(crate) fn count_tx(&mut self, element: &Element) {
        match element {
            Element::Preq(_) => self.tx_preq += 1,
            Element::Prep(_) => self.tx_prep += 1,
            Element::Perr(_) => self.tx_perr += 1,
            Element::Rann(_) => self.tx_rann += 1,
            _ => {}
        }
    }

    pub(crate) fn count_rx(&mut self, element: &Element) {
        match element {
            Element::Preq(_) => self.rx_preq += 1,
            Element::Prep(_) => self.rx_prep += 1,
            Element::Perr(_) => self.rx_perr += 1,
            Element::Rann(_) => self.rx_rann += 1,
            _ => {}
        }
    }
}

/// Engine wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwmpStats {
    /// Unicast data frames given a next hop
    pub tx_unicast: u64,
    /// Broadcast data frames given next hops
    pub tx_broadcast: u64,
    /// Payload bytes given a next hop
    pub tx_bytes: u64,
    /// Data frames dropped for an expired TTL
    pub dropped_ttl: u64,
    /// Broadcast data frames dropped as duplicates
    pub dropped_duplicate: u64,
    /// Route requests queued for discovery
    pub total_queued: u64,
    /// Data frames dropped for any reason
    pub total_dropped: u64,
    /// Per interface control counters
    pub interfaces: BTreeMap<u32, InterfaceStats>,
}

impl HwmpStats {
    pub(crate) fn interface(&mut self, interface: u32) -> &mut InterfaceStats {
        self.interfaces.entry(interface).or_default()
    }
}
