//! Per interface neighbor set and control element batching

use mesh_wire::{FailedDestination, IePerr, IePreq, MacAddress};
use std::collections::BTreeMap;
use std::time::Duration;

/// Metric assumed for a link until its first measurement
pub const DEFAULT_LINK_METRIC: u32 = 1;

/// PREQ destination to fold into the pending batch
#[derive(Debug, Clone, Copy)]
pub(crate) struct DestinationRequest {
    pub destination: MacAddress,
    pub seqno: u32,
    pub do_flag: bool,
    pub rf_flag: bool,
}

/// Path errors waiting for the rate limiter, with their receivers
#[derive(Debug, Default)]
pub(crate) struct PerrBatch {
    pub elements: Vec<IePerr>,
    pub receivers: Vec<MacAddress>,
}

/// State HWMP keeps for one mesh interface
#[derive(Debug)]
pub(crate) struct HwmpInterface {
    address: MacAddress,
    /// Peers with an established link and their link metric
    neighbors: BTreeMap<MacAddress, u32>,
    pending_preqs: Vec<IePreq>,
    pending_perr: PerrBatch,
    preq_ready_at: Duration,
    perr_ready_at: Duration,
}

impl HwmpInterface {
    pub fn new(address: MacAddress) -> Self {
        Self {
            address,
            neighbors: BTreeMap::new(),
            pending_preqs: Vec::new(),
            pending_perr: PerrBatch::default(),
            preq_ready_at: Duration::ZERO,
            perr_ready_at: Duration::ZERO,
        }
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn add_neighbor(&mut self, peer: MacAddress) {
        self.neighbors.entry(peer).or_insert(DEFAULT_LINK_METRIC);
    }

    pub fn remove_neighbor(&mut self, peer: MacAddress) -> bool {
        self.neighbors.remove(&peer).is_some()
    }

    /// Update the metric of a known neighbor
    pub fn set_link_metric(&mut self, peer: MacAddress, metric: u32) -> bool {
        match self.neighbors.get_mut(&peer) {
            Some(current) => {
                *current = metric.max(1);
                true
            }
            None => false,
        }
    }

    pub fn link_metric(&self, peer: MacAddress) -> Option<u32> {
        self.neighbors.get(&peer).copied()
    }

    pub fn neighbors(&self) -> impl Iterator<Item = MacAddress> + '_ {
        self.neighbors.keys().copied()
    }

    /// Individual neighbors below `threshold`, the broadcast address from there on
    pub fn receivers(&self, threshold: usize) -> Vec<MacAddress> {
        if self.neighbors.is_empty() || self.neighbors.len() >= threshold {
            vec![MacAddress::BROADCAST]
        } else {
            self.neighbors.keys().copied().collect()
        }
    }

    /// Fold a destination into the last pending PREQ of `originator`, or start a new one
    pub fn request_destination(
        &mut self,
        originator: MacAddress,
        request: DestinationRequest,
        new_preq: impl FnOnce() -> IePreq,
    ) {
        let DestinationRequest {
            destination,
            seqno,
            do_flag,
            rf_flag,
        } = request;
        if let Some(last) = self.pending_preqs.last_mut() {
            if last.may_add_address(originator) {
                last.add_destination(do_flag, rf_flag, destination, seqno);
                return;
            }
        }
        let mut preq = new_preq();
        preq.add_destination(do_flag, rf_flag, destination, seqno);
        self.pending_preqs.push(preq);
    }

    /// Add failed destinations and receivers to the pending PERR
    pub fn request_path_error(
        &mut self,
        failed: &[FailedDestination],
        receivers: &[MacAddress],
        ttl: u8,
    ) {
        for destination in failed {
            let listed = self
                .pending_perr
                .elements
                .iter()
                .any(|perr| perr.destinations().iter().any(|d| d.destination == destination.destination));
            if listed {
                continue;
            }
            let added = self
                .pending_perr
                .elements
                .last_mut()
                .is_some_and(|perr| perr.add_destination(*destination));
            if !added {
                let mut perr = IePerr::new(ttl);
                perr.add_destination(*destination);
                self.pending_perr.elements.push(perr);
            }
        }
        for receiver in receivers {
            if !self.pending_perr.receivers.contains(receiver) {
                self.pending_perr.receivers.push(*receiver);
            }
        }
    }

    /// Pending PREQs if the rate limiter allows sending now
    pub fn take_due_preqs(&mut self, now: Duration, min_interval: Duration) -> Vec<IePreq> {
        if self.pending_preqs.is_empty() || now < self.preq_ready_at {
            return Vec::new();
        }
        self.preq_ready_at = now + min_interval;
        std::mem::take(&mut self.pending_preqs)
    }

    /// Pending PERRs if the rate limiter allows sending now
    pub fn take_due_perrs(&mut self, now: Duration, min_interval: Duration) -> Option<PerrBatch> {
        if self.pending_perr.elements.is_empty() || now < self.perr_ready_at {
            return None;
        }
        self.perr_ready_at = now + min_interval;
        Some(std::mem::take(&mut self.pending_perr))
    }

    /// Earliest time a pending batch may go out
    pub fn next_timeout(&self) -> Option<Duration> {
        let preq = (!self.pending_preqs.is_empty()).then_some(self.preq_ready_at);
        let perr = (!self.pending_perr.elements.is_empty()).then_some(self.perr_ready_at);
        preq.into_iter().chain(perr).min()
    }

    /// Drop batched elements and reset the rate limiters
    pub fn clear_pending(&mut self) {
        self.pending_preqs.clear();
        self.pending_perr = PerrBatch::default();
        self.preq_ready_at = Duration::ZERO;
        self.perr_ready_at = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_wire::MAX_PREQ_DESTINATIONS;

    fn destination(index: u32) -> DestinationRequest {
        DestinationRequest {
            destination: MacAddress::from_index(index),
            seqno: 0,
            do_flag: false,
            rf_flag: true,
        }
    }

    #[test]
    fn test_receivers_threshold() {
        let mut iface = HwmpInterface::new(MacAddress::from_index(1));
        assert_eq!(iface.receivers(2), vec![MacAddress::BROADCAST]);

        iface.add_neighbor(MacAddress::from_index(2));
        assert_eq!(iface.receivers(2), vec![MacAddress::from_index(2)]);

        iface.add_neighbor(MacAddress::from_index(3));
        assert_eq!(iface.receivers(2), vec![MacAddress::BROADCAST]);
    }

    #[test]
    fn test_link_metric_only_for_neighbors() {
        let mut iface = HwmpInterface::new(MacAddress::from_index(1));
        assert!(!iface.set_link_metric(MacAddress::from_index(2), 40));
        iface.add_neighbor(MacAddress::from_index(2));
        assert_eq!(iface.link_metric(MacAddress::from_index(2)), Some(DEFAULT_LINK_METRIC));
        assert!(iface.set_link_metric(MacAddress::from_index(2), 40));
        assert_eq!(iface.link_metric(MacAddress::from_index(2)), Some(40));
        assert!(iface.remove_neighbor(MacAddress::from_index(2)));
        assert_eq!(iface.link_metric(MacAddress::from_index(2)), None);
    }

    #[test]
    fn test_preq_batching_and_rate_limit() {
        let me = MacAddress::from_index(1);
        let mut iface = HwmpInterface::new(me);
        let interval = Duration::from_millis(100);

        iface.request_destination(me, destination(5), || IePreq::new(me, 1, 1, 100, 32));
        iface.request_destination(me, destination(6), || IePreq::new(me, 2, 2, 100, 32));
        let sent = iface.take_due_preqs(Duration::ZERO, interval);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dest_count(), 2);
        assert_eq!(sent[0].preq_id(), 1);

        iface.request_destination(me, destination(7), || IePreq::new(me, 3, 3, 100, 32));
        assert!(iface.take_due_preqs(Duration::from_millis(50), interval).is_empty());
        assert_eq!(iface.next_timeout(), Some(interval));
        assert_eq!(iface.take_due_preqs(interval, interval).len(), 1);
        assert_eq!(iface.next_timeout(), None);
    }

    #[test]
    fn test_full_preq_splits() {
        let me = MacAddress::from_index(1);
        let mut iface = HwmpInterface::new(me);
        let mut id = 0;
        for index in 0..(MAX_PREQ_DESTINATIONS as u32 + 1) {
            iface.request_destination(me, destination(100 + index), || {
                id += 1;
                IePreq::new(me, id, id, 100, 32)
            });
        }
        let sent = iface.take_due_preqs(Duration::ZERO, Duration::from_millis(100));
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].dest_count(), MAX_PREQ_DESTINATIONS);
        assert_eq!(sent[1].dest_count(), 1);
    }

    #[test]
    fn test_perr_batching_dedupes() {
        let mut iface = HwmpInterface::new(MacAddress::from_index(1));
        let failed = [FailedDestination::new(MacAddress::from_index(9), 4)];
        let receivers = [MacAddress::from_index(2)];
        iface.request_path_error(&failed, &receivers, 32);
        iface.request_path_error(&failed, &receivers, 32);

        let batch = iface
            .take_due_perrs(Duration::ZERO, Duration::from_millis(100))
            .unwrap();
        assert_eq!(batch.elements.len(), 1);
        assert_eq!(batch.elements[0].len(), 1);
        assert_eq!(batch.receivers, receivers.to_vec());

        iface.request_path_error(&failed, &receivers, 32);
        assert!(iface.take_due_perrs(Duration::from_millis(10), Duration::from_millis(100)).is_none());
        iface.clear_pending();
        assert_eq!(iface.next_timeout(), None);
    }
}
