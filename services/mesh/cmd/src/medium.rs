//! Shared radio medium.
//!
//! Encoded frames reach every node in range of the transmitter whose address
//! matches the receiver (or all of them for group addresses). Each copy may be
//! lost, or delivered with a damaged FCS that the receiver rejects on decode.

use bytes::{Bytes, BytesMut};
use mesh_wire::MacAddress;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Frame counters of the medium
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediumStats {
    /// Frames put on the air
    pub transmitted: u64,
    /// Copies handed to receivers
    pub delivered: u64,
    /// Copies lost on a link
    pub lost: u64,
    /// Copies delivered with a damaged FCS
    pub corrupted: u64,
    /// Copies the receiver failed to decode
    pub rejected: u64,
}

/// Outcome of one transmission
#[derive(Debug, Default)]
pub struct Transmit {
    /// Receiving nodes and the bytes each one got
    pub receptions: Vec<(usize, Bytes)>,
    /// Unicast frame reached its receiver intact
    pub acknowledged: bool,
}

#[derive(Debug)]
pub struct Medium {
    addresses: Vec<MacAddress>,
    links: BTreeSet<(usize, usize)>,
    loss: f64,
    corruption: f64,
    rng: StdRng,
    stats: MediumStats,
}

impl Medium {
    pub fn new(
        addresses: Vec<MacAddress>,
        links: BTreeSet<(usize, usize)>,
        loss: f64,
        corruption: f64,
        seed: u64,
    ) -> Self {
        Self {
            addresses,
            links,
            loss,
            corruption,
            rng: StdRng::seed_from_u64(seed),
            stats: MediumStats::default(),
        }
    }

    pub fn stats(&self) -> &MediumStats {
        &self.stats
    }

    pub fn in_range(&self, a: usize, b: usize) -> bool {
        self.links.contains(&(a.min(b), a.max(b)))
    }

    /// Take a link out of service; false if there was no such link
    pub fn fail_link(&mut self, a: usize, b: usize) -> bool {
        self.links.remove(&(a.min(b), a.max(b)))
    }

    /// Count a reception the receiver could not decode
    pub fn record_rejected(&mut self) {
        self.stats.rejected += 1;
    }

    /// Put `frame` on the air from node `from`
    pub fn transmit(&mut self, from: usize, receiver: MacAddress, frame: &Bytes) -> Transmit {
        self.stats.transmitted += 1;
        let mut outcome = Transmit::default();
        for to in 0..self.addresses.len() {
            if to == from || !self.in_range(from, to) {
                continue;
            }
            let addressed = receiver.is_group() || receiver == self.addresses[to];
            if !addressed {
                continue;
            }
            if self.loss > 0.0 && self.rng.gen_bool(self.loss) {
                self.stats.lost += 1;
                debug!("Frame from node {} to node {} lost", from, to);
                continue;
            }
            let intact = !(self.corruption > 0.0 && self.rng.gen_bool(self.corruption));
            let bytes = if intact {
                frame.clone()
            } else {
                self.stats.corrupted += 1;
                corrupt(frame)
            };
            if !receiver.is_group() {
                outcome.acknowledged = intact;
            }
            self.stats.delivered += 1;
            outcome.receptions.push((to, bytes));
        }
        outcome
    }
}

/// Flip the bits of the last byte, which belongs to the FCS
fn corrupt(frame: &Bytes) -> Bytes {
    let mut damaged = BytesMut::from(frame.as_ref());
    if let Some(last) = damaged.last_mut() {
        *last = !*last;
    }
    damaged.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_wire::{Frame, FrameBody};

    fn medium(loss: f64, corruption: f64) -> Medium {
        let addresses = (1..=3).map(MacAddress::from_index).collect();
        let links = [(0, 1), (1, 2)].into_iter().collect();
        Medium::new(addresses, links, loss, corruption, 7)
    }

    fn frame(receiver: MacAddress) -> Bytes {
        Frame::new(
            receiver,
            MacAddress::from_index(2),
            FrameBody::PathSelection {
                elements: Vec::new(),
            },
        )
        .encode()
        .unwrap()
    }

    #[test]
    fn test_broadcast_reaches_nodes_in_range() {
        let mut medium = medium(0.0, 0.0);
        let outcome = medium.transmit(1, MacAddress::BROADCAST, &frame(MacAddress::BROADCAST));
        let receivers: Vec<usize> = outcome.receptions.iter().map(|(to, _)| *to).collect();
        assert_eq!(receivers, vec![0, 2]);
        assert!(!outcome.acknowledged);

        let outcome = medium.transmit(0, MacAddress::BROADCAST, &frame(MacAddress::BROADCAST));
        assert_eq!(outcome.receptions.len(), 1);
        assert_eq!(medium.stats().delivered, 3);
    }

    #[test]
    fn test_unicast_only_to_receiver() {
        let mut medium = medium(0.0, 0.0);
        let target = MacAddress::from_index(3);
        let outcome = medium.transmit(1, target, &frame(target));
        assert_eq!(outcome.receptions.len(), 1);
        assert_eq!(outcome.receptions[0].0, 2);
        assert!(outcome.acknowledged);
    }

    #[test]
    fn test_loss_and_failed_links() {
        let mut lossy = medium(1.0, 0.0);
        let target = MacAddress::from_index(1);
        let outcome = lossy.transmit(1, target, &frame(target));
        assert!(outcome.receptions.is_empty());
        assert!(!outcome.acknowledged);
        assert_eq!(lossy.stats().lost, 1);

        let mut medium = medium(0.0, 0.0);
        assert!(medium.fail_link(1, 0));
        assert!(!medium.fail_link(0, 1));
        assert!(medium.transmit(1, target, &frame(target)).receptions.is_empty());
    }

    #[test]
    fn test_corrupted_frame_fails_fcs() {
        let mut medium = medium(0.0, 1.0);
        let target = MacAddress::from_index(3);
        let outcome = medium.transmit(1, target, &frame(target));
        assert!(!outcome.acknowledged);
        assert_eq!(medium.stats().corrupted, 1);
        let (_, bytes) = outcome.receptions.into_iter().next().unwrap();
        assert!(Frame::decode(bytes).is_err());
    }
}
