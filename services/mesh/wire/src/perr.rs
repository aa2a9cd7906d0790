//! Path error element.

use crate::element::{need, InformationElement, MAX_INFORMATION_FIELD_SIZE};
use crate::{ElementId, MacAddress, WireError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

const PERR_FIXED_SIZE: usize = 2;
const PERR_UNIT_SIZE: usize = 11;

/// Largest number of failed destinations a single PERR can carry
pub const MAX_PERR_DESTINATIONS: usize =
    (MAX_INFORMATION_FIELD_SIZE - PERR_FIXED_SIZE) / PERR_UNIT_SIZE;

/// Destination that became unreachable, with its last known sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailedDestination {
    /// Unreachable destination
    pub destination: MacAddress,
    /// Last known sequence number of the destination
    pub seqno: u32,
}

impl FailedDestination {
    /// Create a failed destination record
    pub fn new(destination: MacAddress, seqno: u32) -> Self {
        Self { destination, seqno }
    }
}

/// Path error
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IePerr {
    ttl: u8,
    destinations: Vec<FailedDestination>,
}

impl IePerr {
    /// Empty path error with the given TTL
    pub fn new(ttl: u8) -> Self {
        Self {
            ttl,
            destinations: Vec::new(),
        }
    }

    /// Remaining time to live
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    /// Spend one hop
    pub fn decrement_ttl(&mut self) {
        self.ttl = self.ttl.saturating_sub(1);
    }

    /// Failed destinations
    pub fn destinations(&self) -> &[FailedDestination] {
        &self.destinations
    }

    /// Number of failed destinations
    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    /// True when no destination is listed
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Add a destination, refreshing the seqno of one already listed.
    ///
    /// Returns false when the element is full.
    pub fn add_destination(&mut self, failed: FailedDestination) -> bool {
        if let Some(existing) = self
            .destinations
            .iter_mut()
            .find(|d| d.destination == failed.destination)
        {
            existing.seqno = failed.seqno;
            return true;
        }
        if self.is_full() {
            return false;
        }
        self.destinations.push(failed);
        true
    }

    /// Remove a destination
    pub fn delete_destination(&mut self, destination: MacAddress) {
        self.destinations.retain(|d| d.destination != destination);
    }

    /// Drop every destination
    pub fn clear(&mut self) {
        self.destinations.clear();
    }

    /// True when one more destination would overflow the element
    pub fn is_full(&self) -> bool {
        self.information_field_size() + PERR_UNIT_SIZE > MAX_INFORMATION_FIELD_SIZE
    }
}

impl InformationElement for IePerr {
    const ELEMENT_ID: ElementId = ElementId::Perr;

    fn information_field_size(&self) -> usize {
        PERR_FIXED_SIZE + PERR_UNIT_SIZE * self.destinations.len()
    }

    fn serialize_information_field(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ttl);
        buf.put_u8(self.destinations.len() as u8);
        for failed in &self.destinations {
            buf.put_u8(0);
            failed.destination.encode(buf);
            buf.put_u32_le(failed.seqno);
        }
    }

    fn deserialize_information_field(buf: &mut Bytes, length: usize) -> Result<Self, WireError> {
        need(buf, PERR_FIXED_SIZE)?;
        let ttl = buf.get_u8();
        let count = buf.get_u8() as usize;
        if PERR_FIXED_SIZE + count * PERR_UNIT_SIZE != length {
            return Err(WireError::Length {
                element: ElementId::Perr as u8,
                declared: length,
                consumed: PERR_FIXED_SIZE + count * PERR_UNIT_SIZE,
            });
        }
        let mut destinations = Vec::with_capacity(count);
        for _ in 0..count {
            need(buf, PERR_UNIT_SIZE)?;
            if buf.get_u8() != 0 {
                return Err(WireError::Reserved);
            }
            let destination = MacAddress::decode(buf)?;
            let seqno = buf.get_u32_le();
            destinations.push(FailedDestination { destination, seqno });
        }
        Ok(Self { ttl, destinations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(i: u32) -> FailedDestination {
        FailedDestination::new(MacAddress::from_index(i), i * 10)
    }

    #[test]
    fn test_round_trip() {
        let mut perr = IePerr::new(32);
        perr.add_destination(failed(1));
        perr.add_destination(failed(2));

        let mut buf = BytesMut::new();
        perr.serialize(&mut buf);
        assert_eq!(buf.len(), 2 + 2 + 22);
        assert_eq!(IePerr::deserialize(&mut buf.freeze()).unwrap(), perr);
    }

    #[test]
    fn test_round_trip_empty() {
        let perr = IePerr::new(0);
        let mut buf = BytesMut::new();
        perr.serialize(&mut buf);
        assert_eq!(IePerr::deserialize(&mut buf.freeze()).unwrap(), perr);
    }

    #[test]
    fn test_is_full() {
        let mut perr = IePerr::new(255);
        for i in 0..MAX_PERR_DESTINATIONS as u32 {
            assert!(perr.add_destination(failed(i + 1)));
        }
        assert!(perr.is_full());
        assert!(!perr.add_destination(failed(999)));
        // Refreshing a listed destination still works on a full element.
        assert!(perr.add_destination(FailedDestination::new(MacAddress::from_index(1), 77)));
        assert_eq!(perr.destinations()[0].seqno, 77);

        let mut buf = BytesMut::new();
        perr.serialize(&mut buf);
        assert!(buf.len() <= 257);
        assert_eq!(IePerr::deserialize(&mut buf.freeze()).unwrap(), perr);
    }

    #[test]
    fn test_delete_destination() {
        let mut perr = IePerr::new(1);
        perr.add_destination(failed(1));
        perr.add_destination(failed(2));
        perr.delete_destination(MacAddress::from_index(1));
        assert_eq!(perr.destinations(), &[failed(2)]);
    }
}
