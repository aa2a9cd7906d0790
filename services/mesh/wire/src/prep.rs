//! Path reply element.

use crate::element::{need, InformationElement};
use crate::{ElementId, MacAddress, WireError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const PREP_SIZE: usize = 31;

/// Path reply.
///
/// The originator is the node answering (the requested destination or an
/// intermediate node answering on its behalf); the destination is the node
/// that issued the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IePrep {
    flags: u8,
    hop_count: u8,
    ttl: u8,
    destination: MacAddress,
    destination_seqno: u32,
    lifetime: u32,
    metric: u32,
    originator: MacAddress,
    originator_seqno: u32,
}

impl IePrep {
    /// Build a reply. `metric` is the cost already known to the answering node
    /// (zero when the destination itself answers); `lifetime` is in time units.
    pub fn new(
        originator: MacAddress,
        originator_seqno: u32,
        destination: MacAddress,
        destination_seqno: u32,
        metric: u32,
        lifetime: u32,
        ttl: u8,
    ) -> Self {
        Self {
            flags: 0,
            hop_count: 0,
            ttl,
            destination,
            destination_seqno,
            lifetime,
            metric,
            originator,
            originator_seqno,
        }
    }

    /// Element flags
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Hops travelled so far
    pub fn hop_count(&self) -> u8 {
        self.hop_count
    }

    /// Remaining time to live
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    /// Node that issued the request
    pub fn destination(&self) -> MacAddress {
        self.destination
    }

    /// Sequence number of the requesting node
    pub fn destination_seqno(&self) -> u32 {
        self.destination_seqno
    }

    /// Path lifetime in time units
    pub fn lifetime(&self) -> u32 {
        self.lifetime
    }

    /// Accumulated metric
    pub fn metric(&self) -> u32 {
        self.metric
    }

    /// Answering node
    pub fn originator(&self) -> MacAddress {
        self.originator
    }

    /// Sequence number of the answering node
    pub fn originator_seqno(&self) -> u32 {
        self.originator_seqno
    }

    /// Spend one hop: TTL down, hop count up
    pub fn decrement_ttl(&mut self) {
        self.ttl = self.ttl.saturating_sub(1);
        self.hop_count = self.hop_count.saturating_add(1);
    }

    /// Add the cost of the link the reply just crossed
    pub fn increment_metric(&mut self, metric: u32) {
        self.metric = self.metric.saturating_add(metric);
    }
}

impl InformationElement for IePrep {
    const ELEMENT_ID: ElementId = ElementId::Prep;

    fn information_field_size(&self) -> usize {
        PREP_SIZE
    }

    fn serialize_information_field(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags);
        buf.put_u8(self.hop_count);
        buf.put_u8(self.ttl);
        self.destination.encode(buf);
        buf.put_u32_le(self.destination_seqno);
        buf.put_u32_le(self.lifetime);
        buf.put_u32_le(self.metric);
        self.originator.encode(buf);
        buf.put_u32_le(self.originator_seqno);
    }

    fn deserialize_information_field(buf: &mut Bytes, _length: usize) -> Result<Self, WireError> {
        need(buf, PREP_SIZE)?;
        let flags = buf.get_u8();
        let hop_count = buf.get_u8();
        let ttl = buf.get_u8();
        let destination = MacAddress::decode(buf)?;
        let destination_seqno = buf.get_u32_le();
        let lifetime = buf.get_u32_le();
        let metric = buf.get_u32_le();
        let originator = MacAddress::decode(buf)?;
        let originator_seqno = buf.get_u32_le();
        Ok(Self {
            flags,
            hop_count,
            ttl,
            destination,
            destination_seqno,
            lifetime,
            metric,
            originator,
            originator_seqno,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut prep = IePrep::new(
            MacAddress::from_index(3),
            1,
            MacAddress::from_index(1),
            9,
            0,
            5000,
            32,
        );
        prep.decrement_ttl();
        prep.increment_metric(77);

        let mut buf = BytesMut::new();
        prep.serialize(&mut buf);
        assert_eq!(buf.len(), 2 + 31);
        assert_eq!(IePrep::deserialize(&mut buf.freeze()).unwrap(), prep);
    }

    #[test]
    fn test_ttl_extremes() {
        for ttl in [0u8, 255] {
            let prep = IePrep::new(
                MacAddress::BROADCAST,
                u32::MAX,
                MacAddress::ZERO,
                0,
                u32::MAX,
                0,
                ttl,
            );
            let mut buf = BytesMut::new();
            prep.serialize(&mut buf);
            assert_eq!(IePrep::deserialize(&mut buf.freeze()).unwrap(), prep);
        }
    }

    #[test]
    fn test_metric_never_decreases() {
        let mut prep = IePrep::new(MacAddress::ZERO, 1, MacAddress::ZERO, 1, 10, 1, 3);
        let before = prep.metric();
        prep.increment_metric(0);
        assert!(prep.metric() >= before);
        prep.increment_metric(u32::MAX);
        assert_eq!(prep.metric(), u32::MAX);
    }
}
