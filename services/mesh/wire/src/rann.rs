//! Root announcement element.

use crate::element::{need, InformationElement};
use crate::{ElementId, MacAddress, WireError};
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

const RANN_SIZE: usize = 21;

bitflags! {
    /// RANN flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RannFlags: u8 {
        /// Root is also a gate/portal
        const PORTAL = 1 << 0;
    }
}

/// Root announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IeRann {
    flags: RannFlags,
    hop_count: u8,
    ttl: u8,
    root: MacAddress,
    seqno: u32,
    interval: u32,
    metric: u32,
}

impl IeRann {
    /// Fresh announcement from `root`; `interval` is in time units
    pub fn new(root: MacAddress, seqno: u32, interval: u32, ttl: u8) -> Self {
        Self {
            flags: RannFlags::empty(),
            hop_count: 0,
            ttl,
            root,
            seqno,
            interval,
            metric: 0,
        }
    }

    /// Mark the root as a portal
    pub fn set_portal(&mut self) {
        self.flags.insert(RannFlags::PORTAL);
    }

    /// Element flags
    pub fn flags(&self) -> RannFlags {
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

    /// Announcing root
    pub fn root(&self) -> MacAddress {
        self.root
    }

    /// Root sequence number
    pub fn seqno(&self) -> u32 {
        self.seqno
    }

    /// Announcement interval in time units
    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Accumulated metric towards the root
    pub fn metric(&self) -> u32 {
        self.metric
    }

    /// Spend one hop: TTL down, hop count up
    pub fn decrement_ttl(&mut self) {
        self.ttl = self.ttl.saturating_sub(1);
        self.hop_count = self.hop_count.saturating_add(1);
    }

    /// Add the cost of the link the announcement just crossed
    pub fn increment_metric(&mut self, metric: u32) {
        self.metric = self.metric.saturating_add(metric);
    }
}

impl InformationElement for IeRann {
    const ELEMENT_ID: ElementId = ElementId::Rann;

    fn information_field_size(&self) -> usize {
        RANN_SIZE
    }

    fn serialize_information_field(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags.bits());
        buf.put_u8(self.hop_count);
        buf.put_u8(self.ttl);
        self.root.encode(buf);
        buf.put_u32_le(self.seqno);
        buf.put_u32_le(self.interval);
        buf.put_u32_le(self.metric);
    }

    fn deserialize_information_field(buf: &mut Bytes, _length: usize) -> Result<Self, WireError> {
        need(buf, RANN_SIZE)?;
        let flags = RannFlags::from_bits(buf.get_u8()).ok_or(WireError::Reserved)?;
        let hop_count = buf.get_u8();
        let ttl = buf.get_u8();
        let root = MacAddress::decode(buf)?;
        let seqno = buf.get_u32_le();
        let interval = buf.get_u32_le();
        let metric = buf.get_u32_le();
        Ok(Self {
            flags,
            hop_count,
            ttl,
            root,
            seqno,
            interval,
            metric,
        })
    }
}
