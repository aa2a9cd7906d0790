//! Path request element.

use crate::element::{need, InformationElement, MAX_INFORMATION_FIELD_SIZE};
use crate::{ElementId, MacAddress, WireError};
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Fixed part of the PREQ information field
const PREQ_FIXED_SIZE: usize = 26;

/// Size of one destination unit
const DESTINATION_UNIT_SIZE: usize = 11;

/// Largest number of destinations a single PREQ can carry
pub const MAX_PREQ_DESTINATIONS: usize =
    (MAX_INFORMATION_FIELD_SIZE - PREQ_FIXED_SIZE) / DESTINATION_UNIT_SIZE;

bitflags! {
    /// PREQ element flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PreqFlags: u8 {
        /// Individually addressed PREQ
        const UNICAST = 1 << 1;
        /// Receivers of a proactive PREQ need not reply
        const NEED_NOT_PREP = 1 << 2;
    }
}

bitflags! {
    /// Per-destination flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DestinationFlags: u8 {
        /// Destination only: intermediate nodes must not answer
        const DO = 1 << 0;
        /// Reply and forward
        const RF = 1 << 1;
        /// Unknown sequence number
        const USN = 1 << 2;
    }
}

/// One requested destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationAddressUnit {
    flags: DestinationFlags,
    address: MacAddress,
    seqno: u32,
}

impl DestinationAddressUnit {
    /// Create a unit; a zero sequence number is marked unknown
    pub fn new(do_flag: bool, rf_flag: bool, address: MacAddress, seqno: u32) -> Self {
        let mut flags = DestinationFlags::empty();
        flags.set(DestinationFlags::DO, do_flag);
        flags.set(DestinationFlags::RF, rf_flag);
        flags.set(DestinationFlags::USN, seqno == 0);
        Self {
            flags,
            address,
            seqno,
        }
    }

    /// Replace all three flags at once
    pub fn set_flags(&mut self, do_flag: bool, rf_flag: bool, usn: bool) {
        self.flags.set(DestinationFlags::DO, do_flag);
        self.flags.set(DestinationFlags::RF, rf_flag);
        self.flags.set(DestinationFlags::USN, usn);
    }

    /// DO flag
    pub fn is_do(&self) -> bool {
        self.flags.contains(DestinationFlags::DO)
    }

    /// RF flag
    pub fn is_rf(&self) -> bool {
        self.flags.contains(DestinationFlags::RF)
    }

    /// USN flag
    pub fn is_usn(&self) -> bool {
        self.flags.contains(DestinationFlags::USN)
    }

    /// Destination address
    pub fn address(&self) -> MacAddress {
        self.address
    }

    /// Last known destination sequence number
    pub fn seqno(&self) -> u32 {
        self.seqno
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags.bits());
        self.address.encode(buf);
        buf.put_u32_le(self.seqno);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        need(buf, DESTINATION_UNIT_SIZE)?;
        let flags = DestinationFlags::from_bits(buf.get_u8()).ok_or(WireError::Reserved)?;
        let address = MacAddress::decode(buf)?;
        let seqno = buf.get_u32_le();
        Ok(Self {
            flags,
            address,
            seqno,
        })
    }
}

/// Path request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IePreq {
    flags: PreqFlags,
    hop_count: u8,
    ttl: u8,
    preq_id: u32,
    originator: MacAddress,
    originator_seqno: u32,
    lifetime: u32,
    metric: u32,
    destinations: Vec<DestinationAddressUnit>,
}

impl IePreq {
    /// New request with zero hop count, zero metric and no destinations.
    ///
    /// `lifetime` is in time units.
    pub fn new(
        originator: MacAddress,
        originator_seqno: u32,
        preq_id: u32,
        lifetime: u32,
        ttl: u8,
    ) -> Self {
        Self {
            flags: PreqFlags::empty(),
            hop_count: 0,
            ttl,
            preq_id,
            originator,
            originator_seqno,
            lifetime,
            metric: 0,
            destinations: Vec::new(),
        }
    }

    /// Mark as individually addressed
    pub fn set_unicast(&mut self) {
        self.flags.insert(PreqFlags::UNICAST);
    }

    /// Mark a proactive PREQ as not requiring replies
    pub fn set_need_not_prep(&mut self) {
        self.flags.insert(PreqFlags::NEED_NOT_PREP);
    }

    /// Element flags
    pub fn flags(&self) -> PreqFlags {
        self.flags
    }

    /// True when individually addressed
    pub fn is_unicast(&self) -> bool {
        self.flags.contains(PreqFlags::UNICAST)
    }

    /// True when receivers need not reply
    pub fn is_need_not_prep(&self) -> bool {
        self.flags.contains(PreqFlags::NEED_NOT_PREP)
    }

    /// Hops travelled so far
    pub fn hop_count(&self) -> u8 {
        self.hop_count
    }

    /// Remaining time to live
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    /// Request id of the originator
    pub fn preq_id(&self) -> u32 {
        self.preq_id
    }

    /// Originator address
    pub fn originator(&self) -> MacAddress {
        self.originator
    }

    /// Originator sequence number
    pub fn originator_seqno(&self) -> u32 {
        self.originator_seqno
    }

    /// Path lifetime in time units
    pub fn lifetime(&self) -> u32 {
        self.lifetime
    }

    /// Accumulated metric
    pub fn metric(&self) -> u32 {
        self.metric
    }

    /// Requested destinations
    pub fn destinations(&self) -> &[DestinationAddressUnit] {
        &self.destinations
    }

    /// Number of requested destinations
    pub fn dest_count(&self) -> usize {
        self.destinations.len()
    }

    /// Spend one hop: TTL down, hop count up
    pub fn decrement_ttl(&mut self) {
        self.ttl = self.ttl.saturating_sub(1);
        self.hop_count = self.hop_count.saturating_add(1);
    }

    /// Add the cost of the link the request just crossed
    pub fn increment_metric(&mut self, metric: u32) {
        self.metric = self.metric.saturating_add(metric);
    }

    /// Append a destination unless it is already present or the element is full.
    ///
    /// Returns false when the destination could not be added.
    pub fn add_destination(
        &mut self,
        do_flag: bool,
        rf_flag: bool,
        address: MacAddress,
        seqno: u32,
    ) -> bool {
        if self.destinations.iter().any(|d| d.address == address) {
            return true;
        }
        if self.is_full() {
            return false;
        }
        self.destinations
            .push(DestinationAddressUnit::new(do_flag, rf_flag, address, seqno));
        true
    }

    /// Remove a destination
    pub fn del_destination(&mut self, address: MacAddress) {
        self.destinations.retain(|d| d.address != address);
    }

    /// Drop every destination
    pub fn clear_destinations(&mut self) {
        self.destinations.clear();
    }

    /// Rewrite the flags of one destination
    pub fn set_destination_flags(&mut self, address: MacAddress, do_flag: bool, rf_flag: bool) {
        if let Some(unit) = self.destinations.iter_mut().find(|d| d.address == address) {
            let usn = unit.is_usn();
            unit.set_flags(do_flag, rf_flag, usn);
        }
    }

    /// True when one more destination would overflow the element
    pub fn is_full(&self) -> bool {
        self.information_field_size() + DESTINATION_UNIT_SIZE > MAX_INFORMATION_FIELD_SIZE
    }

    /// Whether a destination for a request from `originator` can be folded into this element
    pub fn may_add_address(&self, originator: MacAddress) -> bool {
        self.originator == originator && !self.is_full()
    }
}

impl InformationElement for IePreq {
    const ELEMENT_ID: ElementId = ElementId::Preq;

    fn information_field_size(&self) -> usize {
        PREQ_FIXED_SIZE + DESTINATION_UNIT_SIZE * self.destinations.len()
    }

    fn serialize_information_field(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags.bits());
        buf.put_u8(self.hop_count);
        buf.put_u8(self.ttl);
        buf.put_u32_le(self.preq_id);
        self.originator.encode(buf);
        buf.put_u32_le(self.originator_seqno);
        buf.put_u32_le(self.lifetime);
        buf.put_u32_le(self.metric);
        buf.put_u8(self.destinations.len() as u8);
        for unit in &self.destinations {
            unit.encode(buf);
        }
    }

    fn deserialize_information_field(buf: &mut Bytes, length: usize) -> Result<Self, WireError> {
        need(buf, PREQ_FIXED_SIZE)?;
        let flags = PreqFlags::from_bits(buf.get_u8()).ok_or(WireError::Reserved)?;
        let hop_count = buf.get_u8();
        let ttl = buf.get_u8();
        let preq_id = buf.get_u32_le();
        let originator = MacAddress::decode(buf)?;
        let originator_seqno = buf.get_u32_le();
        let lifetime = buf.get_u32_le();
        let metric = buf.get_u32_le();
        let count = buf.get_u8() as usize;
        if PREQ_FIXED_SIZE + count * DESTINATION_UNIT_SIZE != length {
            return Err(WireError::Length {
                element: ElementId::Preq as u8,
                declared: length,
                consumed: PREQ_FIXED_SIZE + count * DESTINATION_UNIT_SIZE,
            });
        }
        let destinations = (0..count)
            .map(|_| DestinationAddressUnit::decode(buf))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            flags,
            hop_count,
            ttl,
            preq_id,
            originator,
            originator_seqno,
            lifetime,
            metric,
            destinations,
        })
    }
}
