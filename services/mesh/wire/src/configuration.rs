//! Mesh configuration element.

use crate::element::{need, InformationElement};
use crate::{ElementId, WireError};
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

const CONFIGURATION_SIZE: usize = 7;

/// Active path selection protocol identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathSelectionProtocol(pub u8);

impl PathSelectionProtocol {
    /// Hybrid wireless mesh protocol
    pub const HWMP: Self = Self(1);
}

/// Active path selection metric identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathSelectionMetric(pub u8);

impl PathSelectionMetric {
    /// Airtime link metric
    pub const AIRTIME: Self = Self(1);
}

bitflags! {
    /// Mesh capability octet
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MeshCapability: u8 {
        /// Accepting additional peerings
        const ACCEPT_PEER_LINKS = 1 << 0;
        /// MCCA supported
        const MCCA_SUPPORTED = 1 << 1;
        /// MCCA enabled
        const MCCA_ENABLED = 1 << 2;
        /// Forwarding enabled
        const FORWARDING = 1 << 3;
        /// Beacon timing reports enabled
        const BEACON_TIMING_REPORT = 1 << 4;
        /// TBTT adjustment enabled
        const TBTT_ADJUSTMENT = 1 << 5;
        /// Power save level
        const POWER_SAVE = 1 << 6;
    }
}

/// Mesh configuration element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IeConfiguration {
    /// Path selection protocol
    pub path_selection_protocol: PathSelectionProtocol,
    /// Path selection metric
    pub path_selection_metric: PathSelectionMetric,
    /// Congestion control mode (0: none)
    pub congestion_control: u8,
    /// Synchronization method (1: neighbor offset)
    pub sync_method: u8,
    /// Authentication protocol (0: none)
    pub auth_protocol: u8,
    /// Formation info: number of peerings shifted left by one
    pub formation_info: u8,
    /// Capability flags
    pub capability: MeshCapability,
}

impl Default for IeConfiguration {
    fn default() -> Self {
        Self {
            path_selection_protocol: PathSelectionProtocol::HWMP,
            path_selection_metric: PathSelectionMetric::AIRTIME,
            congestion_control: 0,
            sync_method: 1,
            auth_protocol: 0,
            formation_info: 0,
            capability: MeshCapability::ACCEPT_PEER_LINKS
                | MeshCapability::FORWARDING
                | MeshCapability::BEACON_TIMING_REPORT,
        }
    }
}

impl IeConfiguration {
    /// Number of peerings advertised in the formation info
    pub fn neighbor_count(&self) -> u8 {
        (self.formation_info >> 1) & 0x3f
    }

    /// Advertise a number of peerings (capped at 63)
    pub fn set_neighbor_count(&mut self, count: usize) {
        let count = count.min(63) as u8;
        self.formation_info = (self.formation_info & 0x81) | (count << 1);
    }

    /// Whether the peer accepts new peer links
    pub fn accepts_peer_links(&self) -> bool {
        self.capability.contains(MeshCapability::ACCEPT_PEER_LINKS)
    }

    /// Two configurations are compatible when protocol and metric agree
    pub fn is_compatible(&self, other: &IeConfiguration) -> bool {
        self.path_selection_protocol == other.path_selection_protocol
            && self.path_selection_metric == other.path_selection_metric
    }
}

impl InformationElement for IeConfiguration {
    const ELEMENT_ID: ElementId = ElementId::MeshConfiguration;

    fn information_field_size(&self) -> usize {
        CONFIGURATION_SIZE
    }

    fn serialize_information_field(&self, buf: &mut BytesMut) {
        buf.put_u8(self.path_selection_protocol.0);
        buf.put_u8(self.path_selection_metric.0);
        buf.put_u8(self.congestion_control);
        buf.put_u8(self.sync_method);
        buf.put_u8(self.auth_protocol);
        buf.put_u8(self.formation_info);
        buf.put_u8(self.capability.bits());
    }

    fn deserialize_information_field(buf: &mut Bytes, _length: usize) -> Result<Self, WireError> {
        need(buf, CONFIGURATION_SIZE)?;
        Ok(Self {
            path_selection_protocol: PathSelectionProtocol(buf.get_u8()),
            path_selection_metric: PathSelectionMetric(buf.get_u8()),
            congestion_control: buf.get_u8(),
            sync_method: buf.get_u8(),
            auth_protocol: buf.get_u8(),
            formation_info: buf.get_u8(),
            capability: MeshCapability::from_bits(buf.get_u8()).ok_or(WireError::Reserved)?,
        })
    }
}
