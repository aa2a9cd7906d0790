//! Mesh peering management element and reason codes.

use crate::element::{need, InformationElement};
use crate::{ElementId, WireError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Peering management frame subtype
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerManagementSubtype {
    /// Peer link open
    Open = 1,
    /// Peer link confirm
    Confirm = 2,
    /// Peer link close
    Close = 3,
}

impl TryFrom<u8> for PeerManagementSubtype {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PeerManagementSubtype::Open),
            2 => Ok(PeerManagementSubtype::Confirm),
            3 => Ok(PeerManagementSubtype::Close),
            _ => Err(WireError::Subtype(value)),
        }
    }
}

/// Reason codes carried by peer link close frames
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PmpReasonCode {
    /// Reserved / no reason
    Reserved = 0,
    /// Peering cancelled locally
    PeeringCancelled = 52,
    /// Maximum number of peer links reached
    MaxPeers = 53,
    /// Configuration or capability mismatch
    CapabilityPolicyViolation = 54,
    /// Peer sent a close
    CloseRcvd = 55,
    /// Open retries exhausted
    MaxRetries = 56,
    /// No confirm arrived in time
    ConfirmTimeout = 57,
    /// Invalid group key
    InvalidGtk = 58,
    /// Link identifiers or parameters inconsistent
    InconsistentParameters = 59,
    /// Invalid security capability
    InvalidSecurityCapability = 60,
}

impl TryFrom<u16> for PmpReasonCode {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PmpReasonCode::Reserved),
            52 => Ok(PmpReasonCode::PeeringCancelled),
            53 => Ok(PmpReasonCode::MaxPeers),
            54 => Ok(PmpReasonCode::CapabilityPolicyViolation),
            55 => Ok(PmpReasonCode::CloseRcvd),
            56 => Ok(PmpReasonCode::MaxRetries),
            57 => Ok(PmpReasonCode::ConfirmTimeout),
            58 => Ok(PmpReasonCode::InvalidGtk),
            59 => Ok(PmpReasonCode::InconsistentParameters),
            60 => Ok(PmpReasonCode::InvalidSecurityCapability),
            _ => Err(WireError::Reason(value)),
        }
    }
}

impl fmt::Display for PmpReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PmpReasonCode::Reserved => "reserved",
            PmpReasonCode::PeeringCancelled => "peering cancelled",
            PmpReasonCode::MaxPeers => "max peers",
            PmpReasonCode::CapabilityPolicyViolation => "capability policy violation",
            PmpReasonCode::CloseRcvd => "close received",
            PmpReasonCode::MaxRetries => "max retries",
            PmpReasonCode::ConfirmTimeout => "confirm timeout",
            PmpReasonCode::InvalidGtk => "invalid gtk",
            PmpReasonCode::InconsistentParameters => "inconsistent parameters",
            PmpReasonCode::InvalidSecurityCapability => "invalid security capability",
        };
        write!(f, "{} ({})", text, *self as u16)
    }
}

/// Peering management element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IePeerManagement {
    subtype: PeerManagementSubtype,
    local_link_id: u16,
    peer_link_id: u16,
    reason: PmpReasonCode,
}

impl IePeerManagement {
    /// Open carrying our link id
    pub fn open(local_link_id: u16) -> Self {
        Self {
            subtype: PeerManagementSubtype::Open,
            local_link_id,
            peer_link_id: 0,
            reason: PmpReasonCode::Reserved,
        }
    }

    /// Confirm carrying both link ids
    pub fn confirm(local_link_id: u16, peer_link_id: u16) -> Self {
        Self {
            subtype: PeerManagementSubtype::Confirm,
            local_link_id,
            peer_link_id,
            reason: PmpReasonCode::Reserved,
        }
    }

    /// Close carrying both link ids and a reason
    pub fn close(local_link_id: u16, peer_link_id: u16, reason: PmpReasonCode) -> Self {
        Self {
            subtype: PeerManagementSubtype::Close,
            local_link_id,
            peer_link_id,
            reason,
        }
    }

    /// Frame subtype
    pub fn subtype(&self) -> PeerManagementSubtype {
        self.subtype
    }

    /// True for open
    pub fn subtype_is_open(&self) -> bool {
        self.subtype == PeerManagementSubtype::Open
    }

    /// True for confirm
    pub fn subtype_is_confirm(&self) -> bool {
        self.subtype == PeerManagementSubtype::Confirm
    }

    /// True for close
    pub fn subtype_is_close(&self) -> bool {
        self.subtype == PeerManagementSubtype::Close
    }

    /// Sender's link id
    pub fn local_link_id(&self) -> u16 {
        self.local_link_id
    }

    /// Receiver's link id as known by the sender
    pub fn peer_link_id(&self) -> u16 {
        self.peer_link_id
    }

    /// Close reason
    pub fn reason_code(&self) -> PmpReasonCode {
        self.reason
    }
}

impl InformationElement for IePeerManagement {
    const ELEMENT_ID: ElementId = ElementId::PeeringManagement;

    fn information_field_size(&self) -> usize {
        match self.subtype {
            PeerManagementSubtype::Open => 3,
            PeerManagementSubtype::Confirm => 5,
            PeerManagementSubtype::Close => 7,
        }
    }

    fn serialize_information_field(&self, buf: &mut BytesMut) {
        buf.put_u8(self.subtype as u8);
        buf.put_u16_le(self.local_link_id);
        if self.subtype != PeerManagementSubtype::Open {
            buf.put_u16_le(self.peer_link_id);
        }
        if self.subtype == PeerManagementSubtype::Close {
            buf.put_u16_le(self.reason as u16);
        }
    }

    fn deserialize_information_field(buf: &mut Bytes, length: usize) -> Result<Self, WireError> {
        need(buf, 3)?;
        let subtype = PeerManagementSubtype::try_from(buf.get_u8())?;
        let expected = match subtype {
            PeerManagementSubtype::Open => 3,
            PeerManagementSubtype::Confirm => 5,
            PeerManagementSubtype::Close => 7,
        };
        if length != expected {
            return Err(WireError::Length {
                element: ElementId::PeeringManagement as u8,
                declared: length,
                consumed: expected,
            });
        }
        let local_link_id = buf.get_u16_le();
        let mut ie = Self::open(local_link_id);
        ie.subtype = subtype;
        if subtype != PeerManagementSubtype::Open {
            need(buf, 2)?;
            ie.peer_link_id = buf.get_u16_le();
        }
        if subtype == PeerManagementSubtype::Close {
            need(buf, 2)?;
            ie.reason = PmpReasonCode::try_from(buf.get_u16_le())?;
        }
        Ok(ie)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(ie: IePeerManagement) -> IePeerManagement {
        let mut buf = BytesMut::new();
        ie.serialize(&mut buf);
        assert_eq!(buf.len(), ie.serialized_size());
        IePeerManagement::deserialize(&mut buf.freeze()).unwrap()
    }

    #[test]
    fn test_round_trip_all_subtypes() {
        let open = IePeerManagement::open(0x1234);
        let confirm = IePeerManagement::confirm(1, u16::MAX);
        let close = IePeerManagement::close(7, 8, PmpReasonCode::MaxRetries);
        assert_eq!(round_trip(open), open);
        assert_eq!(round_trip(confirm), confirm);
        assert_eq!(round_trip(close), close);
        assert_eq!(open.serialized_size(), 5);
        assert_eq!(confirm.serialized_size(), 7);
        assert_eq!(close.serialized_size(), 9);
    }

    #[test]
    fn test_length_checked_against_subtype() {
        let mut buf = BytesMut::new();
        IePeerManagement::confirm(1, 2).serialize(&mut buf);
        buf[2] = PeerManagementSubtype::Close as u8;
        assert!(matches!(
            IePeerManagement::deserialize(&mut buf.freeze()),
            Err(WireError::Length { declared: 5, .. })
        ));
    }

    #[test]
    fn test_unknown_reason_and_subtype() {
        assert_eq!(PmpReasonCode::try_from(61), Err(WireError::Reason(61)));
        assert_eq!(PeerManagementSubtype::try_from(4), Err(WireError::Subtype(4)));
        assert_eq!(PmpReasonCode::ConfirmTimeout.to_string(), "confirm timeout (57)");
    }
}
