//! Frames exchanged over the shared medium.
//!
//! ```text
//! +-----------+-------------+----------------+----------+-----------+
//! | type u8   | receiver 6B | transmitter 6B | body     | fcs u32le |
//! +-----------+-------------+----------------+----------+-----------+
//! ```
//!
//! The FCS is a CRC32 over everything before it.

use crate::element::{decode_elements, encode_elements, Element};
use crate::{MacAddress, MeshHeader, WireError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Largest encoded frame accepted
pub const MAX_FRAME_SIZE: usize = 2346;

const FRAME_OVERHEAD: usize = 1 + 6 + 6 + 4;

/// Frame types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    /// Mesh beacon
    Beacon = 0x00,
    /// Peer link open, confirm or close
    PeerLink = 0x01,
    /// HWMP path selection action
    PathSelection = 0x02,
    /// Mesh data
    Data = 0x03,
}

impl TryFrom<u8> for FrameType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(FrameType::Beacon),
            0x01 => Ok(FrameType::PeerLink),
            0x02 => Ok(FrameType::PathSelection),
            0x03 => Ok(FrameType::Data),
            _ => Err(WireError::Type(value)),
        }
    }
}

/// Frame body by type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    /// Beacon with its interval (TU) and mesh elements
    Beacon {
        /// Beacon interval in time units
        beacon_interval: u16,
        /// Mesh ID, configuration, beacon timing
        elements: Vec<Element>,
    },
    /// Peer link management action
    PeerLink {
        /// Association id (meaningful in confirms)
        aid: u16,
        /// Mesh point address of the sender
        mesh_point: MacAddress,
        /// Peering management, configuration, mesh ID
        elements: Vec<Element>,
    },
    /// HWMP action carrying PREQ/PREP/PERR/RANN elements
    PathSelection {
        /// Path selection elements
        elements: Vec<Element>,
    },
    /// Mesh data
    Data {
        /// Mesh source
        source: MacAddress,
        /// Mesh destination
        destination: MacAddress,
        /// Upper layer protocol
        protocol: u16,
        /// Mesh control header
        header: MeshHeader,
        /// Payload
        payload: Bytes,
    },
}

impl FrameBody {
    /// Type octet of this body
    pub fn frame_type(&self) -> FrameType {
        match self {
            FrameBody::Beacon { .. } => FrameType::Beacon,
            FrameBody::PeerLink { .. } => FrameType::PeerLink,
            FrameBody::PathSelection { .. } => FrameType::PathSelection,
            FrameBody::Data { .. } => FrameType::Data,
        }
    }

    fn encoded_size(&self) -> usize {
        let elements_size = |elements: &[Element]| -> usize {
            elements.iter().map(Element::serialized_size).sum()
        };
        match self {
            FrameBody::Beacon { elements, .. } => 2 + elements_size(elements),
            FrameBody::PeerLink { elements, .. } => 2 + 6 + elements_size(elements),
            FrameBody::PathSelection { elements } => elements_size(elements),
            FrameBody::Data {
                header, payload, ..
            } => 6 + 6 + 2 + header.serialized_size() + payload.len(),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            FrameBody::Beacon {
                beacon_interval,
                elements,
            } => {
                buf.put_u16_le(*beacon_interval);
                encode_elements(elements, buf);
            }
            FrameBody::PeerLink {
                aid,
                mesh_point,
                elements,
            } => {
                buf.put_u16_le(*aid);
                mesh_point.encode(buf);
                encode_elements(elements, buf);
            }
            FrameBody::PathSelection { elements } => encode_elements(elements, buf),
            FrameBody::Data {
                source,
                destination,
                protocol,
                header,
                payload,
            } => {
                source.encode(buf);
                destination.encode(buf);
                buf.put_u16_le(*protocol);
                header.encode(buf);
                buf.put_slice(payload);
            }
        }
    }

    fn decode(typ: FrameType, buf: &mut Bytes) -> Result<Self, WireError> {
        match typ {
            FrameType::Beacon => {
                if buf.remaining() < 2 {
                    return Err(WireError::Incomplete);
                }
                let beacon_interval = buf.get_u16_le();
                let elements = decode_elements(buf)?;
                Ok(FrameBody::Beacon {
                    beacon_interval,
                    elements,
                })
            }
            FrameType::PeerLink => {
                if buf.remaining() < 2 {
                    return Err(WireError::Incomplete);
                }
                let aid = buf.get_u16_le();
                let mesh_point = MacAddress::decode(buf)?;
                let elements = decode_elements(buf)?;
                Ok(FrameBody::PeerLink {
                    aid,
                    mesh_point,
                    elements,
                })
            }
            FrameType::PathSelection => Ok(FrameBody::PathSelection {
                elements: decode_elements(buf)?,
            }),
            FrameType::Data => {
                let source = MacAddress::decode(buf)?;
                let destination = MacAddress::decode(buf)?;
                if buf.remaining() < 2 {
                    return Err(WireError::Incomplete);
                }
                let protocol = buf.get_u16_le();
                let header = MeshHeader::decode(buf)?;
                let payload = buf.split_to(buf.remaining());
                Ok(FrameBody::Data {
                    source,
                    destination,
                    protocol,
                    header,
                    payload,
                })
            }
        }
    }
}

/// Frame on the medium
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Immediate receiver (may be broadcast)
    pub receiver: MacAddress,
    /// Immediate transmitter
    pub transmitter: MacAddress,
    /// Type-specific body
    pub body: FrameBody,
}

impl Frame {
    /// Create a frame
    pub fn new(receiver: MacAddress, transmitter: MacAddress, body: FrameBody) -> Self {
        Self {
            receiver,
            transmitter,
            body,
        }
    }

    /// Frame type
    pub fn frame_type(&self) -> FrameType {
        self.body.frame_type()
    }

    /// Total encoded size including the FCS
    pub fn encoded_size(&self) -> usize {
        FRAME_OVERHEAD + self.body.encoded_size()
    }

    /// Encode with a trailing FCS
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let total_size = self.encoded_size();
        if total_size > MAX_FRAME_SIZE {
            return Err(WireError::Size(total_size));
        }

        let mut buf = BytesMut::with_capacity(total_size);
        buf.put_u8(self.frame_type() as u8);
        self.receiver.encode(&mut buf);
        self.transmitter.encode(&mut buf);
        self.body.encode(&mut buf);

        let fcs = crc32fast::hash(&buf);
        buf.put_u32_le(fcs);
        Ok(buf.freeze())
    }

    /// Verify the FCS and decode
    pub fn decode(mut bytes: Bytes) -> Result<Self, WireError> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(WireError::Incomplete);
        }
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(WireError::Size(bytes.len()));
        }

        let fcs_offset = bytes.len() - 4;
        let expected = u32::from_le_bytes([
            bytes[fcs_offset],
            bytes[fcs_offset + 1],
            bytes[fcs_offset + 2],
            bytes[fcs_offset + 3],
        ]);
        if crc32fast::hash(&bytes[..fcs_offset]) != expected {
            return Err(WireError::Fcs);
        }
        bytes.truncate(fcs_offset);

        let typ = FrameType::try_from(bytes.get_u8())?;
        let receiver = MacAddress::decode(&mut bytes)?;
        let transmitter = MacAddress::decode(&mut bytes)?;
        let body = FrameBody::decode(typ, &mut bytes)?;
        Ok(Self {
            receiver,
            transmitter,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IePerr, IePreq, FailedDestination};

    fn addr(i: u32) -> MacAddress {
        MacAddress::from_index(i)
    }

    #[test]
    fn test_path_selection_frame() {
        let mut preq = IePreq::new(addr(1), 1, 1, 5000, 32);
        preq.add_destination(false, true, addr(3), 0);
        let mut perr = IePerr::new(32);
        perr.add_destination(FailedDestination::new(addr(4), 2));
        let frame = Frame::new(
            MacAddress::BROADCAST,
            addr(1),
            FrameBody::PathSelection {
                elements: vec![Element::Preq(preq), Element::Perr(perr)],
            },
        );
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes.len(), frame.encoded_size());
        assert_eq!(Frame::decode(bytes).unwrap(), frame);
    }

    #[test]
    fn test_data_frame() {
        let frame = Frame::new(
            addr(2),
            addr(1),
            FrameBody::Data {
                source: addr(1),
                destination: addr(3),
                protocol: 0x0800,
                header: MeshHeader::new(32, 7),
                payload: Bytes::from_static(b"hello mesh"),
            },
        );
        let bytes = frame.encode().unwrap();
        assert_eq!(Frame::decode(bytes).unwrap(), frame);
    }

    #[test]
    fn test_corrupted_frame_is_rejected() {
        let frame = Frame::new(
            addr(2),
            addr(1),
            FrameBody::Beacon {
                beacon_interval: 100,
                elements: Vec::new(),
            },
        );
        let bytes = frame.encode().unwrap();
        let mut corrupted = BytesMut::from(&bytes[..]);
        corrupted[3] ^= 0x40;
        assert_eq!(Frame::decode(corrupted.freeze()), Err(WireError::Fcs));
    }

    #[test]
    fn test_oversize_frame() {
        let frame = Frame::new(
            addr(2),
            addr(1),
            FrameBody::Data {
                source: addr(1),
                destination: addr(3),
                protocol: 0,
                header: MeshHeader::new(1, 1),
                payload: Bytes::from(vec![0u8; MAX_FRAME_SIZE]),
            },
        );
        assert!(matches!(frame.encode(), Err(WireError::Size(_))));
    }

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::try_from(0x01).unwrap(), FrameType::PeerLink);
        assert_eq!(FrameType::try_from(0x7f), Err(WireError::Type(0x7f)));
    }
}
