//! Mesh control header carried in front of every mesh data payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::MacAddress;

/// Size of the header without extension addresses
pub const MESH_HEADER_BASE_SIZE: usize = 6;

/// Address extension carried by the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressExtension {
    /// No extension
    None,
    /// Address 4
    One(MacAddress),
    /// Addresses 5 and 6
    Two(MacAddress, MacAddress),
}

impl AddressExtension {
    fn mode(&self) -> u8 {
        match self {
            AddressExtension::None => 0,
            AddressExtension::One(_) => 1,
            AddressExtension::Two(_, _) => 2,
        }
    }

    fn size(&self) -> usize {
        6 * self.mode() as usize
    }
}

/// Mesh control header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshHeader {
    /// Hops left
    pub ttl: u8,
    /// Per-source mesh sequence number
    pub seqno: u32,
    /// Optional extension addresses
    pub extension: AddressExtension,
}

impl MeshHeader {
    /// Header without extension addresses
    pub fn new(ttl: u8, seqno: u32) -> Self {
        Self {
            ttl,
            seqno,
            extension: AddressExtension::None,
        }
    }

    /// Encoded size
    pub fn serialized_size(&self) -> usize {
        MESH_HEADER_BASE_SIZE + self.extension.size()
    }

    /// Encode (little endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.extension.mode());
        buf.put_u8(self.ttl);
        buf.put_u32_le(self.seqno);
        match self.extension {
            AddressExtension::None => {}
            AddressExtension::One(a4) => a4.encode(buf),
            AddressExtension::Two(a5, a6) => {
                a5.encode(buf);
                a6.encode(buf);
            }
        }
    }

    /// Decode (little endian)
    pub fn decode(buf: &mut Bytes) -> Result<Self, crate::WireError> {
        if buf.remaining() < MESH_HEADER_BASE_SIZE {
            return Err(crate::WireError::Incomplete);
        }
        let flags = buf.get_u8();
        if flags & !0x03 != 0 {
            return Err(crate::WireError::Reserved);
        }
        let ttl = buf.get_u8();
        let seqno = buf.get_u32_le();
        let extension = match flags & 0x03 {
            0 => AddressExtension::None,
            1 => AddressExtension::One(MacAddress::decode(buf)?),
            2 => AddressExtension::Two(MacAddress::decode(buf)?, MacAddress::decode(buf)?),
            _ => return Err(crate::WireError::Reserved),
        };
        Ok(Self {
            ttl,
            seqno,
            extension,
        })
    }
}
