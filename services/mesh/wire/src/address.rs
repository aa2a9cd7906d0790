//! 48-bit MAC addresses.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Encoded size of an address
pub const ADDRESS_SIZE: usize = 6;

/// 6-byte MAC identifier used for nodes, originators, retransmitters and precursors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct MacAddress([u8; ADDRESS_SIZE]);

impl MacAddress {
    /// Broadcast address ff:ff:ff:ff:ff:ff
    pub const BROADCAST: MacAddress = MacAddress([0xff; ADDRESS_SIZE]);

    /// All-zero address
    pub const ZERO: MacAddress = MacAddress([0; ADDRESS_SIZE]);

    /// Create an address from raw octets
    pub const fn new(octets: [u8; ADDRESS_SIZE]) -> Self {
        Self(octets)
    }

    /// Locally administered address derived from a small index.
    ///
    /// `from_index(1)` is `02:00:00:00:00:01`.
    pub fn from_index(index: u32) -> Self {
        let b = index.to_be_bytes();
        Self([0x02, 0x00, b[0], b[1], b[2], b[3]])
    }

    /// Raw octets
    pub fn octets(&self) -> [u8; ADDRESS_SIZE] {
        self.0
    }

    /// True for ff:ff:ff:ff:ff:ff
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// True when the group bit is set
    pub fn is_group(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Write the six octets
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }

    /// Read six octets
    pub fn decode(buf: &mut Bytes) -> Result<Self, crate::WireError> {
        if buf.remaining() < ADDRESS_SIZE {
            return Err(crate::WireError::Incomplete);
        }
        let mut octets = [0u8; ADDRESS_SIZE];
        buf.copy_to_slice(&mut octets);
        Ok(Self(octets))
    }
}

impl From<[u8; ADDRESS_SIZE]> for MacAddress {
    fn from(octets: [u8; ADDRESS_SIZE]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = crate::WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; ADDRESS_SIZE];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| crate::WireError::Address(s.to_string()))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| crate::WireError::Address(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(crate::WireError::Address(s.to_string()));
        }
        Ok(Self(octets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let addr = MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x0a]);
        assert_eq!(addr.to_string(), "02:00:00:00:00:0a");
        assert_eq!("02:00:00:00:00:0a".parse::<MacAddress>().unwrap(), addr);
        assert!("02:00:00".parse::<MacAddress>().is_err());
        assert!("02:00:00:00:00:0a:01".parse::<MacAddress>().is_err());
        assert!("zz:00:00:00:00:00".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_from_index() {
        assert_eq!(MacAddress::from_index(1).to_string(), "02:00:00:00:00:01");
        assert_eq!(MacAddress::from_index(0x0102).to_string(), "02:00:00:00:01:02");
        assert!(!MacAddress::from_index(7).is_group());
        assert!(MacAddress::BROADCAST.is_group());
        assert!(MacAddress::BROADCAST.is_broadcast());
    }

    #[test]
    fn test_short_buffer() {
        let mut bytes = Bytes::from_static(&[1, 2, 3]);
        assert_eq!(MacAddress::decode(&mut bytes), Err(crate::WireError::Incomplete));
    }
}
