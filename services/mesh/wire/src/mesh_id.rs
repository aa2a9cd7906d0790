//! Mesh ID element.

use crate::element::InformationElement;
use crate::{ElementId, WireError};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Longest mesh ID in bytes
pub const MAX_MESH_ID_LEN: usize = 32;

/// Mesh ID element
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct IeMeshId {
    id: Vec<u8>,
}

impl IeMeshId {
    /// Create from text; rejects IDs longer than 32 bytes
    pub fn new(id: &str) -> Result<Self, WireError> {
        Self::from_bytes(id.as_bytes())
    }

    /// Create from raw bytes; rejects IDs longer than 32 bytes
    pub fn from_bytes(id: &[u8]) -> Result<Self, WireError> {
        if id.len() > MAX_MESH_ID_LEN {
            return Err(WireError::Size(id.len()));
        }
        Ok(Self { id: id.to_vec() })
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.id
    }

    /// Wildcard (empty) mesh ID
    pub fn is_broadcast(&self) -> bool {
        self.id.is_empty()
    }
}

impl fmt::Display for IeMeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.id))
    }
}

impl InformationElement for IeMeshId {
    const ELEMENT_ID: ElementId = ElementId::MeshId;

    fn information_field_size(&self) -> usize {
        self.id.len()
    }

    fn serialize_information_field(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.id);
    }

    fn deserialize_information_field(buf: &mut Bytes, length: usize) -> Result<Self, WireError> {
        if length > MAX_MESH_ID_LEN {
            return Err(WireError::Size(length));
        }
        let id = buf.split_to(length).to_vec();
        Ok(Self { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_max_length() {
        let text = "m".repeat(MAX_MESH_ID_LEN);
        let id = IeMeshId::new(&text).unwrap();
        let mut buf = BytesMut::new();
        id.serialize(&mut buf);
        assert_eq!(buf.len(), 34);
        assert_eq!(IeMeshId::deserialize(&mut buf.freeze()).unwrap(), id);
    }

    #[test]
    fn test_round_trip_empty() {
        let id = IeMeshId::default();
        assert!(id.is_broadcast());
        let mut buf = BytesMut::new();
        id.serialize(&mut buf);
        assert_eq!(IeMeshId::deserialize(&mut buf.freeze()).unwrap(), id);
    }

    #[test]
    fn test_too_long() {
        let text = "m".repeat(MAX_MESH_ID_LEN + 1);
        assert_eq!(IeMeshId::new(&text), Err(WireError::Size(33)));
        let mut raw = vec![114u8, 33];
        raw.extend(std::iter::repeat(b'm').take(33));
        assert_eq!(
            IeMeshId::deserialize(&mut Bytes::from(raw)),
            Err(WireError::Size(33))
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(IeMeshId::new("lab-mesh").unwrap().to_string(), "lab-mesh");
    }
}
