//! Information element framing.
//!
//! Every element is `id u8 | length u8 | information field`. The
//! [`InformationElement`] trait supplies the framing once; element types only
//! describe their information field. [`Element`] is the owned sum type a frame
//! body decodes into.

use crate::{
    IeBeaconTiming, IeConfiguration, IeMeshId, IePeerManagement, IePerr, IePrep, IePreq, IeRann,
    WireError,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Largest information field an element can carry
pub const MAX_INFORMATION_FIELD_SIZE: usize = 255;

/// Element identifiers used by mesh peering and path selection
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementId {
    /// Mesh configuration
    MeshConfiguration = 113,
    /// Mesh ID
    MeshId = 114,
    /// Mesh peering management
    PeeringManagement = 117,
    /// Beacon timing
    BeaconTiming = 120,
    /// Root announcement
    Rann = 126,
    /// Path request
    Preq = 130,
    /// Path reply
    Prep = 131,
    /// Path error
    Perr = 132,
}

impl TryFrom<u8> for ElementId {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            113 => Ok(ElementId::MeshConfiguration),
            114 => Ok(ElementId::MeshId),
            117 => Ok(ElementId::PeeringManagement),
            120 => Ok(ElementId::BeaconTiming),
            126 => Ok(ElementId::Rann),
            130 => Ok(ElementId::Preq),
            131 => Ok(ElementId::Prep),
            132 => Ok(ElementId::Perr),
            _ => Err(WireError::UnknownElement(value)),
        }
    }
}

/// An element with a fixed id and a self-describing information field.
///
/// `information_field_size` must equal the number of bytes
/// `serialize_information_field` writes and `deserialize_information_field`
/// consumes.
pub trait InformationElement: Sized {
    /// Element id written in front of the information field
    const ELEMENT_ID: ElementId;

    /// Size of the information field in bytes
    fn information_field_size(&self) -> usize;

    /// Write the information field
    fn serialize_information_field(&self, buf: &mut BytesMut);

    /// Parse the information field from a buffer holding exactly `length` bytes
    fn deserialize_information_field(buf: &mut Bytes, length: usize) -> Result<Self, WireError>;

    /// Element id
    fn element_id(&self) -> ElementId {
        Self::ELEMENT_ID
    }

    /// Size including the id and length octets
    fn serialized_size(&self) -> usize {
        2 + self.information_field_size()
    }

    /// Write id, length and information field
    fn serialize(&self, buf: &mut BytesMut) {
        let size = self.information_field_size();
        debug_assert!(size <= MAX_INFORMATION_FIELD_SIZE);
        buf.put_u8(Self::ELEMENT_ID as u8);
        buf.put_u8(size as u8);
        self.serialize_information_field(buf);
    }

    /// Read id, length and information field
    fn deserialize(buf: &mut Bytes) -> Result<Self, WireError> {
        need(buf, 2)?;
        let found = buf.get_u8();
        if found != Self::ELEMENT_ID as u8 {
            return Err(WireError::ElementId {
                expected: Self::ELEMENT_ID as u8,
                found,
            });
        }
        let length = buf.get_u8() as usize;
        Self::deserialize_body(buf, length)
    }

    /// Parse a body whose id and length have already been read
    fn deserialize_body(buf: &mut Bytes, length: usize) -> Result<Self, WireError> {
        need(buf, length)?;
        let mut field = buf.split_to(length);
        let element = Self::deserialize_information_field(&mut field, length)?;
        if field.has_remaining() {
            return Err(WireError::Length {
                element: Self::ELEMENT_ID as u8,
                declared: length,
                consumed: length - field.remaining(),
            });
        }
        Ok(element)
    }
}

/// Fail with [`WireError::Incomplete`] unless `n` bytes remain
pub(crate) fn need(buf: &Bytes, n: usize) -> Result<(), WireError> {
    if buf.remaining() < n {
        Err(WireError::Incomplete)
    } else {
        Ok(())
    }
}

/// Decoded information element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    /// Path request
    Preq(IePreq),
    /// Path reply
    Prep(IePrep),
    /// Path error
    Perr(IePerr),
    /// Root announcement
    Rann(IeRann),
    /// Peering management
    PeerManagement(IePeerManagement),
    /// Beacon timing
    BeaconTiming(IeBeaconTiming),
    /// Mesh configuration
    Configuration(IeConfiguration),
    /// Mesh ID
    MeshId(IeMeshId),
}

impl Element {
    /// Element id of the wrapped element
    pub fn id(&self) -> ElementId {
        match self {
            Element::Preq(ie) => ie.element_id(),
            Element::Prep(ie) => ie.element_id(),
            Element::Perr(ie) => ie.element_id(),
            Element::Rann(ie) => ie.element_id(),
            Element::PeerManagement(ie) => ie.element_id(),
            Element::BeaconTiming(ie) => ie.element_id(),
            Element::Configuration(ie) => ie.element_id(),
            Element::MeshId(ie) => ie.element_id(),
        }
    }

    /// Size including id and length octets
    pub fn serialized_size(&self) -> usize {
        match self {
            Element::Preq(ie) => ie.serialized_size(),
            Element::Prep(ie) => ie.serialized_size(),
            Element::Perr(ie) => ie.serialized_size(),
            Element::Rann(ie) => ie.serialized_size(),
            Element::PeerManagement(ie) => ie.serialized_size(),
            Element::BeaconTiming(ie) => ie.serialized_size(),
            Element::Configuration(ie) => ie.serialized_size(),
            Element::MeshId(ie) => ie.serialized_size(),
        }
    }

    /// Write the element
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Element::Preq(ie) => ie.serialize(buf),
            Element::Prep(ie) => ie.serialize(buf),
            Element::Perr(ie) => ie.serialize(buf),
            Element::Rann(ie) => ie.serialize(buf),
            Element::PeerManagement(ie) => ie.serialize(buf),
            Element::BeaconTiming(ie) => ie.serialize(buf),
            Element::Configuration(ie) => ie.serialize(buf),
            Element::MeshId(ie) => ie.serialize(buf),
        }
    }

    /// Read one element, dispatching on its id
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        need(buf, 2)?;
        let id = ElementId::try_from(buf.get_u8())?;
        let length = buf.get_u8() as usize;
        let element = match id {
            ElementId::Preq => Element::Preq(IePreq::deserialize_body(buf, length)?),
            ElementId::Prep => Element::Prep(IePrep::deserialize_body(buf, length)?),
            ElementId::Perr => Element::Perr(IePerr::deserialize_body(buf, length)?),
            ElementId::Rann => Element::Rann(IeRann::deserialize_body(buf, length)?),
            ElementId::PeeringManagement => {
                Element::PeerManagement(IePeerManagement::deserialize_body(buf, length)?)
            }
            ElementId::BeaconTiming => {
                Element::BeaconTiming(IeBeaconTiming::deserialize_body(buf, length)?)
            }
            ElementId::MeshConfiguration => {
                Element::Configuration(IeConfiguration::deserialize_body(buf, length)?)
            }
            ElementId::MeshId => Element::MeshId(IeMeshId::deserialize_body(buf, length)?),
        };
        Ok(element)
    }
}

/// Write a list of elements back to back
pub fn encode_elements(elements: &[Element], buf: &mut BytesMut) {
    for element in elements {
        element.encode(buf);
    }
}

/// Read elements until the buffer is exhausted
pub fn decode_elements(buf: &mut Bytes) -> Result<Vec<Element>, WireError> {
    let mut elements = Vec::new();
    while buf.has_remaining() {
        elements.push(Element::decode(buf)?);
    }
    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MacAddress, PmpReasonCode};

    #[test]
    fn test_element_id_conversion() {
        assert_eq!(ElementId::try_from(130).unwrap(), ElementId::Preq);
        assert_eq!(ElementId::try_from(117).unwrap(), ElementId::PeeringManagement);
        assert_eq!(ElementId::try_from(0), Err(WireError::UnknownElement(0)));
    }

    #[test]
    fn test_element_list_round_trip() {
        let elements = vec![
            Element::PeerManagement(IePeerManagement::close(3, 9, PmpReasonCode::CloseRcvd)),
            Element::MeshId(IeMeshId::new("lab").unwrap()),
            Element::Configuration(IeConfiguration::default()),
        ];
        let mut buf = BytesMut::new();
        encode_elements(&elements, &mut buf);
        let expected: usize = elements.iter().map(Element::serialized_size).sum();
        assert_eq!(buf.len(), expected);

        let mut bytes = buf.freeze();
        assert_eq!(decode_elements(&mut bytes).unwrap(), elements);
    }

    #[test]
    fn test_wrong_element_id() {
        let mut buf = BytesMut::new();
        IeMeshId::new("a").unwrap().serialize(&mut buf);
        let mut bytes = buf.freeze();
        assert!(matches!(
            IePrep::deserialize(&mut bytes),
            Err(WireError::ElementId { expected: 131, found: 114 })
        ));
    }

    #[test]
    fn test_truncated_element() {
        let mut buf = BytesMut::new();
        IePrep::new(MacAddress::from_index(1), 1, MacAddress::from_index(2), 1, 0, 10, 32)
            .serialize(&mut buf);
        buf.truncate(buf.len() - 3);
        let mut bytes = buf.freeze();
        assert_eq!(Element::decode(&mut bytes), Err(WireError::Incomplete));
    }

    #[test]
    fn test_length_overrun_is_rejected() {
        // Mesh configuration is 7 bytes; declare 8 and pad.
        let mut buf = BytesMut::new();
        buf.put_u8(ElementId::MeshConfiguration as u8);
        buf.put_u8(8);
        IeConfiguration::default().serialize_information_field(&mut buf);
        buf.put_u8(0);
        let mut bytes = buf.freeze();
        assert!(matches!(
            Element::decode(&mut bytes),
            Err(WireError::Length { element: 113, declared: 8, consumed: 7 })
        ));
    }
}
