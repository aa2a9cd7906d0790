//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Buffer ended before the structure was complete
    #[error("incomplete element")]
    Incomplete,

    /// Element id does not match the element being decoded
    #[error("unexpected element id {found} (wanted {expected})")]
    ElementId {
        /// Id the decoder was asked for
        expected: u8,
        /// Id found on the wire
        found: u8,
    },

    /// Unknown element id in an element list
    #[error("unknown element {0}")]
    UnknownElement(u8),

    /// Length field disagrees with what the information field consumed
    #[error("length mismatch for element {element}: declared {declared}, consumed {consumed}")]
    Length {
        /// Element id
        element: u8,
        /// Declared length octet
        declared: usize,
        /// Bytes actually consumed by the parser
        consumed: usize,
    },

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Unknown peering management subtype
    #[error("unknown subtype {0}")]
    Subtype(u8),

    /// Unknown reason code
    #[error("unknown reason code {0}")]
    Reason(u16),

    /// Unknown frame type
    #[error("unknown type {0}")]
    Type(u8),

    /// Frame check sequence mismatch
    #[error("fcs mismatch")]
    Fcs,

    /// Reserved bits nonzero
    #[error("reserved bits nonzero")]
    Reserved,

    /// Malformed address text
    #[error("invalid address: {0}")]
    Address(String),

    /// Malformed frame structure
    #[error("malformed frame")]
    Malformed,
}
