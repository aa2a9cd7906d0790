//! 802.11s information elements, mesh headers and frame codec for mesh.
//!
//! This crate provides the wire formats shared by the peering and path
//! selection engines: MAC addresses, the HWMP elements (PREQ, PREP, PERR,
//! RANN), the peering elements (peering management, mesh configuration, mesh
//! ID, beacon timing), the mesh control header and the frames that carry them.
//!
//! ## Features
//!
//! - **Byte-exact elements**: `information_field_size` always equals what
//!   serialization writes and deserialization consumes
//! - **Capacity contracts**: `is_full`/`may_add_address` let callers split
//!   oversized PREQs and PERRs
//! - **Zero-Copy I/O**: Uses `Bytes`/`BytesMut` for minimal allocations
//! - **FCS**: CRC32 over every frame
//!
//! ## Element Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u8 element id        | 113..132                   |
//! +----------------------+----------------------------+
//! | u8 length            | information field length   |
//! +----------------------+----------------------------+
//! | information field    | little endian fields       |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod beacon_timing;
pub mod configuration;
pub mod element;
pub mod error;
pub mod frame;
pub mod header;
pub mod mesh_id;
pub mod peer_management;
pub mod perr;
pub mod prep;
pub mod preq;
pub mod rann;
pub mod time;

// Re-export main types
pub use address::{MacAddress, ADDRESS_SIZE};
pub use beacon_timing::{BeaconTimingUnit, IeBeaconTiming, MAX_BEACON_TIMING_UNITS};
pub use configuration::{
    IeConfiguration, MeshCapability, PathSelectionMetric, PathSelectionProtocol,
};
pub use element::{
    decode_elements, encode_elements, Element, ElementId, InformationElement,
    MAX_INFORMATION_FIELD_SIZE,
};
pub use error::WireError;
pub use frame::{Frame, FrameBody, FrameType, MAX_FRAME_SIZE};
pub use header::{AddressExtension, MeshHeader, MESH_HEADER_BASE_SIZE};
pub use mesh_id::{IeMeshId, MAX_MESH_ID_LEN};
pub use peer_management::{IePeerManagement, PeerManagementSubtype, PmpReasonCode};
pub use perr::{FailedDestination, IePerr, MAX_PERR_DESTINATIONS};
pub use prep::IePrep;
pub use preq::{DestinationAddressUnit, DestinationFlags, IePreq, PreqFlags, MAX_PREQ_DESTINATIONS};
pub use rann::{IeRann, RannFlags};
pub use time::{to_tu, tu, TU};
