//! HWMP route table, next hop lookups and the layer-2 routing contract for mesh.
//!
//! This crate provides the routing state shared by mesh path selection: the
//! reactive and proactive route table with its precursor lists, lookup
//! results, and the [`MeshL2Routing`] trait the forwarding layer drives.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod next_hop;
pub mod router;
pub mod table;

pub use next_hop::*;
pub use router::*;
pub use table::*;
