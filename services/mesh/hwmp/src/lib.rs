//! Hybrid Wireless Mesh Protocol (HWMP) path selection for mesh.
//!
//! This crate implements the routing protocol of an 802.11s mesh point on top
//! of the route table in `mesh-routing` and the information elements in
//! `mesh-wire`:
//!
//! - **Reactive discovery**: PREQ/PREP exchanges with retries, intermediate
//!   replies and per interface rate limiting
//! - **Path maintenance**: PERR on link loss or missing transit paths,
//!   propagated to precursors
//! - **Proactive tree**: a root announces itself with RANN or proactive PREQ
//! - **Data plane hooks**: mesh header sequence numbers, TTL handling and
//!   broadcast duplicate suppression through [`mesh_routing::MeshL2Routing`]
//!
//! The engine is sans-IO. Callers pass the current time to every entry point,
//! poll [`HwmpProtocol::next_timeout`](mesh_routing::MeshL2Routing::next_timeout)
//! and forward [`Transmission`]s to the air.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
mod interface;
pub mod protocol;
mod queue;
pub mod stats;

// Re-export main types
pub use config::{HwmpConfig, RootMode};
pub use error::{HwmpError, Result};
pub use interface::DEFAULT_LINK_METRIC;
pub use protocol::{HwmpProtocol, Transmission};
pub use stats::{HwmpStats, InterfaceStats};
