//! Peer link management for mesh.
//!
//! This crate provides the neighbor side of an 802.11s mesh point: the peer
//! link Open/Confirm/Close state machine, the peer management protocol that
//! owns every link of a mesh point, beacon timing reports with beacon
//! collision avoidance, and the airtime link metric fed to path selection.
//!
//! ## Features
//!
//! - **Sans-IO**: every entry point takes the current time; frames to send and
//!   link status changes are queued as [`PeerManagementEvent`]s
//! - **Timers as deadlines**: `next_timeout`/`handle_timeouts` drive retry,
//!   confirm, holding and beacon loss timers
//! - **Link metric**: transmission results feed a rolling failure average
//!   used by the airtime metric

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod beacon;
pub mod config;
pub mod error;
pub mod link_quality;
pub mod peer_link;
pub mod protocol;

// Re-export main types
pub use beacon::{MeshBeacon, DEFAULT_BEACON_INTERVAL};
pub use config::{AirtimeConfig, PeerLinkConfig, PeerManagementConfig};
pub use error::{PeeringError, Result};
pub use link_quality::{airtime_metric, LinkQuality};
pub use peer_link::{PeerLink, PeerLinkEvent, PeerLinkOutput, PeerLinkState};
pub use protocol::{PeerLinkFrame, PeerManagementEvent, PeerManagementProtocol, PeerManagementStats};
