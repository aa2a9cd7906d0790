//! Peer management errors

use thiserror::Error;

/// Errors returned by the peer management protocol.
///
/// Protocol anomalies (link id mismatches, incompatible configurations,
/// rejected opens) are not errors: they are logged and counted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeeringError {
    /// Interface index not registered
    #[error("Unknown interface: {0}")]
    UnknownInterface(u32),

    /// Interface index registered twice
    #[error("Interface {0} already registered")]
    DuplicateInterface(u32),

    /// Mesh ID longer than 32 octets
    #[error("Invalid mesh ID: {0}")]
    MeshId(String),

    /// Configuration rejected by validation
    #[error("Invalid peering configuration: {0}")]
    Config(String),
}

/// Result type for peer management operations
pub type Result<T> = std::result::Result<T, PeeringError>;
