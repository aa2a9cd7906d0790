//! Path selection errors

use thiserror::Error;

/// Errors returned by the HWMP engine.
///
/// Stale or malformed control elements and failed route requests are not
/// errors: the former are logged and counted, the latter are reported
/// through the route reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HwmpError {
    /// Interface index not registered
    #[error("Unknown interface: {0}")]
    UnknownInterface(u32),

    /// Interface index registered twice
    #[error("Interface {0} already registered")]
    DuplicateInterface(u32),

    /// Configuration rejected by validation
    #[error("Invalid HWMP configuration: {0}")]
    Config(String),
}

/// Result type for HWMP operations
pub type Result<T> = std::result::Result<T, HwmpError>;
