//! Peer link and peer management configuration

use crate::error::{PeeringError, Result};
use mesh_wire::time::humantime_serde;
use mesh_wire::{tu, MAX_MESH_ID_LEN};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timers and retry bounds of one peer link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerLinkConfig {
    /// Interval between Open retransmissions
    #[serde(with = "humantime_serde")]
    pub retry_timeout: Duration,
    /// Time spent in HOLDING before the link is released
    #[serde(with = "humantime_serde")]
    pub holding_timeout: Duration,
    /// Time to wait for the peer's Open after its Confirm
    #[serde(with = "humantime_serde")]
    pub confirm_timeout: Duration,
    /// Open retransmissions before giving up
    pub max_retries: u16,
    /// Missed beacons before the link is cancelled
    pub max_beacon_loss: u16,
}

impl Default for PeerLinkConfig {
    fn default() -> Self {
        Self {
            retry_timeout: tu(40),
            holding_timeout: tu(40),
            confirm_timeout: tu(40),
            max_retries: 4,
            max_beacon_loss: 2,
        }
    }
}

impl PeerLinkConfig {
    /// Check timers and bounds
    pub fn validate(&self) -> Result<()> {
        if self.retry_timeout.is_zero()
            || self.holding_timeout.is_zero()
            || self.confirm_timeout.is_zero()
        {
            return Err(PeeringError::Config(
                "peer link timeouts must be non-zero".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(PeeringError::Config("max_retries must be at least 1".to_string()));
        }
        if self.max_beacon_loss == 0 {
            return Err(PeeringError::Config(
                "max_beacon_loss must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parameters of the airtime link metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AirtimeConfig {
    /// Channel access and protocol overhead per frame
    #[serde(with = "humantime_serde")]
    pub overhead: Duration,
    /// Size of the reference test frame in bits
    pub test_frame_bits: u32,
    /// Data rate in bits per second
    pub rate_bps: u64,
    /// Weight of the newest sample in the failure average
    pub ewma_weight: f64,
}

impl Default for AirtimeConfig {
    fn default() -> Self {
        Self {
            overhead: Duration::from_micros(185),
            test_frame_bits: 8192,
            rate_bps: 6_000_000,
            ewma_weight: 0.1,
        }
    }
}

impl AirtimeConfig {
    /// Check the rate and averaging weight
    pub fn validate(&self) -> Result<()> {
        if self.rate_bps == 0 {
            return Err(PeeringError::Config("rate_bps must be non-zero".to_string()));
        }
        if !(self.ewma_weight > 0.0 && self.ewma_weight <= 1.0) {
            return Err(PeeringError::Config(format!(
                "ewma_weight must be in (0, 1], got {}",
                self.ewma_weight
            )));
        }
        Ok(())
    }
}

/// Peer management protocol configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerManagementConfig {
    /// Mesh ID advertised in beacons and peer link frames
    pub mesh_id: String,
    /// Upper bound on established peer links over all interfaces
    pub max_number_of_peer_links: u8,
    /// Largest beacon shift in time units
    pub max_beacon_shift: u16,
    /// Shift our beacons away from neighbors' beacons
    pub enable_beacon_collision_avoidance: bool,
    /// Per link timers
    pub link: PeerLinkConfig,
    /// Link metric parameters
    pub airtime: AirtimeConfig,
}

impl Default for PeerManagementConfig {
    fn default() -> Self {
        Self {
            mesh_id: "mesh".to_string(),
            max_number_of_peer_links: 32,
            max_beacon_shift: 15,
            enable_beacon_collision_avoidance: true,
            link: PeerLinkConfig::default(),
            airtime: AirtimeConfig::default(),
        }
    }
}

impl PeerManagementConfig {
    /// Check the whole configuration
    pub fn validate(&self) -> Result<()> {
        if self.mesh_id.len() > MAX_MESH_ID_LEN {
            return Err(PeeringError::MeshId(self.mesh_id.clone()));
        }
        if self.max_number_of_peer_links == 0 {
            return Err(PeeringError::Config(
                "max_number_of_peer_links must be at least 1".to_string(),
            ));
        }
        if self.max_beacon_shift == 0 && self.enable_beacon_collision_avoidance {
            return Err(PeeringError::Config(
                "max_beacon_shift must be non-zero when collision avoidance is enabled"
                    .to_string(),
            ));
        }
        self.link.validate()?;
        self.airtime.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PeerManagementConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.link.retry_timeout, Duration::from_micros(40 * 1024));
        assert_eq!(config.max_number_of_peer_links, 32);
    }

    #[test]
    fn test_long_mesh_id_rejected() {
        let config = PeerManagementConfig {
            mesh_id: "x".repeat(33),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PeeringError::MeshId(_))));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let mut config = PeerManagementConfig::default();
        config.link.max_retries = 0;
        assert!(matches!(config.validate(), Err(PeeringError::Config(_))));
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: PeerManagementConfig =
            serde_json::from_str(r#"{"mesh_id":"lab","link":{"retry_timeout":"80ms"}}"#).unwrap();
        assert_eq!(config.mesh_id, "lab");
        assert_eq!(config.link.retry_timeout, Duration::from_millis(80));
        assert_eq!(config.link.max_retries, 4);
        assert_eq!(config.max_beacon_shift, 15);
    }
}
