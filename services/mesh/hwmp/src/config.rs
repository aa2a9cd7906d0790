//! HWMP configuration

use crate::error::{HwmpError, Result};
use mesh_wire::time::humantime_serde;
use mesh_wire::tu;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a root mesh point announces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootMode {
    /// Periodic root announcements
    #[default]
    Rann,
    /// Periodic proactive PREQ to the broadcast address
    ProactivePreq,
}

/// HWMP timers, thresholds and flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HwmpConfig {
    /// Upper bound of the random delay before a root's first announcement
    #[serde(with = "humantime_serde")]
    pub random_start: Duration,
    /// Route requests waiting for path discovery
    pub max_queue_size: usize,
    /// PREQ retransmissions before discovery gives up
    pub max_preq_retries: u8,
    /// Time for a frame to cross the whole mesh
    #[serde(with = "humantime_serde")]
    pub net_diameter_traversal_time: Duration,
    /// Minimum spacing of PREQs originated on one interface
    #[serde(with = "humantime_serde")]
    pub preq_min_interval: Duration,
    /// Minimum spacing of PERRs originated on one interface
    #[serde(with = "humantime_serde")]
    pub perr_min_interval: Duration,
    /// Lifetime of the proactive path
    #[serde(with = "humantime_serde")]
    pub active_root_timeout: Duration,
    /// Lifetime of reactive paths
    #[serde(with = "humantime_serde")]
    pub active_path_timeout: Duration,
    /// Proactive PREQ period of a root
    #[serde(with = "humantime_serde")]
    pub path_to_root_interval: Duration,
    /// RANN period of a root
    #[serde(with = "humantime_serde")]
    pub rann_interval: Duration,
    /// TTL of originated control elements and data frames
    pub max_ttl: u8,
    /// Precursor count from which PERRs are broadcast
    pub unicast_perr_threshold: usize,
    /// Neighbor count from which PREQs are broadcast
    pub unicast_preq_threshold: usize,
    /// Neighbor count from which broadcast data uses the broadcast address
    pub unicast_data_threshold: usize,
    /// Destination only flag of originated PREQs
    pub do_flag: bool,
    /// Reply and forward flag of originated PREQs
    pub rf_flag: bool,
    /// Announcement used when acting as root
    pub root_mode: RootMode,
    /// Proactive PREQs ask receivers not to reply
    pub need_not_prep: bool,
}

impl Default for HwmpConfig {
    fn default() -> Self {
        Self {
            random_start: Duration::from_millis(100),
            max_queue_size: 255,
            max_preq_retries: 3,
            net_diameter_traversal_time: tu(100),
            preq_min_interval: tu(100),
            perr_min_interval: tu(100),
            active_root_timeout: tu(5000),
            active_path_timeout: tu(5000),
            path_to_root_interval: tu(2000),
            rann_interval: tu(5000),
            max_ttl: 32,
            unicast_perr_threshold: 32,
            unicast_preq_threshold: 1,
            unicast_data_threshold: 1,
            do_flag: false,
            rf_flag: true,
            root_mode: RootMode::Rann,
            need_not_prep: true,
        }
    }
}

impl HwmpConfig {
    /// Check timers and thresholds
    pub fn validate(&self) -> Result<()> {
        if self.max_ttl == 0 {
            return Err(HwmpError::Config("max_ttl must be at least 1".to_string()));
        }
        if self.max_queue_size == 0 {
            return Err(HwmpError::Config(
                "max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.net_diameter_traversal_time.is_zero() {
            return Err(HwmpError::Config(
                "net_diameter_traversal_time must be non-zero".to_string(),
            ));
        }
        if self.active_path_timeout.is_zero() || self.active_root_timeout.is_zero() {
            return Err(HwmpError::Config("path timeouts must be non-zero".to_string()));
        }
        if self.rann_interval.is_zero() || self.path_to_root_interval.is_zero() {
            return Err(HwmpError::Config(
                "root announcement intervals must be non-zero".to_string(),
            ));
        }
        if self.unicast_preq_threshold == 0
            || self.unicast_perr_threshold == 0
            || self.unicast_data_threshold == 0
        {
            return Err(HwmpError::Config(
                "unicast thresholds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
