//! Scenario configuration for the mesh simulator.
//!
//! A scenario is read from a YAML file, then environment variables override
//! the run parameters, then command line arguments override both.

use anyhow::{bail, Context, Result};
use mesh_hwmp::HwmpConfig;
use mesh_peering::PeerManagementConfig;
use mesh_wire::time::humantime_serde;
use mesh_wire::{to_tu, tu};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Bytes of a flow payload taken by the flow id and the packet counter
pub const FLOW_HEADER_SIZE: usize = 8;

/// Node layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyConfig {
    /// Nodes in a chain, each linked to the next
    Line {
        /// Number of nodes
        nodes: usize,
    },
    /// Nodes on a grid, linked to their horizontal and vertical neighbors
    Grid {
        /// Grid rows
        rows: usize,
        /// Grid columns
        columns: usize,
    },
    /// Explicit list of links
    Custom {
        /// Number of nodes
        nodes: usize,
        /// Node index pairs in radio range of each other
        links: Vec<(usize, usize)>,
    },
}

impl Default for TopologyConfig {
    fn default() -> Self {
        TopologyConfig::Line { nodes: 3 }
    }
}

impl TopologyConfig {
    pub fn node_count(&self) -> usize {
        match self {
            TopologyConfig::Line { nodes } | TopologyConfig::Custom { nodes, .. } => *nodes,
            TopologyConfig::Grid { rows, columns } => rows * columns,
        }
    }

    /// Links as ordered index pairs
    pub fn links(&self) -> BTreeSet<(usize, usize)> {
        let pairs: Vec<(usize, usize)> = match self {
            TopologyConfig::Line { nodes } => (1..*nodes).map(|i| (i - 1, i)).collect(),
            TopologyConfig::Grid { rows, columns } => {
                let mut pairs = Vec::new();
                for row in 0..*rows {
                    for column in 0..*columns {
                        let index = row * columns + column;
                        if column + 1 < *columns {
                            pairs.push((index, index + 1));
                        }
                        if row + 1 < *rows {
                            pairs.push((index, index + columns));
                        }
                    }
                }
                pairs
            }
            TopologyConfig::Custom { links, .. } => links.clone(),
        };
        pairs
            .into_iter()
            .map(|(a, b)| (a.min(b), a.max(b)))
            .collect()
    }
}

/// Periodic data traffic between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Sending node
    pub source: usize,
    /// Receiving node; absent for broadcast
    #[serde(default)]
    pub destination: Option<usize>,
    /// First packet
    #[serde(with = "humantime_serde")]
    pub start: Duration,
    /// Spacing of packets
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Packets to send
    pub count: u32,
    /// Payload size in bytes
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
}

fn default_payload_size() -> usize {
    64
}

/// Radio link that stops carrying frames at a given time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFailureConfig {
    /// One end
    pub a: usize,
    /// Other end
    pub b: usize,
    /// Failure time
    #[serde(with = "humantime_serde")]
    pub at: Duration,
}

/// Simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed of every random stream in the run
    pub seed: u64,
    /// Simulated time to run
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Node layout
    pub topology: TopologyConfig,
    /// Node announcing itself as root
    pub root: Option<usize>,
    /// Probability that a frame is lost on a link
    pub loss: f64,
    /// Probability that a delivered frame arrives with a bad FCS
    pub corruption: f64,
    /// Delay between transmission and reception
    #[serde(with = "humantime_serde")]
    pub propagation_delay: Duration,
    /// Beacon interval of every node
    #[serde(with = "humantime_serde")]
    pub beacon_interval: Duration,
    /// Data traffic
    pub flows: Vec<FlowConfig>,
    /// Injected link failures
    pub link_failures: Vec<LinkFailureConfig>,
    /// Path selection parameters
    pub hwmp: HwmpConfig,
    /// Peering parameters
    pub peering: PeerManagementConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            duration: Duration::from_secs(10),
            topology: TopologyConfig::default(),
            root: None,
            loss: 0.0,
            corruption: 0.0,
            propagation_delay: Duration::from_micros(100),
            beacon_interval: tu(500),
            flows: Vec::new(),
            link_failures: Vec::new(),
            hwmp: HwmpConfig::default(),
            peering: PeerManagementConfig::default(),
        }
    }
}

impl SimConfig {
    /// Load a scenario file, then apply environment overrides.
    ///
    /// A missing file yields the default scenario.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => {
                let config: SimConfig = serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse scenario {:?}", path))?;
                info!("Loaded scenario from {:?}", path);
                config
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!("Scenario {:?} not found, using defaults", path);
                Self::default()
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read scenario {:?}", path))
            }
        };

        config.apply_environment_overrides();
        info!(
            "Scenario: {} nodes, {} flows, seed {}, duration {}",
            config.topology.node_count(),
            config.flows.len(),
            config.seed,
            humantime::format_duration(config.duration)
        );
        Ok(config)
    }

    /// Apply `MESH_SIM_*` environment variables
    pub fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; unparsable values are ignored with a warning
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("MESH_SIM_SEED") {
            match value.parse::<u64>() {
                Ok(seed) => {
                    self.seed = seed;
                    info!("Seed overridden by environment: {}", seed);
                }
                Err(_) => warn!("Ignoring MESH_SIM_SEED={}", value),
            }
        }

        if let Some(value) = lookup("MESH_SIM_DURATION") {
            match humantime::parse_duration(&value) {
                Ok(duration) => {
                    self.duration = duration;
                    info!("Duration overridden by environment: {}", value);
                }
                Err(_) => warn!("Ignoring MESH_SIM_DURATION={}", value),
            }
        }

        if let Some(value) = lookup("MESH_SIM_ROOT") {
            if value == "none" {
                self.root = None;
                info!("Root disabled by environment");
            } else {
                match value.parse::<usize>() {
                    Ok(root) => {
                        self.root = Some(root);
                        info!("Root overridden by environment: node {}", root);
                    }
                    Err(_) => warn!("Ignoring MESH_SIM_ROOT={}", value),
                }
            }
        }

        if let Some(value) = lookup("MESH_SIM_LOSS") {
            match value.parse::<f64>() {
                Ok(loss) => {
                    self.loss = loss;
                    info!("Loss overridden by environment: {}", loss);
                }
                Err(_) => warn!("Ignoring MESH_SIM_LOSS={}", value),
            }
        }
    }

    /// Check the scenario and the protocol configurations
    pub fn validate(&self) -> Result<()> {
        let nodes = self.topology.node_count();
        if nodes == 0 {
            bail!("topology has no nodes");
        }
        for (a, b) in self.topology.links() {
            if a == b || b >= nodes {
                bail!("invalid link {}-{} for {} nodes", a, b, nodes);
            }
        }
        if let Some(root) = self.root {
            if root >= nodes {
                bail!("root {} out of range ({} nodes)", root, nodes);
            }
        }
        if !(0.0..=1.0).contains(&self.loss) || !(0.0..=1.0).contains(&self.corruption) {
            bail!("loss and corruption must be probabilities");
        }
        if self.beacon_interval.is_zero() || to_tu(self.beacon_interval) > u32::from(u16::MAX) {
            bail!("beacon interval must be between 1 and 65535 TU");
        }
        for (index, flow) in self.flows.iter().enumerate() {
            if flow.source >= nodes || flow.destination.is_some_and(|d| d >= nodes) {
                bail!("flow {} has an endpoint out of range", index);
            }
            if flow.destination == Some(flow.source) {
                bail!("flow {} sends to itself", index);
            }
            if flow.count > 1 && flow.interval.is_zero() {
                bail!("flow {} needs a non-zero interval", index);
            }
            if flow.payload_size < FLOW_HEADER_SIZE {
                bail!("flow {} payload must be at least {} bytes", index, FLOW_HEADER_SIZE);
            }
        }
        for failure in &self.link_failures {
            let pair = (failure.a.min(failure.b), failure.a.max(failure.b));
            if !self.topology.links().contains(&pair) {
                bail!("link failure {}-{} names no link", failure.a, failure.b);
            }
        }
        self.hwmp.validate().context("Invalid hwmp section")?;
        self.peering.validate().context("Invalid peering section")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_hwmp::RootMode;
    use std::collections::BTreeMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.topology.node_count(), 3);
        assert_eq!(config.beacon_interval, Duration::from_millis(512));
        assert_eq!(config.root, None);
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
seed: 42
duration: 20s
root: 0
topology:
  kind: grid
  rows: 2
  columns: 3
flows:
  - source: 0
    destination: 5
    start: 2s
    interval: 250ms
    count: 8
link_failures:
  - a: 1
    b: 2
    at: 10s
hwmp:
  root_mode: proactive_preq
  rann_interval: 2s
peering:
  mesh_id: lab
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let mut config: SimConfig = serde_yaml::from_str(yaml_content).unwrap();
        config.apply_overrides(|_| None);
        let loaded = SimConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.seed, config.seed);

        assert_eq!(config.seed, 42);
        assert_eq!(config.duration, Duration::from_secs(20));
        assert_eq!(config.topology.node_count(), 6);
        assert_eq!(config.topology.links().len(), 7);
        assert_eq!(config.flows[0].destination, Some(5));
        assert_eq!(config.flows[0].payload_size, 64);
        assert_eq!(config.link_failures[0].at, Duration::from_secs(10));
        assert_eq!(config.hwmp.root_mode, RootMode::ProactivePreq);
        assert_eq!(config.hwmp.rann_interval, Duration::from_secs(2));
        assert_eq!(config.hwmp.max_ttl, 32);
        assert_eq!(config.peering.mesh_id, "lab");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SimConfig::load_from_file(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.topology, TopologyConfig::default());
    }

    #[test]
    fn test_malformed_file_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"topology: [not, a, topology]").unwrap();
        assert!(SimConfig::load_from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: BTreeMap<&str, &str> = [
            ("MESH_SIM_SEED", "9"),
            ("MESH_SIM_DURATION", "1m"),
            ("MESH_SIM_ROOT", "2"),
            ("MESH_SIM_LOSS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let mut config = SimConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.seed, 9);
        assert_eq!(config.duration, Duration::from_secs(60));
        assert_eq!(config.root, Some(2));
        assert_eq!(config.loss, 0.0);

        config.apply_overrides(|key| (key == "MESH_SIM_ROOT").then(|| "none".to_string()));
        assert_eq!(config.root, None);
    }

    #[test]
    fn test_validate_rejects_bad_scenarios() {
        let mut config = SimConfig {
            root: Some(3),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.root = None;
        config.link_failures.push(LinkFailureConfig {
            a: 0,
            b: 2,
            at: Duration::from_secs(1),
        });
        assert!(config.validate().is_err());

        config.link_failures.clear();
        config.flows.push(FlowConfig {
            source: 1,
            destination: Some(1),
            start: Duration::ZERO,
            interval: Duration::from_secs(1),
            count: 1,
            payload_size: 64,
        });
        assert!(config.validate().is_err());

        config.flows.clear();
        config.hwmp.max_ttl = 0;
        assert!(config.validate().is_err());
    }
}
