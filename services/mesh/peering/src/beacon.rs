//! Mesh beacon contents and beacon collision detection

use mesh_wire::{
    to_tu, tu, BeaconTimingUnit, Element, IeBeaconTiming, IeConfiguration, IeMeshId, MacAddress,
    TU,
};
use std::time::Duration;

/// Beacon interval assumed for a peer heard only through peer link frames
pub const DEFAULT_BEACON_INTERVAL: Duration = Duration::from_secs(1);

/// Beacon information relevant to peering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshBeacon {
    /// Interface the beacon was sent or received on
    pub interface: u32,
    /// Transmitting interface address
    pub transmitter: MacAddress,
    /// Beacon interval
    pub beacon_interval: Duration,
    /// Advertised mesh ID; absent for non-mesh beacons
    pub mesh_id: Option<IeMeshId>,
    /// Advertised mesh configuration
    pub config: Option<IeConfiguration>,
    /// Neighbor beacon timing report
    pub timing: Option<IeBeaconTiming>,
}

impl MeshBeacon {
    /// Collect the peering elements of a received beacon
    pub fn from_elements(
        interface: u32,
        transmitter: MacAddress,
        beacon_interval_tu: u16,
        elements: Vec<Element>,
    ) -> Self {
        let mut beacon = Self {
            interface,
            transmitter,
            beacon_interval: tu(u32::from(beacon_interval_tu)),
            mesh_id: None,
            config: None,
            timing: None,
        };
        for element in elements {
            match element {
                Element::MeshId(id) => beacon.mesh_id = Some(id),
                Element::Configuration(config) => beacon.config = Some(config),
                Element::BeaconTiming(timing) => beacon.timing = Some(timing),
                _ => {}
            }
        }
        beacon
    }

    /// Beacon interval in time units, as carried in the beacon body
    pub fn beacon_interval_tu(&self) -> u16 {
        u16::try_from(to_tu(self.beacon_interval)).unwrap_or(u16::MAX)
    }

    /// Elements to put in the beacon body
    pub fn elements(&self) -> Vec<Element> {
        let mut elements = Vec::with_capacity(3);
        if let Some(id) = &self.mesh_id {
            elements.push(Element::MeshId(id.clone()));
        }
        if let Some(config) = self.config {
            elements.push(Element::Configuration(config));
        }
        if let Some(timing) = &self.timing {
            elements.push(Element::BeaconTiming(timing.clone()));
        }
        elements
    }

    /// Whether the beacon belongs to our mesh and speaks our path selection
    pub fn is_compatible_with(&self, mesh_id: &IeMeshId, config: &IeConfiguration) -> bool {
        match (&self.mesh_id, &self.config) {
            (Some(id), Some(theirs)) => id == mesh_id && theirs.is_compatible(config),
            _ => false,
        }
    }
}

/// Last beacon heard from a neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NeighbourBeacon {
    pub aid: u16,
    pub reference_tbtt: Duration,
    pub beacon_interval: Duration,
}

impl NeighbourBeacon {
    /// Reports older than three intervals are dropped from our timing element
    pub fn is_stale(&self, now: Duration) -> bool {
        self.reference_tbtt + self.beacon_interval * 3 < now
    }
}

/// Our own beacon schedule on one interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OwnBeacon {
    pub last: Duration,
    pub interval: Duration,
}

impl OwnBeacon {
    pub fn next_tbtt(&self) -> Duration {
        self.last + self.interval
    }
}

fn same_interval(a: Duration, b: Duration) -> bool {
    to_tu(a) == to_tu(b)
}

/// True when a neighbor beaconing every `interval` since `last` hits the same TU as `own_next`
pub fn tbtt_collides(own_next: Duration, last: Duration, interval: Duration) -> bool {
    let period = interval.as_micros();
    if period == 0 {
        return false;
    }
    let phase = (own_next.as_micros() % period + period - last.as_micros() % period) % period;
    phase.min(period - phase) < TU.as_micros()
}

/// Same check against a beacon timing report, whose times wrap at 16 bits of 256 µs
pub fn unit_collides(own_next: Duration, own_interval: Duration, unit: &BeaconTimingUnit) -> bool {
    if !same_interval(unit.beacon_interval_time(), own_interval) {
        return false;
    }
    let period = u32::from(unit.beacon_interval()) * 4;
    if period == 0 {
        return false;
    }
    let own = ((own_next.as_micros() >> 8) & 0xffff) as u16;
    let phase = u32::from(own.wrapping_sub(unit.last_beacon())) % period;
    phase.min(period - phase) < 4
}
