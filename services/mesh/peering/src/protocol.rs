//! Peer management protocol.
//!
//! Owns every [`PeerLink`] of a mesh point, demultiplexes peer link frames and
//! beacons to them, keeps the per-interface neighbor beacon table used for
//! beacon timing reports and collision avoidance, and turns link state changes
//! into link up/down notifications for path selection.

use crate::beacon::{
    tbtt_collides, unit_collides, MeshBeacon, NeighbourBeacon, OwnBeacon, DEFAULT_BEACON_INTERVAL,
};
use crate::config::PeerManagementConfig;
use crate::error::{PeeringError, Result};
use crate::peer_link::{PeerLink, PeerLinkOutput, PeerLinkState};
use mesh_wire::{
    Element, IeBeaconTiming, IeConfiguration, IeMeshId, IePeerManagement, MacAddress,
    MeshCapability, PmpReasonCode,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Peer link management frame, sent or received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerLinkFrame {
    /// Interface the frame goes out on or came in on
    pub interface: u32,
    /// Receiver of an outgoing frame, transmitter of an incoming one
    pub peer: MacAddress,
    /// Mesh point address of the sender
    pub mesh_point: MacAddress,
    /// Association id the sender assigned to the receiver
    pub aid: u16,
    /// Peering management element
    pub pm: IePeerManagement,
    /// Sender's mesh configuration
    pub config: IeConfiguration,
    /// Sender's mesh ID
    pub mesh_id: IeMeshId,
}

impl PeerLinkFrame {
    /// Pick the peering elements out of a received frame body
    pub fn from_elements(
        interface: u32,
        peer: MacAddress,
        mesh_point: MacAddress,
        aid: u16,
        elements: Vec<Element>,
    ) -> Option<Self> {
        let mut pm = None;
        let mut config = None;
        let mut mesh_id = None;
        for element in elements {
            match element {
                Element::PeerManagement(ie) => pm = Some(ie),
                Element::Configuration(ie) => config = Some(ie),
                Element::MeshId(ie) => mesh_id = Some(ie),
                _ => {}
            }
        }
        Some(Self {
            interface,
            peer,
            mesh_point,
            aid,
            pm: pm?,
            config: config?,
            mesh_id: mesh_id?,
        })
    }

    /// Elements of the frame body
    pub fn elements(&self) -> Vec<Element> {
        vec![
            Element::PeerManagement(self.pm),
            Element::Configuration(self.config),
            Element::MeshId(self.mesh_id.clone()),
        ]
    }
}

/// Notification from the peer management protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerManagementEvent {
    /// Transmit a peer link frame
    SendPeerLinkFrame(PeerLinkFrame),
    /// A peer link reached or left ESTAB
    LinkStatus {
        /// Local interface
        interface: u32,
        /// Peer interface address
        peer: MacAddress,
        /// Peer mesh point address
        mesh_point: MacAddress,
        /// True when the link came up
        up: bool,
    },
    /// Move our next beacon by a number of time units
    BeaconShift {
        /// Interface whose beacon moves
        interface: u32,
        /// Signed shift in time units
        shift_tu: i32,
    },
}

/// Peer management counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerManagementStats {
    /// Peer links created
    pub links_total: u64,
    /// Links that reached ESTAB
    pub links_opened: u64,
    /// Links that left ESTAB
    pub links_closed: u64,
    /// Beacon shifts applied
    pub beacon_shifts: u64,
    /// Frames or beacons with an incompatible mesh ID or configuration
    pub config_mismatches: u64,
    /// Opens refused because of the peer limit
    pub opens_rejected: u64,
    /// Peer link frames sent
    pub frames_sent: u64,
    /// Peer link frames received
    pub frames_received: u64,
}

#[derive(Debug)]
struct InterfaceState {
    address: MacAddress,
    links: BTreeMap<MacAddress, PeerLink>,
    neighbour_beacons: BTreeMap<MacAddress, NeighbourBeacon>,
    own_beacon: Option<OwnBeacon>,
    shift_pending: bool,
}

impl InterfaceState {
    fn new(address: MacAddress) -> Self {
        Self {
            address,
            links: BTreeMap::new(),
            neighbour_beacons: BTreeMap::new(),
            own_beacon: None,
            shift_pending: false,
        }
    }
}

/// Peer management protocol of one mesh point
#[derive(Debug)]
pub struct PeerManagementProtocol {
    address: MacAddress,
    config: PeerManagementConfig,
    mesh_id: IeMeshId,
    interfaces: BTreeMap<u32, InterfaceState>,
    last_local_link_id: u16,
    last_assoc_id: u16,
    number_of_active_peers: usize,
    rng: StdRng,
    stats: PeerManagementStats,
    events: Vec<PeerManagementEvent>,
}

impl PeerManagementProtocol {
    /// Create the protocol for mesh point `address`
    pub fn new(address: MacAddress, config: PeerManagementConfig) -> Result<Self> {
        config.validate()?;
        let mesh_id = IeMeshId::new(&config.mesh_id)
            .map_err(|_| PeeringError::MeshId(config.mesh_id.clone()))?;
        let mut seed = [0u8; 8];
        seed[..6].copy_from_slice(&address.octets());
        Ok(Self {
            address,
            config,
            mesh_id,
            interfaces: BTreeMap::new(),
            last_local_link_id: 0,
            last_assoc_id: 0,
            number_of_active_peers: 0,
            rng: StdRng::seed_from_u64(u64::from_le_bytes(seed)),
            stats: PeerManagementStats::default(),
            events: Vec::new(),
        })
    }

    /// Register an interface
    pub fn add_interface(&mut self, interface: u32, address: MacAddress) -> Result<()> {
        if self.interfaces.contains_key(&interface) {
            return Err(PeeringError::DuplicateInterface(interface));
        }
        self.interfaces.insert(interface, InterfaceState::new(address));
        info!("Peer management on interface {} ({})", interface, address);
        Ok(())
    }

    /// Mesh point address
    pub fn address(&self) -> MacAddress {
        self.address
    }

    /// Configuration in use
    pub fn config(&self) -> &PeerManagementConfig {
        &self.config
    }

    /// Mesh ID we advertise and accept
    pub fn get_mesh_id(&self) -> &IeMeshId {
        &self.mesh_id
    }

    /// Change the mesh ID
    pub fn set_mesh_id(&mut self, mesh_id: &str) -> Result<()> {
        self.mesh_id =
            IeMeshId::new(mesh_id).map_err(|_| PeeringError::MeshId(mesh_id.to_string()))?;
        self.config.mesh_id = mesh_id.to_string();
        Ok(())
    }

    /// Reseed the random stream; returns the number of streams used
    pub fn assign_streams(&mut self, stream: u64) -> u64 {
        self.rng = StdRng::seed_from_u64(stream);
        1
    }

    /// Mesh configuration element we advertise
    pub fn get_configuration(&self) -> IeConfiguration {
        let mut config = IeConfiguration::default();
        config.set_neighbor_count(self.number_of_active_peers);
        if !self.may_accept_links() {
            config.capability.remove(MeshCapability::ACCEPT_PEER_LINKS);
        }
        config
    }

    /// Established peers on `interface`
    pub fn get_peers(&self, interface: u32) -> Vec<MacAddress> {
        self.interfaces
            .get(&interface)
            .map(|state| {
                state
                    .links
                    .values()
                    .filter(|link| link.is_established())
                    .map(PeerLink::peer)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the link to `peer` on `interface` is established
    pub fn is_active_link(&self, interface: u32, peer: MacAddress) -> bool {
        self.link(interface, peer)
            .map(PeerLink::is_established)
            .unwrap_or(false)
    }

    /// Established links over all interfaces
    pub fn get_number_of_links(&self) -> usize {
        self.number_of_active_peers
    }

    /// Link to `peer` on `interface`, in any state
    pub fn link(&self, interface: u32, peer: MacAddress) -> Option<&PeerLink> {
        self.interfaces.get(&interface)?.links.get(&peer)
    }

    /// State of every link on `interface`
    pub fn link_states(&self, interface: u32) -> Vec<(MacAddress, PeerLinkState)> {
        self.interfaces
            .get(&interface)
            .map(|state| {
                state
                    .links
                    .values()
                    .map(|link| (link.peer(), link.state()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Counters
    pub fn stats(&self) -> &PeerManagementStats {
        &self.stats
    }

    /// Take the queued notifications
    pub fn drain_events(&mut self) -> Vec<PeerManagementEvent> {
        std::mem::take(&mut self.events)
    }

    /// Beacon timing element for `interface`, forgetting neighbors silent for three intervals
    pub fn get_beacon_timing_element(
        &mut self,
        interface: u32,
        now: Duration,
    ) -> Result<IeBeaconTiming> {
        let state = self
            .interfaces
            .get_mut(&interface)
            .ok_or(PeeringError::UnknownInterface(interface))?;
        state
            .neighbour_beacons
            .retain(|_, neighbour| !neighbour.is_stale(now));
        let mut timing = IeBeaconTiming::new();
        for neighbour in state.neighbour_beacons.values() {
            if !timing.add_neighbours_timing_unit(
                neighbour.aid,
                neighbour.reference_tbtt,
                neighbour.beacon_interval,
            ) {
                break;
            }
        }
        Ok(timing)
    }

    /// Record that our beacon went out on `interface`
    pub fn notify_beacon_sent(
        &mut self,
        interface: u32,
        beacon_interval: Duration,
        now: Duration,
    ) -> Result<()> {
        let state = self
            .interfaces
            .get_mut(&interface)
            .ok_or(PeeringError::UnknownInterface(interface))?;
        state.own_beacon = Some(OwnBeacon {
            last: now,
            interval: beacon_interval,
        });
        state.shift_pending = false;
        Ok(())
    }

    /// Contents of our next beacon on `interface`; records it as sent at `now`
    pub fn prepare_beacon(
        &mut self,
        interface: u32,
        beacon_interval: Duration,
        now: Duration,
    ) -> Result<MeshBeacon> {
        let timing = self.get_beacon_timing_element(interface, now)?;
        self.notify_beacon_sent(interface, beacon_interval, now)?;
        let transmitter = self
            .interfaces
            .get(&interface)
            .map(|state| state.address)
            .ok_or(PeeringError::UnknownInterface(interface))?;
        Ok(MeshBeacon {
            interface,
            transmitter,
            beacon_interval,
            mesh_id: Some(self.mesh_id.clone()),
            config: Some(self.get_configuration()),
            timing: Some(timing),
        })
    }

    /// Process a beacon received from a neighbor
    pub fn receive_beacon(&mut self, beacon: MeshBeacon, now: Duration) -> Result<()> {
        let interface = beacon.interface;
        let peer = beacon.transmitter;
        self.fill_beacon_info(interface, peer, now, beacon.beacon_interval)?;
        if self.is_own_interface(peer) {
            return Ok(());
        }
        if !beacon.is_compatible_with(&self.mesh_id, &self.get_configuration()) {
            if beacon.mesh_id.as_ref() == Some(&self.mesh_id) {
                self.stats.config_mismatches += 1;
                self.configuration_mismatch(interface, peer, now);
            }
            return Ok(());
        }

        if self.config.enable_beacon_collision_avoidance {
            self.avoid_beacon_collision(&beacon, now);
        }

        let timing = beacon.timing.unwrap_or_default();
        if let Some(link) = self.link_mut(interface, peer) {
            link.set_beacon_timing_element(timing);
            link.set_beacon_information(now, beacon.beacon_interval, now);
            return Ok(());
        }
        if !self.should_send_open() {
            debug!("Not opening a link to {}: peer limit reached", peer);
            return Ok(());
        }
        self.initiate_link(
            interface,
            peer,
            MacAddress::BROADCAST,
            now,
            beacon.beacon_interval,
            now,
        );
        if let Some(link) = self.link_mut(interface, peer) {
            link.set_beacon_timing_element(timing);
            link.mlme_active_peer_link_open(now);
        }
        self.flush_link(interface, peer);
        Ok(())
    }

    /// Process a peer link frame received from a neighbor
    pub fn receive_peer_link_frame(&mut self, frame: PeerLinkFrame, now: Duration) -> Result<()> {
        let interface = frame.interface;
        let peer = frame.peer;
        if !self.interfaces.contains_key(&interface) {
            return Err(PeeringError::UnknownInterface(interface));
        }
        self.stats.frames_received += 1;

        if frame.mesh_id != self.mesh_id || !frame.config.is_compatible(&self.get_configuration())
        {
            self.stats.config_mismatches += 1;
            self.configuration_mismatch(interface, peer, now);
            return Ok(());
        }

        let pm = frame.pm;
        if pm.subtype_is_open() {
            let established = self.is_active_link(interface, peer);
            let reject = if !established && !self.may_accept_links() {
                self.stats.opens_rejected += 1;
                Some(PmpReasonCode::MaxPeers)
            } else {
                None
            };
            if self.link(interface, peer).is_none() {
                let (last_beacon, interval) = self
                    .interfaces
                    .get(&interface)
                    .and_then(|state| state.neighbour_beacons.get(&peer))
                    .map(|n| (n.reference_tbtt, n.beacon_interval))
                    .unwrap_or((now, DEFAULT_BEACON_INTERVAL));
                self.initiate_link(interface, peer, frame.mesh_point, last_beacon, interval, now);
            }
            if let Some(link) = self.link_mut(interface, peer) {
                match reject {
                    None => link.open_accept(pm.local_link_id(), frame.config, frame.mesh_point, now),
                    Some(reason) => link.open_reject(
                        pm.local_link_id(),
                        frame.config,
                        frame.mesh_point,
                        reason,
                        now,
                    ),
                }
            }
        } else {
            let Some(link) = self.link_mut(interface, peer) else {
                debug!(
                    "{:?} from {} without a peer link, ignored",
                    pm.subtype(),
                    peer
                );
                return Ok(());
            };
            if pm.subtype_is_confirm() {
                link.confirm_accept(
                    pm.local_link_id(),
                    pm.peer_link_id(),
                    frame.aid,
                    frame.config,
                    frame.mesh_point,
                    now,
                );
            } else {
                link.close(pm.local_link_id(), pm.peer_link_id(), pm.reason_code(), now);
            }
        }
        self.flush_link(interface, peer);
        Ok(())
    }

    /// Cancel the link to a peer whose mesh ID or configuration does not match ours
    pub fn configuration_mismatch(&mut self, interface: u32, peer: MacAddress, now: Duration) {
        warn!(
            "Configuration mismatch with {} on interface {}",
            peer, interface
        );
        if let Some(link) = self.link_mut(interface, peer) {
            link.mlme_cancel_peer_link(PmpReasonCode::CapabilityPolicyViolation, now);
            self.flush_link(interface, peer);
        }
    }

    /// Locally cancel the link to `peer`
    pub fn cancel_link(
        &mut self,
        interface: u32,
        peer: MacAddress,
        reason: PmpReasonCode,
        now: Duration,
    ) -> Result<()> {
        if !self.interfaces.contains_key(&interface) {
            return Err(PeeringError::UnknownInterface(interface));
        }
        if let Some(link) = self.link_mut(interface, peer) {
            link.mlme_cancel_peer_link(reason, now);
            self.flush_link(interface, peer);
        }
        Ok(())
    }

    /// A frame to `peer` was acknowledged
    pub fn transmission_success(&mut self, interface: u32, peer: MacAddress) {
        let weight = self.config.airtime.ewma_weight;
        if let Some(link) = self.link_mut(interface, peer) {
            link.quality_mut().record_success(weight);
        }
    }

    /// A frame to `peer` was lost
    pub fn transmission_failure(&mut self, interface: u32, peer: MacAddress) {
        let weight = self.config.airtime.ewma_weight;
        if let Some(link) = self.link_mut(interface, peer) {
            link.quality_mut().record_failure(weight);
        }
    }

    /// Airtime cost of the established link to `peer`
    pub fn link_metric(&self, interface: u32, peer: MacAddress) -> Option<u32> {
        self.link(interface, peer)
            .filter(|link| link.is_established())
            .map(|link| link.quality().airtime_metric(&self.config.airtime))
    }

    /// Earliest timer over all links
    pub fn next_timeout(&self) -> Option<Duration> {
        self.interfaces
            .values()
            .flat_map(|state| state.links.values())
            .filter_map(PeerLink::next_timeout)
            .min()
    }

    /// Fire every link timer due at `now`
    pub fn handle_timeouts(&mut self, now: Duration) {
        let due: Vec<(u32, MacAddress)> = self
            .interfaces
            .iter()
            .flat_map(|(interface, state)| {
                state
                    .links
                    .values()
                    .filter(move |link| link.next_timeout().is_some_and(|at| at <= now))
                    .map(move |link| (*interface, link.peer()))
            })
            .collect();
        for (interface, peer) in due {
            if let Some(link) = self.link_mut(interface, peer) {
                link.handle_timeouts(now);
            }
            self.flush_link(interface, peer);
        }
    }

    fn link_mut(&mut self, interface: u32, peer: MacAddress) -> Option<&mut PeerLink> {
        self.interfaces.get_mut(&interface)?.links.get_mut(&peer)
    }

    fn is_own_interface(&self, address: MacAddress) -> bool {
        address == self.address || self.interfaces.values().any(|state| state.address == address)
    }

    fn should_send_open(&self) -> bool {
        self.may_accept_links()
    }

    fn may_accept_links(&self) -> bool {
        self.number_of_active_peers < usize::from(self.config.max_number_of_peer_links)
    }

    fn next_link_id(&mut self) -> u16 {
        self.last_local_link_id = self.last_local_link_id.wrapping_add(1);
        if self.last_local_link_id == 0 {
            self.last_local_link_id = 1;
        }
        self.last_local_link_id
    }

    fn next_assoc_id(&mut self) -> u16 {
        self.last_assoc_id = if self.last_assoc_id >= 0xff {
            1
        } else {
            self.last_assoc_id + 1
        };
        self.last_assoc_id
    }

    fn fill_beacon_info(
        &mut self,
        interface: u32,
        peer: MacAddress,
        reference_tbtt: Duration,
        beacon_interval: Duration,
    ) -> Result<u16> {
        if !self.interfaces.contains_key(&interface) {
            return Err(PeeringError::UnknownInterface(interface));
        }
        let known = self
            .interfaces
            .get(&interface)
            .and_then(|state| state.neighbour_beacons.get(&peer))
            .map(|n| n.aid);
        let aid = match known {
            Some(aid) => aid,
            None => self.next_assoc_id(),
        };
        if let Some(state) = self.interfaces.get_mut(&interface) {
            state.neighbour_beacons.insert(
                peer,
                NeighbourBeacon {
                    aid,
                    reference_tbtt,
                    beacon_interval,
                },
            );
        }
        Ok(aid)
    }

    fn initiate_link(
        &mut self,
        interface: u32,
        peer: MacAddress,
        peer_mesh_point: MacAddress,
        last_beacon: Duration,
        beacon_interval: Duration,
        now: Duration,
    ) {
        let known = self
            .interfaces
            .get(&interface)
            .and_then(|state| state.neighbour_beacons.get(&peer))
            .map(|neighbour| neighbour.aid);
        let aid = match known {
            Some(aid) => aid,
            None => match self.fill_beacon_info(interface, peer, last_beacon, beacon_interval) {
                Ok(aid) => aid,
                Err(_) => return,
            },
        };
        let link_id = self.next_link_id();
        let mut link = PeerLink::new(
            interface,
            peer,
            peer_mesh_point,
            link_id,
            aid,
            self.config.link.clone(),
        );
        link.set_beacon_information(last_beacon, beacon_interval, now);
        if let Some(state) = self.interfaces.get_mut(&interface) {
            debug!(
                "New peer link {} to {} on interface {} (aid {})",
                link_id, peer, interface, aid
            );
            state.links.insert(peer, link);
            self.stats.links_total += 1;
        }
    }

    fn avoid_beacon_collision(&mut self, beacon: &MeshBeacon, now: Duration) {
        let interface = beacon.interface;
        let Some(state) = self.interfaces.get(&interface) else {
            return;
        };
        let Some(own) = state.own_beacon else {
            return;
        };
        if state.shift_pending {
            return;
        }
        let own_next = own.next_tbtt();
        let direct = mesh_wire::to_tu(beacon.beacon_interval) == mesh_wire::to_tu(own.interval)
            && tbtt_collides(own_next, now, beacon.beacon_interval);
        // Our own entry in the peer's report carries the aid the peer gave us
        let reported = match (state.links.get(&beacon.transmitter), &beacon.timing) {
            (Some(link), Some(timing)) if link.peer_aid() != 0 => {
                let own_aid = (link.peer_aid() & 0xff) as u8;
                timing
                    .units()
                    .iter()
                    .filter(|unit| unit.aid() != own_aid)
                    .any(|unit| unit_collides(own_next, own.interval, unit))
            }
            _ => false,
        };
        if !direct && !reported {
            return;
        }

        let max_shift = i32::from(self.config.max_beacon_shift);
        let magnitude = self.rng.gen_range(1..=max_shift);
        let shift_tu = if self.rng.gen_bool(0.5) {
            magnitude
        } else {
            -magnitude
        };
        let shift = mesh_wire::tu(shift_tu.unsigned_abs());
        let shifted_next = if shift_tu < 0 {
            own_next.checked_sub(shift)
        } else {
            Some(own_next + shift)
        };
        if !shifted_next.is_some_and(|at| at > now) {
            debug!("Beacon shift of {} TU would move into the past, skipped", shift_tu);
            return;
        }
        info!(
            "Beacon collision with {} on interface {}, shifting by {} TU",
            beacon.transmitter, interface, shift_tu
        );
        if let Some(state) = self.interfaces.get_mut(&interface) {
            state.shift_pending = true;
        }
        self.stats.beacon_shifts += 1;
        self.events
            .push(PeerManagementEvent::BeaconShift { interface, shift_tu });
    }

    fn flush_link(&mut self, interface: u32, peer: MacAddress) {
        let Some(state) = self.interfaces.get_mut(&interface) else {
            return;
        };
        let Some(link) = state.links.get_mut(&peer) else {
            return;
        };
        let outputs = link.drain_outputs();
        let peer_mesh_point = link.peer_mesh_point();
        if link.is_idle() {
            debug!("Releasing idle peer link to {} on interface {}", peer, interface);
            state.links.remove(&peer);
        }

        for output in outputs {
            match output {
                PeerLinkOutput::Send { pm, aid } => {
                    self.stats.frames_sent += 1;
                    let frame = PeerLinkFrame {
                        interface,
                        peer,
                        mesh_point: self.address,
                        aid,
                        pm,
                        config: self.get_configuration(),
                        mesh_id: self.mesh_id.clone(),
                    };
                    self.events.push(PeerManagementEvent::SendPeerLinkFrame(frame));
                }
                PeerLinkOutput::StateChanged { old, new } => {
                    let up = new == PeerLinkState::Estab && old != PeerLinkState::Estab;
                    let down = old == PeerLinkState::Estab && new != PeerLinkState::Estab;
                    if !up && !down {
                        continue;
                    }
                    if up {
                        self.number_of_active_peers += 1;
                        self.stats.links_opened += 1;
                    } else {
                        self.number_of_active_peers = self.number_of_active_peers.saturating_sub(1);
                        self.stats.links_closed += 1;
                    }
                    info!(
                        "Peer link to {} (mesh point {}) on interface {} is {}",
                        peer,
                        peer_mesh_point,
                        interface,
                        if up { "up" } else { "down" }
                    );
                    self.events.push(PeerManagementEvent::LinkStatus {
                        interface,
                        peer,
                        mesh_point: peer_mesh_point,
                        up,
                    });
                }
            }
        }
    }
}
