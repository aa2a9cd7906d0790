//! One simulated mesh point: peer management and HWMP on a single radio interface.

use crate::{mesh_debug, mesh_info};
use anyhow::{Context, Result};
use bytes::{Buf, Bytes};
use mesh_hwmp::{HwmpProtocol, HwmpStats, DEFAULT_LINK_METRIC};
use mesh_peering::{
    MeshBeacon, PeerLinkFrame, PeerLinkState, PeerManagementEvent, PeerManagementProtocol,
    PeerManagementStats,
};
use mesh_routing::{
    MeshL2Routing, Packet, PendingRoute, Reception, RouteReply, RouteRequest, RouteSnapshot,
};
use mesh_wire::{tu, Frame, FrameBody, MacAddress, MeshHeader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Interface index of the mesh point itself
pub const MESH_POINT_INTERFACE: u32 = 0;
/// Interface index of the radio
pub const RADIO_INTERFACE: u32 = 1;
/// Protocol type carried by simulated traffic
pub const SIM_PROTOCOL: u16 = 0x88b5;

/// Address of node `index`
pub fn node_address(index: usize) -> MacAddress {
    MacAddress::from_index(index as u32 + 1)
}

/// Data plane counters of one mesh point
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStats {
    /// Frames originated here
    pub originated: u64,
    /// Frames relayed for other nodes
    pub forwarded: u64,
    /// Frames delivered to this node
    pub delivered: u64,
    /// Frames dropped, by reason
    pub dropped: BTreeMap<String, u64>,
    /// Deliveries per flow
    pub received_per_flow: BTreeMap<u32, u64>,
}

/// Final state of one mesh point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub index: usize,
    pub address: String,
    pub peers: Vec<String>,
    /// Every peer link, established or not
    pub links: Vec<(String, PeerLinkState)>,
    pub routes: Vec<RouteSnapshot>,
    pub data: DataStats,
    pub hwmp: HwmpStats,
    pub peering: PeerManagementStats,
}

#[derive(Debug)]
pub struct MeshPoint {
    index: usize,
    address: MacAddress,
    peering: PeerManagementProtocol,
    hwmp: HwmpProtocol,
    beacon_interval: Duration,
    next_beacon: Duration,
    pending: Vec<PendingRoute>,
    outgoing: Vec<Frame>,
    data: DataStats,
}

impl MeshPoint {
    pub fn new(
        index: usize,
        peering: mesh_peering::PeerManagementConfig,
        hwmp: mesh_hwmp::HwmpConfig,
        beacon_interval: Duration,
        first_beacon: Duration,
    ) -> Result<Self> {
        let address = node_address(index);
        let mut peering = PeerManagementProtocol::new(address, peering)
            .with_context(|| format!("Peer management of node {}", index))?;
        peering.add_interface(RADIO_INTERFACE, address)?;
        let mut hwmp = HwmpProtocol::new(address, MESH_POINT_INTERFACE, hwmp)
            .with_context(|| format!("HWMP of node {}", index))?;
        hwmp.add_interface(RADIO_INTERFACE, address)?;
        Ok(Self {
            index,
            address,
            peering,
            hwmp,
            beacon_interval,
            next_beacon: first_beacon,
            pending: Vec::new(),
            outgoing: Vec::new(),
            data: DataStats::default(),
        })
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn hwmp(&self) -> &HwmpProtocol {
        &self.hwmp
    }

    pub fn peering(&self) -> &PeerManagementProtocol {
        &self.peering
    }

    pub fn data(&self) -> &DataStats {
        &self.data
    }

    /// Reseed both protocols from `stream`; returns the number of streams used
    pub fn assign_streams(&mut self, stream: u64) -> u64 {
        let used = self.peering.assign_streams(stream);
        used + self.hwmp.assign_streams(stream + used)
    }

    pub fn set_root(&mut self, now: Duration) {
        mesh_info!("sim", "Node {} ({}) becomes root", self.index, self.address);
        self.hwmp.set_root(now);
    }

    pub fn next_timeout(&self) -> Option<Duration> {
        [
            self.peering.next_timeout(),
            self.hwmp.next_timeout(),
            Some(self.next_beacon),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Fire timers and send the beacon if due
    pub fn handle_timeouts(&mut self, now: Duration) -> Result<()> {
        self.peering.handle_timeouts(now);
        self.hwmp.handle_timeouts(now);
        if self.next_beacon <= now {
            let beacon = self
                .peering
                .prepare_beacon(RADIO_INTERFACE, self.beacon_interval, now)?;
            self.outgoing.push(Frame::new(
                MacAddress::BROADCAST,
                self.address,
                FrameBody::Beacon {
                    beacon_interval: beacon.beacon_interval_tu(),
                    elements: beacon.elements(),
                },
            ));
            self.next_beacon = now + self.beacon_interval;
        }
        Ok(())
    }

    /// Hand a frame received from the medium to the right protocol
    pub fn receive(&mut self, frame: Frame, now: Duration) -> Result<()> {
        let transmitter = frame.transmitter;
        match frame.body {
            FrameBody::Beacon {
                beacon_interval,
                elements,
            } => {
                let beacon = MeshBeacon::from_elements(
                    RADIO_INTERFACE,
                    transmitter,
                    beacon_interval,
                    elements,
                );
                self.peering.receive_beacon(beacon, now)?;
            }
            FrameBody::PeerLink {
                aid,
                mesh_point,
                elements,
            } => {
                match PeerLinkFrame::from_elements(
                    RADIO_INTERFACE,
                    transmitter,
                    mesh_point,
                    aid,
                    elements,
                ) {
                    Some(frame) => self.peering.receive_peer_link_frame(frame, now)?,
                    None => mesh_debug!(
                        "sim",
                        "Node {}: incomplete peer link frame from {}",
                        self.index,
                        transmitter
                    ),
                }
            }
            FrameBody::PathSelection { elements } => {
                self.hwmp
                    .receive_path_selection(RADIO_INTERFACE, transmitter, elements, now)?;
            }
            FrameBody::Data {
                source,
                destination,
                protocol,
                header,
                payload,
            } => self.receive_data(transmitter, source, destination, protocol, header, payload, now),
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn receive_data(
        &mut self,
        transmitter: MacAddress,
        source: MacAddress,
        destination: MacAddress,
        protocol: u16,
        header: MeshHeader,
        payload: Bytes,
        now: Duration,
    ) {
        let mut packet = Packet::from_mesh(payload, header, transmitter);
        let reception = self.hwmp.remove_routing_stuff(
            RADIO_INTERFACE,
            source,
            destination,
            &mut packet,
            protocol,
        );
        if reception.is_local() {
            self.data.delivered += 1;
            if let Some(flow) = flow_id(&packet.payload) {
                *self.data.received_per_flow.entry(flow).or_default() += 1;
            }
        }
        match reception {
            Reception::Forward | Reception::DeliverAndForward => {
                self.data.forwarded += 1;
                let request =
                    self.hwmp
                        .request_route(RADIO_INTERFACE, source, destination, packet, protocol, now);
                self.route_request(request);
            }
            Reception::Drop(reason) => self.count_drop(reason.to_string()),
            Reception::Deliver => {}
        }
    }

    /// Originate a data frame
    pub fn send_data(&mut self, destination: MacAddress, payload: Bytes, now: Duration) {
        self.data.originated += 1;
        let request = self.hwmp.request_route(
            MESH_POINT_INTERFACE,
            self.address,
            destination,
            Packet::new(payload),
            SIM_PROTOCOL,
            now,
        );
        self.route_request(request);
    }

    fn route_request(&mut self, request: RouteRequest) {
        match request {
            RouteRequest::Immediate(replies) => {
                for reply in replies {
                    self.route_reply(reply);
                }
            }
            RouteRequest::Deferred(pending) => self.pending.push(pending),
        }
    }

    fn route_reply(&mut self, reply: RouteReply) {
        let next_hop = match reply.outcome {
            Ok(next_hop) => next_hop,
            Err(reason) => {
                mesh_debug!(
                    "sim",
                    "Node {}: frame {} -> {} dropped: {}",
                    self.index,
                    reply.source,
                    reply.destination,
                    reason
                );
                self.count_drop(reason.to_string());
                return;
            }
        };
        let Some(header) = reply.packet.header else {
            self.count_drop("missing mesh header".to_string());
            return;
        };
        self.outgoing.push(Frame::new(
            next_hop.retransmitter,
            self.address,
            FrameBody::Data {
                source: reply.source,
                destination: reply.destination,
                protocol: reply.protocol_type,
                header,
                payload: reply.packet.payload,
            },
        ));
    }

    fn count_drop(&mut self, reason: String) {
        *self.data.dropped.entry(reason).or_default() += 1;
    }

    /// Record the fate of a unicast frame and refresh the link metric
    pub fn transmission_result(&mut self, peer: MacAddress, acknowledged: bool) {
        if acknowledged {
            self.peering.transmission_success(RADIO_INTERFACE, peer);
        } else {
            self.peering.transmission_failure(RADIO_INTERFACE, peer);
        }
        if let Some(metric) = self.peering.link_metric(RADIO_INTERFACE, peer) {
            // the peer may have just left the neighbor set; nothing to update then
            let _ = self.hwmp.set_link_metric(RADIO_INTERFACE, peer, metric);
        }
    }

    /// Collect everything ready to go on the air
    pub fn take_outgoing(&mut self, now: Duration) -> Vec<Frame> {
        for event in self.peering.drain_events() {
            match event {
                PeerManagementEvent::SendPeerLinkFrame(frame) => {
                    self.outgoing.push(Frame::new(
                        frame.peer,
                        self.address,
                        FrameBody::PeerLink {
                            aid: frame.aid,
                            mesh_point: frame.mesh_point,
                            elements: frame.elements(),
                        },
                    ));
                }
                PeerManagementEvent::LinkStatus {
                    interface,
                    peer,
                    mesh_point,
                    up,
                } => {
                    self.hwmp
                        .peer_link_status(mesh_point, peer, interface, up, now);
                    if up {
                        let metric = self
                            .peering
                            .link_metric(interface, peer)
                            .unwrap_or(DEFAULT_LINK_METRIC);
                        let _ = self.hwmp.set_link_metric(interface, peer, metric);
                    }
                }
                PeerManagementEvent::BeaconShift { shift_tu, .. } => {
                    let shift = tu(shift_tu.unsigned_abs());
                    self.next_beacon = if shift_tu >= 0 {
                        self.next_beacon + shift
                    } else {
                        self.next_beacon.saturating_sub(shift).max(now)
                    };
                    mesh_debug!(
                        "sim",
                        "Node {}: beacon shifted by {} TU",
                        self.index,
                        shift_tu
                    );
                }
            }
        }

        for transmission in self.hwmp.drain_transmissions() {
            self.outgoing.push(Frame::new(
                transmission.receiver,
                self.address,
                FrameBody::PathSelection {
                    elements: vec![transmission.element],
                },
            ));
        }

        let mut ready = Vec::new();
        self.pending.retain_mut(|pending| match pending.try_recv() {
            Some(reply) => {
                ready.push(reply);
                false
            }
            None => true,
        });
        for reply in ready {
            self.route_reply(reply);
        }

        std::mem::take(&mut self.outgoing)
    }

    /// Stop path selection; queued requests fail
    pub fn shutdown(&mut self, now: Duration) -> Vec<Frame> {
        self.hwmp.shutdown();
        self.take_outgoing(now)
    }

    pub fn report(&self, now: Duration) -> NodeReport {
        NodeReport {
            index: self.index,
            address: self.address.to_string(),
            peers: self
                .peering
                .get_peers(RADIO_INTERFACE)
                .iter()
                .map(ToString::to_string)
                .collect(),
            links: self
                .peering
                .link_states(RADIO_INTERFACE)
                .into_iter()
                .map(|(peer, state)| (peer.to_string(), state))
                .collect(),
            routes: self.hwmp.routing_table().snapshot(now),
            data: self.data.clone(),
            hwmp: self.hwmp.stats().clone(),
            peering: self.peering.stats().clone(),
        }
    }
}

/// Flow id carried in the first four payload bytes
pub fn flow_id(payload: &Bytes) -> Option<u32> {
    (payload.len() >= 4).then(|| payload.clone().get_u32_le())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_hwmp::HwmpConfig;
    use mesh_peering::PeerManagementConfig;

    fn mesh_point(index: usize) -> MeshPoint {
        MeshPoint::new(
            index,
            PeerManagementConfig::default(),
            HwmpConfig::default(),
            tu(100),
            Duration::from_millis(10),
        )
        .unwrap()
    }

    /// Deliver frames back and forth until both sides are quiet
    fn exchange(a: &mut MeshPoint, b: &mut MeshPoint, now: Duration) {
        loop {
            let from_a = a.take_outgoing(now);
            let from_b = b.take_outgoing(now);
            if from_a.is_empty() && from_b.is_empty() {
                break;
            }
            for frame in from_a {
                if frame.receiver.is_group() || frame.receiver == b.address() {
                    b.receive(frame, now).unwrap();
                }
            }
            for frame in from_b {
                if frame.receiver.is_group() || frame.receiver == a.address() {
                    a.receive(frame, now).unwrap();
                }
            }
        }
    }

    #[test]
    fn test_beacon_schedule() {
        let mut node = mesh_point(0);
        assert_eq!(node.next_timeout(), Some(Duration::from_millis(10)));
        node.handle_timeouts(Duration::from_millis(10)).unwrap();
        let frames = node.take_outgoing(Duration::from_millis(10));
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0].body, FrameBody::Beacon { .. }));
        assert_eq!(
            node.next_timeout(),
            Some(Duration::from_millis(10) + tu(100))
        );
    }

    #[test]
    fn test_beacons_establish_peer_link_and_route() {
        let mut a = mesh_point(0);
        let mut b = mesh_point(1);
        let now = Duration::from_millis(10);
        a.handle_timeouts(now).unwrap();
        exchange(&mut a, &mut b, now);

        assert!(a.peering().is_active_link(RADIO_INTERFACE, b.address()));
        assert!(b.peering().is_active_link(RADIO_INTERFACE, a.address()));
        assert_eq!(a.hwmp().neighbors(RADIO_INTERFACE), vec![b.address()]);
        assert_eq!(
            a.report(now).links,
            vec![(b.address().to_string(), PeerLinkState::Estab)]
        );

        a.send_data(b.address(), Bytes::from_static(&[7, 0, 0, 0, 1, 0, 0, 0]), now);
        exchange(&mut a, &mut b, now);
        assert_eq!(a.data().originated, 1);
        assert_eq!(b.data().delivered, 1);
        assert_eq!(b.data().received_per_flow.get(&7), Some(&1));
        assert!(a
            .hwmp()
            .routing_table()
            .lookup_reactive(b.address(), now)
            .is_some());
    }

    #[test]
    fn test_shutdown_drops_queued_frames() {
        let mut node = mesh_point(0);
        node.send_data(node_address(5), Bytes::from_static(b"payload!"), Duration::ZERO);
        let frames = node.take_outgoing(Duration::ZERO);
        assert!(frames
            .iter()
            .all(|f| matches!(f.body, FrameBody::PathSelection { .. })));
        let frames = node.shutdown(Duration::ZERO);
        assert!(frames.is_empty());
        assert_eq!(node.data().dropped.values().sum::<u64>(), 1);
    }

    #[test]
    fn test_flow_id() {
        assert_eq!(flow_id(&Bytes::from_static(&[3, 0, 0, 0, 9])), Some(3));
        assert_eq!(flow_id(&Bytes::from_static(&[3, 0])), None);
    }
}
