//! Routing protocol contract seen by the forwarding layer

use crate::next_hop::NextHop;
use bytes::Bytes;
use mesh_wire::{MacAddress, MeshHeader};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;

/// Identifier of a deferred route request
pub type RequestId = u64;

/// Upper layer frame travelling through the mesh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Payload
    pub payload: Bytes,
    /// Mesh control header; absent for locally originated frames until routed
    pub header: Option<MeshHeader>,
    /// Neighbor the frame was received from, if it came from the mesh
    pub received_from: Option<MacAddress>,
}

impl Packet {
    /// Locally originated frame
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            header: None,
            received_from: None,
        }
    }

    /// Frame received from a neighbor
    pub fn from_mesh(payload: Bytes, header: MeshHeader, transmitter: MacAddress) -> Self {
        Self {
            payload,
            header: Some(header),
            received_from: Some(transmitter),
        }
    }
}

/// Reason for dropping a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// No route to destination
    NoRoute,
    /// TTL expired
    TtlExpired,
    /// Pending request queue is full
    QueueFull,
    /// Path discovery gave up
    DiscoveryTimeout,
    /// Broadcast frame already seen
    Duplicate,
    /// Frame from the mesh without a mesh header
    MissingHeader,
    /// Locally originated frame already carrying a mesh header
    UnexpectedHeader,
    /// Routing protocol shut down
    Shutdown,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::NoRoute => write!(f, "no route to destination"),
            DropReason::TtlExpired => write!(f, "TTL expired"),
            DropReason::QueueFull => write!(f, "request queue full"),
            DropReason::DiscoveryTimeout => write!(f, "path discovery timed out"),
            DropReason::Duplicate => write!(f, "duplicate frame"),
            DropReason::MissingHeader => write!(f, "missing mesh header"),
            DropReason::UnexpectedHeader => write!(f, "unexpected mesh header"),
            DropReason::Shutdown => write!(f, "routing shut down"),
        }
    }
}

/// Outcome of a route request for one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReply {
    /// Next hop, or why the frame was dropped
    pub outcome: Result<NextHop, DropReason>,
    /// The frame, with its mesh header filled in on success
    pub packet: Packet,
    /// Mesh source
    pub source: MacAddress,
    /// Mesh destination
    pub destination: MacAddress,
    /// Upper layer protocol
    pub protocol_type: u16,
}

impl RouteReply {
    /// True when the frame can be sent
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Route request waiting for path discovery
#[derive(Debug)]
pub struct PendingRoute {
    id: RequestId,
    destination: MacAddress,
    receiver: oneshot::Receiver<RouteReply>,
}

impl PendingRoute {
    /// Wrap the receiving side of a queued request
    pub fn new(
        id: RequestId,
        destination: MacAddress,
        receiver: oneshot::Receiver<RouteReply>,
    ) -> Self {
        Self {
            id,
            destination,
            receiver,
        }
    }

    /// Request id
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Destination being resolved
    pub fn destination(&self) -> MacAddress {
        self.destination
    }

    /// Reply if it is already available
    pub fn try_recv(&mut self) -> Option<RouteReply> {
        self.receiver.try_recv().ok()
    }

    /// Wait for the reply; `None` only if the routing protocol was dropped
    pub async fn recv(self) -> Option<RouteReply> {
        self.receiver.await.ok()
    }
}

/// Result of [`MeshL2Routing::request_route`]
#[derive(Debug)]
pub enum RouteRequest {
    /// Resolved synchronously: one reply per transmission (several for broadcast), or one failure
    Immediate(Vec<RouteReply>),
    /// Path discovery started; the reply arrives exactly once
    Deferred(PendingRoute),
}

/// What to do with a frame received from the mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reception {
    /// Addressed to this node: header stripped, hand to upper layers
    Deliver,
    /// Addressed elsewhere: keep the header and route it on
    Forward,
    /// Group addressed: deliver a copy and route it on
    DeliverAndForward,
    /// Discard
    Drop(DropReason),
}

impl Reception {
    /// True when upper layers get a copy
    pub fn is_local(&self) -> bool {
        matches!(self, Reception::Deliver | Reception::DeliverAndForward)
    }
}

/// Layer-2 mesh routing protocol used by the forwarding layer
pub trait MeshL2Routing {
    /// Find a next hop for `packet`.
    ///
    /// `source_interface` is the mesh point's own interface for locally
    /// originated frames, or the interface a transit frame arrived on.
    #[allow(clippy::too_many_arguments)]
    fn request_route(
        &mut self,
        source_interface: u32,
        source: MacAddress,
        destination: MacAddress,
        packet: Packet,
        protocol_type: u16,
        now: Duration,
    ) -> RouteRequest;

    /// Process the mesh header of a received frame
    fn remove_routing_stuff(
        &mut self,
        from_interface: u32,
        source: MacAddress,
        destination: MacAddress,
        packet: &mut Packet,
        protocol_type: u16,
    ) -> Reception;

    /// Peer link to `peer` on `interface` came up or went down
    fn peer_link_status(
        &mut self,
        mesh_point: MacAddress,
        peer: MacAddress,
        interface: u32,
        up: bool,
        now: Duration,
    );

    /// Earliest pending timer
    fn next_timeout(&self) -> Option<Duration>;

    /// Fire every timer due at `now`
    fn handle_timeouts(&mut self, now: Duration);

    /// Fail every pending request and cancel timers
    fn shutdown(&mut self);
}
