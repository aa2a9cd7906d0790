//! Route requests waiting for path discovery

use bytes::Bytes;
use mesh_routing::{DropReason, NextHop, Packet, RequestId, RouteReply};
use mesh_wire::MacAddress;
use std::collections::BTreeMap;
use tokio::sync::oneshot;
use tracing::debug;

/// One deferred route request
#[derive(Debug)]
pub(crate) struct QueuedRequest {
    pub id: RequestId,
    pub source: MacAddress,
    pub destination: MacAddress,
    pub packet: Packet,
    pub protocol_type: u16,
    reply: oneshot::Sender<RouteReply>,
}

impl QueuedRequest {
    pub fn new(
        id: RequestId,
        source: MacAddress,
        destination: MacAddress,
        packet: Packet,
        protocol_type: u16,
        reply: oneshot::Sender<RouteReply>,
    ) -> Self {
        Self {
            id,
            source,
            destination,
            packet,
            protocol_type,
            reply,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.packet.payload
    }

    /// Complete the request; false when the requester already went away
    pub fn resolve(self, outcome: Result<NextHop, DropReason>) -> bool {
        let (reply, sender) = self.split(outcome);
        sender.send(reply).is_ok()
    }

    /// Turn the request into a synchronous reply, abandoning the channel
    pub fn into_reply(self, outcome: Result<NextHop, DropReason>) -> RouteReply {
        self.split(outcome).0
    }

    fn split(
        self,
        outcome: Result<NextHop, DropReason>,
    ) -> (RouteReply, oneshot::Sender<RouteReply>) {
        let reply = RouteReply {
            outcome,
            packet: self.packet,
            source: self.source,
            destination: self.destination,
            protocol_type: self.protocol_type,
        };
        (reply, self.reply)
    }
}

/// Bounded queue keyed by destination and request id
#[derive(Debug)]
pub(crate) struct RequestQueue {
    capacity: usize,
    entries: BTreeMap<(MacAddress, RequestId), QueuedRequest>,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: BTreeMap::new(),
        }
    }

    /// Queue a request, handing it back when the queue is full
    pub fn push(&mut self, request: QueuedRequest) -> Result<(), QueuedRequest> {
        if self.entries.len() >= self.capacity {
            return Err(request);
        }
        self.entries
            .insert((request.destination, request.id), request);
        Ok(())
    }

    /// Remove every request for `destination`, oldest first
    pub fn take_for(&mut self, destination: MacAddress) -> Vec<QueuedRequest> {
        let keys: Vec<_> = self
            .entries
            .range((destination, RequestId::MIN)..=(destination, RequestId::MAX))
            .map(|(key, _)| *key)
            .collect();
        let taken: Vec<_> = keys
            .into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .collect();
        if !taken.is_empty() {
            debug!("Dequeued {} requests for {}", taken.len(), destination);
        }
        taken
    }

    /// Remove every request
    pub fn take_all(&mut self) -> Vec<QueuedRequest> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    /// True when a request for `destination` is waiting
    pub fn contains(&self, destination: MacAddress) -> bool {
        self.entries
            .range((destination, RequestId::MIN)..=(destination, RequestId::MAX))
            .next()
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: RequestId, destination: u32) -> (QueuedRequest, oneshot::Receiver<RouteReply>) {
        let (tx, rx) = oneshot::channel();
        let request = QueuedRequest::new(
            id,
            MacAddress::from_index(1),
            MacAddress::from_index(destination),
            Packet::new(Bytes::from_static(b"data")),
            0x0800,
            tx,
        );
        (request, rx)
    }

    #[test]
    fn test_bounded() {
        let mut queue = RequestQueue::new(2);
        assert!(queue.push(request(1, 5).0).is_ok());
        assert!(queue.push(request(2, 6).0).is_ok());
        let rejected = queue.push(request(3, 7).0).unwrap_err();
        assert_eq!(rejected.id, 3);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_take_for_destination() {
        let mut queue = RequestQueue::new(10);
        queue.push(request(1, 5).0).unwrap();
        queue.push(request(2, 6).0).unwrap();
        queue.push(request(3, 5).0).unwrap();

        let taken = queue.take_for(MacAddress::from_index(5));
        assert_eq!(taken.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 3]);
        assert!(!queue.contains(MacAddress::from_index(5)));
        assert!(queue.contains(MacAddress::from_index(6)));
        assert!(queue.take_for(MacAddress::from_index(5)).is_empty());
    }

    #[test]
    fn test_resolve_delivers_once() {
        let (request, mut rx) = request(1, 5);
        assert_eq!(request.payload().as_ref(), b"data");
        assert!(request.resolve(Err(DropReason::Shutdown)));
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.outcome, Err(DropReason::Shutdown));
        assert_eq!(reply.destination, MacAddress::from_index(5));
    }

    #[test]
    fn test_resolve_after_requester_left() {
        let (request, rx) = request(1, 5);
        drop(rx);
        assert!(!request.resolve(Err(DropReason::NoRoute)));
    }

    #[test]
    fn test_into_reply_keeps_packet() {
        let (request, _rx) = request(4, 5);
        let reply = request.into_reply(Err(DropReason::QueueFull));
        assert_eq!(reply.packet.payload.as_ref(), b"data");
        assert_eq!(reply.protocol_type, 0x0800);
    }
}
