//! Discrete-event mesh simulation.
//!
//! Scheduled events (frame receptions, traffic, link failures) sit in a
//! time-ordered heap; protocol timers are polled from the mesh points. The
//! earliest of both runs next, so the whole run is deterministic for a seed.

use crate::config::{SimConfig, FLOW_HEADER_SIZE};
use crate::logging::SimClock;
use crate::medium::{Medium, MediumStats};
use crate::mesh_point::{node_address, MeshPoint, NodeReport};
use crate::{mesh_info, mesh_warn};
use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use mesh_wire::{Frame, MacAddress};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
enum EventKind {
    Reception { node: usize, bytes: Bytes },
    Flow { flow: usize, sequence: u32 },
    LinkFailure { a: usize, b: usize },
}

#[derive(Debug)]
struct Scheduled {
    at: Duration,
    order: u64,
    kind: EventKind,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.order).cmp(&(other.at, other.order))
    }
}

/// Per flow outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowReport {
    pub source: usize,
    pub destination: Option<usize>,
    pub sent: u64,
    pub delivered: u64,
}

/// Result of a run, printed as JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimReport {
    pub seed: u64,
    pub duration_ms: u64,
    pub medium: MediumStats,
    pub flows: Vec<FlowReport>,
    pub nodes: Vec<NodeReport>,
}

pub struct Simulation {
    config: SimConfig,
    nodes: Vec<MeshPoint>,
    medium: Medium,
    queue: BinaryHeap<Reverse<Scheduled>>,
    order: u64,
    now: Duration,
    clock: SimClock,
    sent: Vec<u64>,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let count = config.topology.node_count();

        let mut nodes = Vec::with_capacity(count);
        let mut stream = config.seed;
        for index in 0..count {
            let first_beacon = Duration::from_micros(
                rng.gen_range(0..config.beacon_interval.as_micros().max(1)) as u64,
            );
            let mut node = MeshPoint::new(
                index,
                config.peering.clone(),
                config.hwmp.clone(),
                config.beacon_interval,
                first_beacon,
            )?;
            stream = stream.wrapping_add(node.assign_streams(stream));
            nodes.push(node);
        }

        let medium = Medium::new(
            (0..count).map(node_address).collect(),
            config.topology.links(),
            config.loss,
            config.corruption,
            rng.gen(),
        );

        let mut simulation = Self {
            sent: vec![0; config.flows.len()],
            config,
            nodes,
            medium,
            queue: BinaryHeap::new(),
            order: 0,
            now: Duration::ZERO,
            clock: SimClock::default(),
        };
        for (flow, config) in simulation.config.flows.clone().iter().enumerate() {
            if config.count > 0 {
                simulation.schedule(config.start, EventKind::Flow { flow, sequence: 0 });
            }
        }
        for failure in simulation.config.link_failures.clone() {
            simulation.schedule(
                failure.at,
                EventKind::LinkFailure {
                    a: failure.a,
                    b: failure.b,
                },
            );
        }
        if let Some(root) = simulation.config.root {
            simulation.nodes[root].set_root(Duration::ZERO);
        }
        Ok(simulation)
    }

    /// Publish simulated time to `clock` as the run advances
    pub fn with_clock(mut self, clock: SimClock) -> Self {
        clock.set(self.now);
        self.clock = clock;
        self
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn node(&self, index: usize) -> &MeshPoint {
        &self.nodes[index]
    }

    fn schedule(&mut self, at: Duration, kind: EventKind) {
        self.order += 1;
        self.queue.push(Reverse(Scheduled {
            at,
            order: self.order,
            kind,
        }));
    }

    fn next_event_time(&self) -> Option<Duration> {
        let queued = self.queue.peek().map(|Reverse(event)| event.at);
        let timers = self.nodes.iter().filter_map(MeshPoint::next_timeout).min();
        queued.into_iter().chain(timers).min()
    }

    /// Run every event up to `until` (inclusive)
    pub fn run_until(&mut self, until: Duration) -> Result<()> {
        while let Some(at) = self.next_event_time() {
            if at > until {
                break;
            }
            self.step(at)?;
        }
        self.now = self.now.max(until);
        self.clock.set(self.now);
        Ok(())
    }

    /// Run the configured duration and shut down.
    ///
    /// With `realtime` set, simulated time is paced against the wall clock.
    pub async fn run(&mut self, realtime: bool) -> Result<SimReport> {
        let duration = self.config.duration;
        mesh_info!(
            "sim",
            "Running {} nodes for {}",
            self.nodes.len(),
            humantime::format_duration(duration)
        );
        let started = tokio::time::Instant::now();
        while let Some(at) = self.next_event_time() {
            if at > duration {
                break;
            }
            if realtime {
                tokio::time::sleep_until(started + at).await;
            }
            self.step(at)?;
        }
        self.now = self.now.max(duration);
        self.clock.set(self.now);
        self.shutdown()?;
        let report = self.report();
        mesh_info!(
            "sim",
            "Finished: {} frames on the air, {} delivered, {} lost",
            report.medium.transmitted,
            report.medium.delivered,
            report.medium.lost
        );
        Ok(report)
    }

    fn step(&mut self, at: Duration) -> Result<()> {
        self.now = self.now.max(at);
        self.clock.set(self.now);
        let due = self
            .queue
            .peek()
            .is_some_and(|Reverse(event)| event.at <= self.now);
        if due {
            if let Some(Reverse(event)) = self.queue.pop() {
                return self.handle_event(event.kind);
            }
        }
        for index in 0..self.nodes.len() {
            if self.nodes[index]
                .next_timeout()
                .is_some_and(|deadline| deadline <= self.now)
            {
                self.nodes[index].handle_timeouts(self.now)?;
                self.flush(index)?;
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, kind: EventKind) -> Result<()> {
        match kind {
            EventKind::Reception { node, bytes } => match Frame::decode(bytes) {
                Ok(frame) => {
                    self.nodes[node]
                        .receive(frame, self.now)
                        .with_context(|| format!("Node {} failed to process a frame", node))?;
                    self.flush(node)?;
                }
                Err(err) => {
                    debug!("Node {} discarded a frame: {}", node, err);
                    self.medium.record_rejected();
                }
            },
            EventKind::Flow { flow, sequence } => {
                let config = self.config.flows[flow].clone();
                let destination = config
                    .destination
                    .map_or(MacAddress::BROADCAST, node_address);
                let payload = flow_payload(flow as u32, sequence, config.payload_size);
                self.nodes[config.source].send_data(destination, payload, self.now);
                self.sent[flow] += 1;
                self.flush(config.source)?;
                if sequence + 1 < config.count {
                    self.schedule(
                        self.now + config.interval,
                        EventKind::Flow {
                            flow,
                            sequence: sequence + 1,
                        },
                    );
                }
            }
            EventKind::LinkFailure { a, b } => {
                if self.medium.fail_link(a, b) {
                    mesh_warn!("sim", "Link {}-{} failed at {:?}", a, b, self.now);
                }
            }
        }
        Ok(())
    }

    /// Put everything node `index` has ready on the air
    fn flush(&mut self, index: usize) -> Result<()> {
        for frame in self.nodes[index].take_outgoing(self.now) {
            let bytes = frame
                .encode()
                .with_context(|| format!("Node {} built an invalid frame", index))?;
            let outcome = self.medium.transmit(index, frame.receiver, &bytes);
            let at = self.now + self.config.propagation_delay;
            for (node, bytes) in outcome.receptions {
                self.schedule(at, EventKind::Reception { node, bytes });
            }
            if !frame.receiver.is_group() {
                self.nodes[index].transmission_result(frame.receiver, outcome.acknowledged);
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        for index in 0..self.nodes.len() {
            let frames = self.nodes[index].shutdown(self.now);
            if !frames.is_empty() {
                debug!("Node {}: {} frames left unsent at shutdown", index, frames.len());
            }
        }
        Ok(())
    }

    pub fn report(&self) -> SimReport {
        let flows = self
            .config
            .flows
            .iter()
            .enumerate()
            .map(|(index, flow)| {
                let flow_id = index as u32;
                let delivered = self
                    .nodes
                    .iter()
                    .filter_map(|node| node.data().received_per_flow.get(&flow_id))
                    .sum();
                FlowReport {
                    source: flow.source,
                    destination: flow.destination,
                    sent: self.sent[index],
                    delivered,
                }
            })
            .collect();
        SimReport {
            seed: self.config.seed,
            duration_ms: self.now.as_millis() as u64,
            medium: self.medium.stats().clone(),
            flows,
            nodes: self.nodes.iter().map(|node| node.report(self.now)).collect(),
        }
    }
}

/// Flow id, packet counter, zero padding
fn flow_payload(flow: u32, sequence: u32, size: usize) -> Bytes {
    let mut payload = BytesMut::with_capacity(size.max(FLOW_HEADER_SIZE));
    payload.put_u32_le(flow);
    payload.put_u32_le(sequence);
    payload.resize(size.max(FLOW_HEADER_SIZE), 0);
    payload.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FlowConfig, LinkFailureConfig, TopologyConfig};
    use crate::mesh_point::RADIO_INTERFACE;

    fn line(nodes: usize) -> SimConfig {
        SimConfig {
            seed: 3,
            topology: TopologyConfig::Line { nodes },
            ..Default::default()
        }
    }

    fn flow(source: usize, destination: usize, start_ms: u64, count: u32) -> FlowConfig {
        FlowConfig {
            source,
            destination: Some(destination),
            start: Duration::from_millis(start_ms),
            interval: Duration::from_millis(200),
            count,
            payload_size: 32,
        }
    }

    #[test]
    fn test_flow_payload() {
        let payload = flow_payload(2, 5, 16);
        assert_eq!(payload.len(), 16);
        assert_eq!(&payload[..8], &[2, 0, 0, 0, 5, 0, 0, 0]);
    }

    #[test]
    fn test_clock_follows_simulated_time() {
        let clock = SimClock::default();
        let mut sim = Simulation::new(line(2)).unwrap().with_clock(clock.clone());
        sim.run_until(Duration::from_millis(750)).unwrap();
        assert_eq!(clock.get(), Duration::from_millis(750));
    }

    #[test]
    fn test_peer_links_form() {
        let mut sim = Simulation::new(line(3)).unwrap();
        sim.run_until(Duration::from_secs(2)).unwrap();
        let middle = sim.node(1);
        assert_eq!(middle.peering().get_peers(RADIO_INTERFACE).len(), 2);
        assert_eq!(
            middle.hwmp().neighbors(RADIO_INTERFACE),
            vec![node_address(0), node_address(2)]
        );
    }

    #[test]
    fn test_discovery_over_two_hops() {
        let mut config = line(3);
        config.flows.push(flow(0, 2, 3000, 5));
        let mut sim = Simulation::new(config).unwrap();
        sim.run_until(Duration::from_secs(5)).unwrap();

        let now = sim.now();
        let route = sim
            .node(0)
            .hwmp()
            .routing_table()
            .lookup_reactive(node_address(2), now)
            .unwrap();
        assert_eq!(route.retransmitter, node_address(1));
        assert_eq!(sim.node(1).data().forwarded, 5);

        let report = sim.report();
        assert_eq!(report.flows[0].sent, 5);
        assert_eq!(report.flows[0].delivered, 5);
    }

    #[test]
    fn test_link_failure_invalidates_path() {
        let mut config = line(3);
        config.flows.push(flow(0, 2, 1500, 3));
        config.link_failures.push(LinkFailureConfig {
            a: 1,
            b: 2,
            at: Duration::from_millis(2500),
        });
        let mut sim = Simulation::new(config).unwrap();
        sim.run_until(Duration::from_millis(2400)).unwrap();
        assert!(sim
            .node(0)
            .hwmp()
            .routing_table()
            .lookup_reactive(node_address(2), sim.now())
            .is_some());

        sim.run_until(Duration::from_secs(6)).unwrap();
        let now = sim.now();
        assert!(!sim
            .node(1)
            .peering()
            .is_active_link(RADIO_INTERFACE, node_address(2)));
        assert!(sim
            .node(0)
            .hwmp()
            .routing_table()
            .lookup_reactive(node_address(2), now)
            .is_none());
        assert!(sim.node(0).hwmp().stats().interfaces[&RADIO_INTERFACE].rx_perr >= 1);
    }

    #[test]
    fn test_root_announcements_reach_every_node() {
        let mut config = line(3);
        config.root = Some(0);
        config.hwmp.rann_interval = Duration::from_secs(1);
        let mut sim = Simulation::new(config).unwrap();
        sim.run_until(Duration::from_secs(4)).unwrap();

        let now = sim.now();
        let far = sim.node(2).hwmp().routing_table().lookup_proactive(now).unwrap();
        assert_eq!(far.retransmitter, node_address(1));
        assert_eq!(
            sim.node(2).hwmp().routing_table().root(),
            Some(node_address(0))
        );
        let near = sim.node(1).hwmp().routing_table().lookup_proactive(now).unwrap();
        assert_eq!(near.retransmitter, node_address(0));
        assert!(far.metric > near.metric);
    }

    #[tokio::test]
    async fn test_runs_are_reproducible() {
        let mut config = line(4);
        config.duration = Duration::from_secs(4);
        config.loss = 0.1;
        config.flows.push(flow(0, 3, 2000, 5));

        let first = Simulation::new(config.clone()).unwrap().run(false).await.unwrap();
        let second = Simulation::new(config).unwrap().run(false).await.unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first.duration_ms, 4000);
        assert_eq!(first.flows[0].sent, 5);
    }
}
