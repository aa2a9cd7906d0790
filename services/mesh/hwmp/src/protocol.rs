//! HWMP path selection engine.
//!
//! [`HwmpProtocol`] answers route requests from the forwarding layer, runs
//! reactive path discovery (PREQ/PREP), maintains paths on link loss (PERR),
//! and keeps the proactive path towards a root (RANN or proactive PREQ).
//! Control elements to transmit are queued as [`Transmission`]s and taken
//! with [`HwmpProtocol::drain_transmissions`].

use crate::config::{HwmpConfig, RootMode};
use crate::error::{HwmpError, Result};
use crate::interface::{DestinationRequest, HwmpInterface};
use crate::queue::{QueuedRequest, RequestQueue};
use crate::stats::HwmpStats;
use mesh_routing::{
    seqno_newer, DropReason, HwmpRtable, LookupResult, MeshL2Routing, NextHop, Packet,
    PendingRoute, Reception, RequestId, RouteReply, RouteRequest,
};
use mesh_wire::{
    to_tu, tu, Element, FailedDestination, IePerr, IePrep, IePreq, IeRann, MacAddress, MeshHeader,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Control element to put on the air
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    /// Interface to send on
    pub interface: u32,
    /// Individual neighbor or the broadcast address
    pub receiver: MacAddress,
    /// Element to carry in a path selection frame
    pub element: Element,
}

/// Discovery retry state of one destination
#[derive(Debug, Clone, Copy)]
struct PreqTimeout {
    deadline: Duration,
    retries: u8,
}

/// How a control element compares with what we last heard from its originator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    Stale,
    SameSeqno,
    Fresh,
}

/// HWMP state of one mesh point
#[derive(Debug)]
pub struct HwmpProtocol {
    address: MacAddress,
    /// Interface index of the mesh point itself; frames from it are locally originated
    mesh_point_interface: u32,
    config: HwmpConfig,
    interfaces: BTreeMap<u32, HwmpInterface>,
    rtable: HwmpRtable,
    hwmp_seqno: u32,
    preq_id: u32,
    data_seqno: u32,
    /// Last (seqno, metric) heard from each originator
    seqno_metric_db: BTreeMap<MacAddress, (u32, u32)>,
    /// Last broadcast data seqno per source
    last_data_seqno: BTreeMap<MacAddress, u32>,
    queue: RequestQueue,
    next_request_id: RequestId,
    preq_timeouts: BTreeMap<MacAddress, PreqTimeout>,
    is_root: bool,
    root_announcement: Option<Duration>,
    shut_down: bool,
    rng: StdRng,
    outbox: Vec<Transmission>,
    stats: HwmpStats,
}

impl HwmpProtocol {
    /// Create the engine of mesh point `address`
    pub fn new(address: MacAddress, mesh_point_interface: u32, config: HwmpConfig) -> Result<Self> {
        config.validate()?;
        let mut seed = [0u8; 8];
        seed[..6].copy_from_slice(&address.octets());
        Ok(Self {
            address,
            mesh_point_interface,
            queue: RequestQueue::new(config.max_queue_size),
            config,
            interfaces: BTreeMap::new(),
            rtable: HwmpRtable::new(),
            hwmp_seqno: 0,
            preq_id: 0,
            data_seqno: 0,
            seqno_metric_db: BTreeMap::new(),
            last_data_seqno: BTreeMap::new(),
            next_request_id: 0,
            preq_timeouts: BTreeMap::new(),
            is_root: false,
            root_announcement: None,
            shut_down: false,
            rng: StdRng::seed_from_u64(u64::from_le_bytes(seed)),
            outbox: Vec::new(),
            stats: HwmpStats::default(),
        })
    }

    /// Register a mesh interface
    pub fn add_interface(&mut self, interface: u32, address: MacAddress) -> Result<()> {
        if self.interfaces.contains_key(&interface) {
            return Err(HwmpError::DuplicateInterface(interface));
        }
        self.interfaces.insert(interface, HwmpInterface::new(address));
        self.stats.interface(interface);
        debug!("HWMP interface {} registered ({})", interface, address);
        Ok(())
    }

    /// Mesh point address
    pub fn address(&self) -> MacAddress {
        self.address
    }

    /// Active configuration
    pub fn config(&self) -> &HwmpConfig {
        &self.config
    }

    /// Route table
    pub fn routing_table(&self) -> &HwmpRtable {
        &self.rtable
    }

    /// Counters
    pub fn stats(&self) -> &HwmpStats {
        &self.stats
    }

    /// Route requests waiting for discovery
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// True while announcing as root
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Peers with an established link on `interface`
    pub fn neighbors(&self, interface: u32) -> Vec<MacAddress> {
        self.interfaces
            .get(&interface)
            .map(|iface| iface.neighbors().collect())
            .unwrap_or_default()
    }

    /// Take the control elements queued for transmission
    pub fn drain_transmissions(&mut self) -> Vec<Transmission> {
        std::mem::take(&mut self.outbox)
    }

    /// Reseed the random stream; returns the number of streams used
    pub fn assign_streams(&mut self, stream: u64) -> u64 {
        self.rng = StdRng::seed_from_u64(stream);
        1
    }

    /// Best live path: reactive first, then the proactive root path
    pub fn lookup_route(&self, destination: MacAddress, now: Duration) -> Option<LookupResult> {
        self.rtable
            .lookup_reactive(destination, now)
            .or_else(|| self.rtable.lookup_proactive(now))
    }

    /// Update the metric of the link to `peer`
    pub fn set_link_metric(&mut self, interface: u32, peer: MacAddress, metric: u32) -> Result<()> {
        let iface = self
            .interfaces
            .get_mut(&interface)
            .ok_or(HwmpError::UnknownInterface(interface))?;
        if !iface.set_link_metric(peer, metric) {
            debug!("Metric for {} ignored, no peer link on interface {}", peer, interface);
        }
        Ok(())
    }

    /// Start announcing this mesh point as root
    pub fn set_root(&mut self, now: Duration) {
        if self.is_root {
            return;
        }
        let delay = match self.config.random_start.as_micros() {
            0 => Duration::ZERO,
            range => Duration::from_micros(self.rng.gen_range(0..range) as u64),
        };
        self.is_root = true;
        self.root_announcement = Some(now + delay);
        info!(
            "Mesh point {} is root ({:?}), first announcement in {:?}",
            self.address, self.config.root_mode, delay
        );
    }

    /// Stop announcing as root
    pub fn unset_root(&mut self) {
        if self.is_root {
            info!("Mesh point {} is no longer root", self.address);
        }
        self.is_root = false;
        self.root_announcement = None;
    }

    /// Process every element of a path selection frame from `from`
    pub fn receive_path_selection(
        &mut self,
        interface: u32,
        from: MacAddress,
        elements: Vec<Element>,
        now: Duration,
    ) -> Result<()> {
        for element in elements {
            self.receive_element(interface, from, element, now)?;
        }
        Ok(())
    }

    /// Process one control element received from neighbor `from`
    pub fn receive_element(
        &mut self,
        interface: u32,
        from: MacAddress,
        element: Element,
        now: Duration,
    ) -> Result<()> {
        let iface = self
            .interfaces
            .get(&interface)
            .ok_or(HwmpError::UnknownInterface(interface))?;
        let link_metric = iface.link_metric(from);
        self.stats.interface(interface).count_rx(&element);

        let Some(metric) = link_metric else {
            debug!(
                "Ignoring {:?} from {}: no peer link on interface {}",
                element.id(),
                from,
                interface
            );
            self.count_dropped_control(interface);
            return Ok(());
        };
        match element {
            Element::Preq(preq) => self.receive_preq(preq, from, interface, metric, now),
            Element::Prep(prep) => self.receive_prep(prep, from, interface, metric, now),
            Element::Perr(perr) => self.receive_perr(perr, from, interface, now),
            Element::Rann(rann) => self.receive_rann(rann, from, interface, metric, now),
            other => debug!("Ignoring non path selection element {:?}", other.id()),
        }
        Ok(())
    }

    fn receive_preq(
        &mut self,
        mut preq: IePreq,
        from: MacAddress,
        interface: u32,
        metric: u32,
        now: Duration,
    ) {
        let originator = preq.originator();
        let seqno = preq.originator_seqno();
        if originator == self.address {
            return;
        }
        if preq.ttl() == 0 {
            debug!("PREQ from {} arrived with TTL 0", originator);
            self.count_dropped_control(interface);
            return;
        }
        preq.increment_metric(metric);
        if self.classify(originator, seqno, preq.metric(), true) == Freshness::Stale {
            debug!(
                "Stale PREQ from {} (seqno {}, metric {})",
                originator,
                seqno,
                preq.metric()
            );
            self.count_dropped_control(interface);
            return;
        }
        self.seqno_metric_db
            .insert(originator, (seqno, preq.metric()));

        let lifetime = tu(preq.lifetime());
        if self
            .rtable
            .add_reactive_path(originator, from, interface, preq.metric(), lifetime, seqno, now)
        {
            self.reactive_path_resolved(originator, now);
        }
        self.add_neighbor_path(from, interface, metric, lifetime, now);

        let units = preq.destinations().to_vec();
        for unit in units {
            let destination = unit.address();
            if destination == MacAddress::BROADCAST {
                if self.rtable.add_proactive_path(
                    preq.metric(),
                    originator,
                    from,
                    interface,
                    lifetime,
                    seqno,
                    now,
                ) {
                    self.proactive_path_resolved(now);
                }
                if !preq.is_need_not_prep() {
                    let own_seqno = self.next_hwmp_seqno();
                    let prep = IePrep::new(
                        self.address,
                        own_seqno,
                        originator,
                        seqno,
                        0,
                        preq.lifetime(),
                        self.config.max_ttl,
                    );
                    self.stats.interface(interface).initiated_prep += 1;
                    self.send(interface, vec![from], Element::Prep(prep));
                }
                continue;
            }

            if destination == self.address {
                let own_seqno = self.next_hwmp_seqno();
                let prep = IePrep::new(
                    self.address,
                    own_seqno,
                    originator,
                    seqno,
                    0,
                    preq.lifetime(),
                    self.config.max_ttl,
                );
                debug!(
                    "Answering PREQ from {} (seqno {}, metric {})",
                    originator,
                    seqno,
                    preq.metric()
                );
                self.stats.interface(interface).initiated_prep += 1;
                self.send(interface, vec![from], Element::Prep(prep));
                preq.del_destination(destination);
                continue;
            }

            if unit.is_do() {
                continue;
            }
            let Some(route) = self.rtable.lookup_reactive(destination, now) else {
                continue;
            };
            if !unit.is_usn() && seqno_newer(unit.seqno(), route.seqno) {
                continue;
            }
            let prep = IePrep::new(
                destination,
                route.seqno,
                originator,
                seqno,
                route.metric,
                to_tu(route.lifetime),
                self.config.max_ttl,
            );
            debug!(
                "Answering PREQ from {} on behalf of {} (metric {})",
                originator, destination, route.metric
            );
            self.stats.interface(interface).initiated_prep += 1;
            self.send(interface, vec![from], Element::Prep(prep));
            self.rtable
                .add_precursor(destination, interface, from, lifetime, now);
            if unit.is_rf() {
                preq.set_destination_flags(destination, true, false);
            } else {
                preq.del_destination(destination);
            }
        }

        if preq.dest_count() == 0 {
            return;
        }
        preq.decrement_ttl();
        if preq.ttl() == 0 {
            debug!("PREQ from {} expired (hop count {})", originator, preq.hop_count());
            self.count_dropped_control(interface);
            return;
        }

        if preq.is_unicast() {
            let target = preq.destinations()[0].address();
            let route = self.rtable.lookup_reactive(target, now).or_else(|| {
                self.rtable
                    .lookup_proactive(now)
                    .filter(|_| self.rtable.root() == Some(target))
            });
            match route {
                Some(route) => self.send(
                    route.interface,
                    vec![route.retransmitter],
                    Element::Preq(preq),
                ),
                None => {
                    debug!("No path to forward unicast PREQ towards {}", target);
                    self.count_dropped_control(interface);
                }
            }
            return;
        }

        let threshold = self.config.unicast_preq_threshold;
        let targets: Vec<(u32, Vec<MacAddress>)> = self
            .interfaces
            .iter()
            .map(|(index, iface)| (*index, iface.receivers(threshold)))
            .collect();
        for (index, receivers) in targets {
            self.send(index, receivers, Element::Preq(preq.clone()));
        }
    }

    fn receive_prep(
        &mut self,
        mut prep: IePrep,
        from: MacAddress,
        interface: u32,
        metric: u32,
        now: Duration,
    ) {
        let originator = prep.originator();
        let seqno = prep.originator_seqno();
        if prep.ttl() == 0 {
            debug!("PREP from {} arrived with TTL 0", originator);
            self.count_dropped_control(interface);
            return;
        }
        prep.increment_metric(metric);
        if self.classify(originator, seqno, prep.metric(), false) == Freshness::Stale {
            debug!("Stale PREP from {} (seqno {})", originator, seqno);
            self.count_dropped_control(interface);
            return;
        }
        self.seqno_metric_db
            .insert(originator, (seqno, prep.metric()));

        let lifetime = tu(prep.lifetime());
        let back = self.rtable.lookup_reactive(prep.destination(), now);
        if self
            .rtable
            .add_reactive_path(originator, from, interface, prep.metric(), lifetime, seqno, now)
        {
            self.rtable
                .add_precursor(prep.destination(), interface, from, lifetime, now);
            if let Some(back) = back {
                self.rtable.add_precursor(
                    originator,
                    back.interface,
                    back.retransmitter,
                    back.lifetime,
                    now,
                );
            }
            self.reactive_path_resolved(originator, now);
        }
        self.add_neighbor_path(from, interface, metric, lifetime, now);

        if prep.destination() == self.address {
            debug!(
                "Path to {} resolved via {} (metric {})",
                originator,
                from,
                prep.metric()
            );
            return;
        }
        let Some(back) = back else {
            debug!(
                "No reverse path to {} for PREP from {}",
                prep.destination(),
                originator
            );
            self.count_dropped_control(interface);
            return;
        };
        prep.decrement_ttl();
        if prep.ttl() == 0 {
            debug!("PREP from {} expired", originator);
            self.count_dropped_control(interface);
            return;
        }
        self.send(back.interface, vec![back.retransmitter], Element::Prep(prep));
    }

    fn receive_perr(&mut self, perr: IePerr, from: MacAddress, interface: u32, now: Duration) {
        let mut accepted = Vec::new();
        for failed in perr.destinations() {
            let route = self
                .rtable
                .lookup_reactive_expired(failed.destination, now)
                .or_else(|| {
                    self.rtable
                        .lookup_proactive_expired(now)
                        .filter(|_| self.rtable.root() == Some(failed.destination))
                });
            match route {
                Some(route)
                    if route.retransmitter == from
                        && route.interface == interface
                        && !seqno_newer(route.seqno, failed.seqno) =>
                {
                    accepted.push(*failed)
                }
                _ => debug!(
                    "PERR from {} does not concern our path to {}",
                    from, failed.destination
                ),
            }
        }
        if accepted.is_empty() {
            return;
        }

        info!(
            "PERR from {}: {} destinations unreachable",
            from,
            accepted.len()
        );
        let precursors = self.make_path_error(&accepted, now);
        let ttl = perr.ttl().saturating_sub(1);
        if ttl == 0 {
            debug!("PERR from {} not forwarded, TTL exhausted", from);
            return;
        }
        for (index, receivers) in self.perr_receivers(precursors) {
            for element in build_perrs(&accepted, ttl) {
                self.send(index, receivers.clone(), Element::Perr(element));
            }
        }
    }

    fn receive_rann(
        &mut self,
        mut rann: IeRann,
        from: MacAddress,
        interface: u32,
        metric: u32,
        now: Duration,
    ) {
        let root = rann.root();
        let seqno = rann.seqno();
        if root == self.address {
            return;
        }
        if rann.ttl() == 0 {
            debug!("RANN from {} arrived with TTL 0", root);
            self.count_dropped_control(interface);
            return;
        }
        rann.increment_metric(metric);
        let freshness = self.classify(root, seqno, rann.metric(), true);
        if freshness == Freshness::Stale {
            debug!("Stale RANN from {} (seqno {})", root, seqno);
            self.count_dropped_control(interface);
            return;
        }
        self.seqno_metric_db.insert(root, (seqno, rann.metric()));

        if self.rtable.add_proactive_path(
            rann.metric(),
            root,
            from,
            interface,
            self.config.active_root_timeout,
            seqno,
            now,
        ) {
            self.proactive_path_resolved(now);
        }

        if freshness == Freshness::Fresh {
            let own_seqno = self.next_hwmp_seqno();
            let preq_id = self.next_preq_id();
            let mut preq = IePreq::new(
                self.address,
                own_seqno,
                preq_id,
                self.path_lifetime_tu(),
                self.config.max_ttl,
            );
            preq.set_unicast();
            preq.add_destination(true, false, root, seqno);
            debug!("Registering with root {} through {}", root, from);
            self.stats.interface(interface).initiated_preq += 1;
            self.send(interface, vec![from], Element::Preq(preq));
        }

        rann.decrement_ttl();
        if rann.ttl() == 0 {
            return;
        }
        let interfaces: Vec<u32> = self.interfaces.keys().copied().collect();
        for index in interfaces {
            self.send(index, vec![MacAddress::BROADCAST], Element::Rann(rann.clone()));
        }
    }

    /// Refresh the one hop path to a neighbor we just heard from
    fn add_neighbor_path(
        &mut self,
        neighbor: MacAddress,
        interface: u32,
        metric: u32,
        lifetime: Duration,
        now: Duration,
    ) {
        let better = self
            .rtable
            .lookup_reactive(neighbor, now)
            .map_or(true, |route| route.metric > metric);
        if !better {
            return;
        }
        let seqno = self
            .rtable
            .lookup_reactive_expired(neighbor, now)
            .map_or(0, |route| route.seqno);
        if self
            .rtable
            .add_reactive_path(neighbor, neighbor, interface, metric, lifetime, seqno, now)
        {
            self.reactive_path_resolved(neighbor, now);
        }
    }

    fn classify(
        &self,
        originator: MacAddress,
        seqno: u32,
        metric: u32,
        equal_needs_better_metric: bool,
    ) -> Freshness {
        match self.seqno_metric_db.get(&originator) {
            None => Freshness::Fresh,
            Some((known, _)) if seqno_newer(*known, seqno) => Freshness::Stale,
            Some((known, known_metric)) if *known == seqno => {
                if equal_needs_better_metric && *known_metric <= metric {
                    Freshness::Stale
                } else {
                    Freshness::SameSeqno
                }
            }
            Some(_) => Freshness::Fresh,
        }
    }

    /// Delete paths to `failed` and collect their precursors per interface
    fn make_path_error(
        &mut self,
        failed: &[FailedDestination],
        now: Duration,
    ) -> BTreeMap<u32, Vec<MacAddress>> {
        let mut precursors: BTreeMap<u32, Vec<MacAddress>> = BTreeMap::new();
        for destination in failed {
            for precursor in self.rtable.get_precursors(destination.destination, now) {
                let list = precursors.entry(precursor.interface).or_default();
                if !list.contains(&precursor.address) {
                    list.push(precursor.address);
                }
            }
            self.rtable.delete_reactive_path(destination.destination);
            self.rtable.delete_proactive_path_to(destination.destination);
        }
        precursors
    }

    /// PERR receivers per interface; without precursors the PERR is broadcast everywhere
    fn perr_receivers(
        &self,
        precursors: BTreeMap<u32, Vec<MacAddress>>,
    ) -> Vec<(u32, Vec<MacAddress>)> {
        if precursors.is_empty() {
            return self
                .interfaces
                .keys()
                .map(|index| (*index, vec![MacAddress::BROADCAST]))
                .collect();
        }
        precursors
            .into_iter()
            .filter(|(index, _)| self.interfaces.contains_key(index))
            .map(|(index, receivers)| {
                if receivers.len() >= self.config.unicast_perr_threshold {
                    (index, vec![MacAddress::BROADCAST])
                } else {
                    (index, receivers)
                }
            })
            .collect()
    }

    /// Invalidate `failed` and queue our own PERR for it
    fn initiate_path_error(&mut self, failed: &[FailedDestination], now: Duration) {
        let precursors = self.make_path_error(failed, now);
        let ttl = self.config.max_ttl;
        for (index, receivers) in self.perr_receivers(precursors) {
            if let Some(iface) = self.interfaces.get_mut(&index) {
                iface.request_path_error(failed, &receivers, ttl);
                self.stats.interface(index).initiated_perr += 1;
            }
        }
        self.flush_interfaces(now);
    }

    /// Send batched PREQs and PERRs whose rate limit allows it
    fn flush_interfaces(&mut self, now: Duration) {
        let mut due = Vec::new();
        for (index, iface) in self.interfaces.iter_mut() {
            let preqs = iface.take_due_preqs(now, self.config.preq_min_interval);
            if !preqs.is_empty() {
                let receivers = iface.receivers(self.config.unicast_preq_threshold);
                for preq in preqs {
                    due.push((*index, receivers.clone(), Element::Preq(preq)));
                }
            }
            if let Some(batch) = iface.take_due_perrs(now, self.config.perr_min_interval) {
                let receivers = if batch.receivers.contains(&MacAddress::BROADCAST) {
                    vec![MacAddress::BROADCAST]
                } else {
                    batch.receivers
                };
                for perr in batch.elements {
                    due.push((*index, receivers.clone(), Element::Perr(perr)));
                }
            }
        }
        for (index, receivers, element) in due {
            self.send(index, receivers, element);
        }
    }

    /// Ask every interface for a path to `destination`
    fn request_destination(
        &mut self,
        destination: MacAddress,
        originator_seqno: u32,
        destination_seqno: u32,
        now: Duration,
    ) {
        let address = self.address;
        let lifetime = self.path_lifetime_tu();
        let ttl = self.config.max_ttl;
        let request = DestinationRequest {
            destination,
            seqno: destination_seqno,
            do_flag: self.config.do_flag,
            rf_flag: self.config.rf_flag,
        };
        let preq_id = &mut self.preq_id;
        for (index, iface) in self.interfaces.iter_mut() {
            iface.request_destination(address, request, || {
                *preq_id = preq_id.wrapping_add(1);
                IePreq::new(address, originator_seqno, *preq_id, lifetime, ttl)
            });
            self.stats.interface(*index).initiated_preq += 1;
        }
        debug!(
            "Path discovery for {} (seqno {}, known destination seqno {})",
            destination, originator_seqno, destination_seqno
        );
        self.flush_interfaces(now);
    }

    /// Arm the retry timer unless discovery for `destination` is already running
    fn should_send_preq(&mut self, destination: MacAddress, now: Duration) -> bool {
        if self.preq_timeouts.contains_key(&destination) {
            return false;
        }
        self.preq_timeouts.insert(
            destination,
            PreqTimeout {
                deadline: now + self.config.net_diameter_traversal_time * 2,
                retries: 1,
            },
        );
        true
    }

    fn retry_path_discovery(&mut self, destination: MacAddress, now: Duration) {
        let Some(timeout) = self.preq_timeouts.get(&destination).copied() else {
            return;
        };
        if !self.queue.contains(destination) {
            self.preq_timeouts.remove(&destination);
            return;
        }
        if let Some(route) = self.lookup_route(destination, now) {
            self.preq_timeouts.remove(&destination);
            self.resolve_queued(destination, route.next_hop());
            return;
        }
        if timeout.retries > self.config.max_preq_retries {
            self.preq_timeouts.remove(&destination);
            let failed = self.queue.take_for(destination);
            warn!(
                "Path discovery for {} gave up after {} retries, dropping {} requests",
                destination,
                self.config.max_preq_retries,
                failed.len()
            );
            for request in failed {
                self.stats.total_dropped += 1;
                request.resolve(Err(DropReason::DiscoveryTimeout));
            }
            return;
        }

        let retries = timeout.retries + 1;
        let originator_seqno = self.next_hwmp_seqno();
        let destination_seqno = self
            .rtable
            .lookup_reactive_expired(destination, now)
            .map_or(0, |route| route.seqno);
        self.request_destination(destination, originator_seqno, destination_seqno, now);
        self.preq_timeouts.insert(
            destination,
            PreqTimeout {
                deadline: now
                    + self.config.net_diameter_traversal_time * 2 * (u32::from(retries) + 1),
                retries,
            },
        );
    }

    fn reactive_path_resolved(&mut self, destination: MacAddress, now: Duration) {
        let Some(route) = self.rtable.lookup_reactive(destination, now) else {
            return;
        };
        self.preq_timeouts.remove(&destination);
        self.resolve_queued(destination, route.next_hop());
    }

    fn proactive_path_resolved(&mut self, now: Duration) {
        let Some(route) = self.rtable.lookup_proactive(now) else {
            return;
        };
        for request in self.queue.take_all() {
            self.preq_timeouts.remove(&request.destination);
            self.complete(request, route.next_hop());
        }
    }

    fn resolve_queued(&mut self, destination: MacAddress, next_hop: NextHop) {
        for request in self.queue.take_for(destination) {
            self.complete(request, next_hop);
        }
    }

    fn complete(&mut self, request: QueuedRequest, next_hop: NextHop) {
        self.stats.tx_unicast += 1;
        self.stats.tx_bytes += request.payload().len() as u64;
        let id = request.id;
        if !request.resolve(Ok(next_hop)) {
            debug!("Route request {} resolved after its requester went away", id);
        }
    }

    fn forward_unicast(
        &mut self,
        source_interface: u32,
        source: MacAddress,
        destination: MacAddress,
        packet: Packet,
        protocol_type: u16,
        now: Duration,
    ) -> RouteRequest {
        let reactive = self.rtable.lookup_reactive(destination, now);
        let route = reactive.or_else(|| self.rtable.lookup_proactive(now));
        if let Some(route) = route {
            if let Some(previous) = packet.received_from {
                let path_to = match (reactive, self.rtable.root()) {
                    (None, Some(root)) => root,
                    _ => destination,
                };
                self.rtable.add_precursor(
                    path_to,
                    source_interface,
                    previous,
                    self.config.active_path_timeout,
                    now,
                );
            }
            self.stats.tx_unicast += 1;
            self.stats.tx_bytes += packet.payload.len() as u64;
            return RouteRequest::Immediate(vec![RouteReply {
                outcome: Ok(route.next_hop()),
                packet,
                source,
                destination,
                protocol_type,
            }]);
        }

        if source_interface != self.mesh_point_interface {
            let seqno = self
                .rtable
                .lookup_reactive_expired(destination, now)
                .map_or(0, |route| route.seqno);
            debug!("No path to forward frame for {}, reporting path error", destination);
            self.initiate_path_error(&[FailedDestination::new(destination, seqno)], now);
            return self.fail(source, destination, packet, protocol_type, DropReason::NoRoute);
        }

        let id = self.next_request_id;
        self.next_request_id += 1;
        let (sender, receiver) = oneshot::channel();
        let request = QueuedRequest::new(id, source, destination, packet, protocol_type, sender);
        if let Err(request) = self.queue.push(request) {
            warn!(
                "Route request queue full ({} entries), dropping frame for {}",
                self.queue.len(),
                destination
            );
            self.stats.total_dropped += 1;
            return RouteRequest::Immediate(vec![request.into_reply(Err(DropReason::QueueFull))]);
        }
        self.stats.total_queued += 1;

        if self.should_send_preq(destination, now) {
            let destination_seqno = self
                .rtable
                .lookup_reactive_expired(destination, now)
                .map_or(0, |route| route.seqno);
            let originator_seqno = self.next_hwmp_seqno();
            self.request_destination(destination, originator_seqno, destination_seqno, now);
        }
        RouteRequest::Deferred(PendingRoute::new(id, destination, receiver))
    }

    fn broadcast(
        &mut self,
        source: MacAddress,
        destination: MacAddress,
        packet: Packet,
        protocol_type: u16,
    ) -> RouteRequest {
        let threshold = self.config.unicast_data_threshold;
        let mut replies = Vec::new();
        for (index, iface) in &self.interfaces {
            for receiver in iface.receivers(threshold) {
                replies.push(RouteReply {
                    outcome: Ok(NextHop::new(receiver, *index, 0)),
                    packet: packet.clone(),
                    source,
                    destination,
                    protocol_type,
                });
            }
        }
        if replies.is_empty() {
            return self.fail(source, destination, packet, protocol_type, DropReason::NoRoute);
        }
        self.stats.tx_broadcast += 1;
        self.stats.tx_bytes += packet.payload.len() as u64;
        RouteRequest::Immediate(replies)
    }

    fn fail(
        &mut self,
        source: MacAddress,
        destination: MacAddress,
        packet: Packet,
        protocol_type: u16,
        reason: DropReason,
    ) -> RouteRequest {
        debug!("Dropping frame {} -> {}: {}", source, destination, reason);
        self.stats.total_dropped += 1;
        RouteRequest::Immediate(vec![RouteReply {
            outcome: Err(reason),
            packet,
            source,
            destination,
            protocol_type,
        }])
    }

    /// True when a broadcast data frame from `source` was already seen
    fn drop_data_frame(&mut self, source: MacAddress, seqno: u32) -> bool {
        match self.last_data_seqno.get(&source) {
            Some(last) if !seqno_newer(seqno, *last) => true,
            _ => {
                self.last_data_seqno.insert(source, seqno);
                false
            }
        }
    }

    fn announce_root(&mut self, now: Duration) {
        let seqno = self.next_hwmp_seqno();
        let interfaces: Vec<u32> = self.interfaces.keys().copied().collect();
        let next = match self.config.root_mode {
            RootMode::Rann => {
                let rann = IeRann::new(
                    self.address,
                    seqno,
                    to_tu(self.config.rann_interval),
                    self.config.max_ttl,
                );
                debug!("Root {} announcing RANN seqno {}", self.address, seqno);
                for index in interfaces {
                    self.send(index, vec![MacAddress::BROADCAST], Element::Rann(rann.clone()));
                }
                now + self.config.rann_interval
            }
            RootMode::ProactivePreq => {
                let preq_id = self.next_preq_id();
                let mut preq = IePreq::new(
                    self.address,
                    seqno,
                    preq_id,
                    to_tu(self.config.active_root_timeout),
                    self.config.max_ttl,
                );
                preq.add_destination(true, false, MacAddress::BROADCAST, 0);
                if self.config.need_not_prep {
                    preq.set_need_not_prep();
                }
                debug!("Root {} sending proactive PREQ seqno {}", self.address, seqno);
                for index in interfaces {
                    self.stats.interface(index).initiated_preq += 1;
                    self.send(index, vec![MacAddress::BROADCAST], Element::Preq(preq.clone()));
                }
                now + self.config.path_to_root_interval
            }
        };
        self.root_announcement = Some(next);
    }

    fn send(&mut self, interface: u32, receivers: Vec<MacAddress>, element: Element) {
        let stats = self.stats.interface(interface);
        for receiver in receivers {
            stats.count_tx(&element);
            self.outbox.push(Transmission {
                interface,
                receiver,
                element: element.clone(),
            });
        }
    }

    fn count_dropped_control(&mut self, interface: u32) {
        self.stats.interface(interface).dropped_control += 1;
    }

    fn next_hwmp_seqno(&mut self) -> u32 {
        self.hwmp_seqno = self.hwmp_seqno.wrapping_add(1).max(1);
        self.hwmp_seqno
    }

    fn next_preq_id(&mut self) -> u32 {
        self.preq_id = self.preq_id.wrapping_add(1);
        self.preq_id
    }

    fn path_lifetime_tu(&self) -> u32 {
        to_tu(self.config.active_path_timeout)
    }
}

/// Split failed destinations over as many PERR elements as needed
fn build_perrs(failed: &[FailedDestination], ttl: u8) -> Vec<IePerr> {
    let mut elements: Vec<IePerr> = Vec::new();
    for destination in failed {
        let added = elements
            .last_mut()
            .is_some_and(|perr| perr.add_destination(*destination));
        if !added {
            let mut perr = IePerr::new(ttl);
            perr.add_destination(*destination);
            elements.push(perr);
        }
    }
    elements
}

impl MeshL2Routing for HwmpProtocol {
    fn request_route(
        &mut self,
        source_interface: u32,
        source: MacAddress,
        destination: MacAddress,
        mut packet: Packet,
        protocol_type: u16,
        now: Duration,
    ) -> RouteRequest {
        if self.shut_down {
            return self.fail(source, destination, packet, protocol_type, DropReason::Shutdown);
        }
        if source_interface == self.mesh_point_interface {
            if packet.header.is_some() {
                return self.fail(
                    source,
                    destination,
                    packet,
                    protocol_type,
                    DropReason::UnexpectedHeader,
                );
            }
            self.data_seqno = self.data_seqno.wrapping_add(1);
            packet.header = Some(MeshHeader::new(self.config.max_ttl, self.data_seqno));
        } else {
            let Some(mut header) = packet.header else {
                return self.fail(
                    source,
                    destination,
                    packet,
                    protocol_type,
                    DropReason::MissingHeader,
                );
            };
            if header.ttl <= 1 {
                self.stats.dropped_ttl += 1;
                return self.fail(source, destination, packet, protocol_type, DropReason::TtlExpired);
            }
            header.ttl -= 1;
            packet.header = Some(header);
        }

        if destination.is_group() {
            self.broadcast(source, destination, packet, protocol_type)
        } else {
            self.forward_unicast(source_interface, source, destination, packet, protocol_type, now)
        }
    }

    fn remove_routing_stuff(
        &mut self,
        _from_interface: u32,
        source: MacAddress,
        destination: MacAddress,
        packet: &mut Packet,
        _protocol_type: u16,
    ) -> Reception {
        let Some(header) = packet.header else {
            self.stats.total_dropped += 1;
            return Reception::Drop(DropReason::MissingHeader);
        };
        if source == self.address {
            self.stats.dropped_duplicate += 1;
            return Reception::Drop(DropReason::Duplicate);
        }
        if destination.is_group() {
            if self.drop_data_frame(source, header.seqno) {
                self.stats.dropped_duplicate += 1;
                self.stats.total_dropped += 1;
                return Reception::Drop(DropReason::Duplicate);
            }
            return Reception::DeliverAndForward;
        }
        if destination == self.address {
            packet.header = None;
            return Reception::Deliver;
        }
        Reception::Forward
    }

    fn peer_link_status(
        &mut self,
        mesh_point: MacAddress,
        peer: MacAddress,
        interface: u32,
        up: bool,
        now: Duration,
    ) {
        let Some(iface) = self.interfaces.get_mut(&interface) else {
            warn!("Link status for {} on unknown interface {}", peer, interface);
            return;
        };
        if up {
            iface.add_neighbor(peer);
            info!(
                "Peer link to {} (mesh point {}) up on interface {}",
                peer, mesh_point, interface
            );
            return;
        }
        iface.remove_neighbor(peer);
        let failed = self.rtable.get_unreachable_destinations(peer);
        info!(
            "Peer link to {} (mesh point {}) down on interface {}, {} destinations unreachable",
            peer,
            mesh_point,
            interface,
            failed.len()
        );
        if !failed.is_empty() {
            self.initiate_path_error(&failed, now);
        }
    }

    fn next_timeout(&self) -> Option<Duration> {
        let retries = self.preq_timeouts.values().map(|t| t.deadline);
        let batches = self.interfaces.values().filter_map(|iface| iface.next_timeout());
        retries
            .chain(batches)
            .chain(self.root_announcement)
            .min()
    }

    fn handle_timeouts(&mut self, now: Duration) {
        let due: Vec<MacAddress> = self
            .preq_timeouts
            .iter()
            .filter(|(_, timeout)| timeout.deadline <= now)
            .map(|(destination, _)| *destination)
            .collect();
        for destination in due {
            self.retry_path_discovery(destination, now);
        }
        if self.is_root && self.root_announcement.is_some_and(|at| at <= now) {
            self.announce_root(now);
        }
        self.flush_interfaces(now);
    }

    fn shutdown(&mut self) {
        self.shut_down = true;
        let pending = self.queue.take_all();
        if !pending.is_empty() {
            info!("HWMP shutting down, failing {} queued requests", pending.len());
        }
        for request in pending {
            self.stats.total_dropped += 1;
            request.resolve(Err(DropReason::Shutdown));
        }
        self.preq_timeouts.clear();
        self.is_root = false;
        self.root_announcement = None;
        for iface in self.interfaces.values_mut() {
            iface.clear_pending();
        }
    }
}
