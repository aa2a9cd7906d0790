//! HWMP route table: reactive paths, the proactive root path and precursors
//!
//! All time arguments are offsets from the start of the owning mesh point's
//! clock. The table performs no I/O and never fails: absence and expiry are
//! ordinary lookup outcomes.

use crate::next_hop::{LookupResult, Precursor};
use mesh_wire::{FailedDestination, MacAddress};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// True when `candidate` is a newer sequence number than `current` (serial arithmetic)
pub fn seqno_newer(candidate: u32, current: u32) -> bool {
    (candidate.wrapping_sub(current) as i32) > 0
}

#[derive(Debug, Clone)]
struct PrecursorEntry {
    precursor: Precursor,
    expires_at: Duration,
}

#[derive(Debug, Clone)]
struct Path {
    retransmitter: MacAddress,
    interface: u32,
    metric: u32,
    seqno: u32,
    expires_at: Duration,
    precursors: Vec<PrecursorEntry>,
}

impl Path {
    fn is_expired(&self, now: Duration) -> bool {
        self.expires_at <= now
    }

    /// Freshness rule: replace an expired path, a path with an older seqno, or
    /// one with the same seqno and a strictly worse metric.
    fn accepts(&self, seqno: u32, metric: u32, now: Duration) -> bool {
        self.is_expired(now)
            || seqno_newer(seqno, self.seqno)
            || (seqno == self.seqno && metric < self.metric)
    }

    fn result(&self, now: Duration) -> LookupResult {
        LookupResult {
            retransmitter: self.retransmitter,
            interface: self.interface,
            metric: self.metric,
            seqno: self.seqno,
            lifetime: self.expires_at.saturating_sub(now),
        }
    }

    fn add_precursor(&mut self, precursor: Precursor, expires_at: Duration, now: Duration) {
        self.precursors.retain(|p| p.expires_at > now);
        match self.precursors.iter_mut().find(|p| p.precursor == precursor) {
            Some(existing) => existing.expires_at = existing.expires_at.max(expires_at),
            None => self.precursors.push(PrecursorEntry {
                precursor,
                expires_at,
            }),
        }
    }

    fn live_precursors(&self, now: Duration) -> impl Iterator<Item = Precursor> + '_ {
        self.precursors
            .iter()
            .filter(move |p| p.expires_at > now)
            .map(|p| p.precursor)
    }
}

#[derive(Debug, Clone)]
struct RootPath {
    root: MacAddress,
    path: Path,
}

/// Row of [`HwmpRtable::snapshot`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSnapshot {
    /// Destination (or root for the proactive path)
    pub destination: MacAddress,
    /// Next hop
    pub retransmitter: MacAddress,
    /// Interface
    pub interface: u32,
    /// Path metric
    pub metric: u32,
    /// Destination sequence number
    pub seqno: u32,
    /// Remaining lifetime in milliseconds
    pub lifetime_ms: u64,
    /// True for the proactive root path
    pub proactive: bool,
    /// Number of live precursors
    pub precursors: usize,
}

/// HWMP route table
#[derive(Debug, Default)]
pub struct HwmpRtable {
    routes: BTreeMap<MacAddress, Path>,
    root: Option<RootPath>,
}

impl HwmpRtable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the reactive path to `destination` if the update is fresher.
    ///
    /// Returns true when the table changed. Precursors of a replaced path are kept.
    #[allow(clippy::too_many_arguments)]
    pub fn add_reactive_path(
        &mut self,
        destination: MacAddress,
        retransmitter: MacAddress,
        interface: u32,
        metric: u32,
        lifetime: Duration,
        seqno: u32,
        now: Duration,
    ) -> bool {
        let expires_at = now + lifetime;
        match self.routes.get_mut(&destination) {
            Some(path) if !path.accepts(seqno, metric, now) => {
                debug!(
                    "Ignoring stale path to {} (seqno {} metric {} vs seqno {} metric {})",
                    destination, seqno, metric, path.seqno, path.metric
                );
                false
            }
            Some(path) => {
                path.retransmitter = retransmitter;
                path.interface = interface;
                path.metric = metric;
                path.seqno = seqno;
                path.expires_at = expires_at;
                debug!(
                    "Updated path to {} via {} (metric {}, seqno {})",
                    destination, retransmitter, metric, seqno
                );
                true
            }
            None => {
                self.routes.insert(
                    destination,
                    Path {
                        retransmitter,
                        interface,
                        metric,
                        seqno,
                        expires_at,
                        precursors: Vec::new(),
                    },
                );
                debug!(
                    "Added path to {} via {} (metric {}, seqno {})",
                    destination, retransmitter, metric, seqno
                );
                true
            }
        }
    }

    /// Install or refresh the single proactive path.
    ///
    /// For the same root the freshness rule applies; a different root replaces
    /// the current one only when the current path expired or the new metric is lower.
    #[allow(clippy::too_many_arguments)]
    pub fn add_proactive_path(
        &mut self,
        metric: u32,
        root: MacAddress,
        retransmitter: MacAddress,
        interface: u32,
        lifetime: Duration,
        seqno: u32,
        now: Duration,
    ) -> bool {
        let accept = match &self.root {
            None => true,
            Some(current) if current.root == root => current.path.accepts(seqno, metric, now),
            Some(current) => current.path.is_expired(now) || metric < current.path.metric,
        };
        if !accept {
            return false;
        }

        let precursors = match self.root.take() {
            Some(current) if current.root == root => current.path.precursors,
            _ => Vec::new(),
        };
        self.root = Some(RootPath {
            root,
            path: Path {
                retransmitter,
                interface,
                metric,
                seqno,
                expires_at: now + lifetime,
                precursors,
            },
        });
        debug!(
            "Proactive path to root {} via {} (metric {}, seqno {})",
            root, retransmitter, metric, seqno
        );
        true
    }

    /// Record that `precursor` on `interface` forwards traffic for `destination` through us
    pub fn add_precursor(
        &mut self,
        destination: MacAddress,
        interface: u32,
        precursor: MacAddress,
        lifetime: Duration,
        now: Duration,
    ) {
        let entry = Precursor::new(interface, precursor);
        let expires_at = now + lifetime;
        if let Some(path) = self.routes.get_mut(&destination) {
            path.add_precursor(entry, expires_at, now);
        }
        if let Some(root) = self.root.as_mut().filter(|r| r.root == destination) {
            root.path.add_precursor(entry, expires_at, now);
        }
    }

    /// Remove the proactive path whatever its root
    pub fn delete_proactive_path(&mut self) {
        if let Some(root) = self.root.take() {
            debug!("Deleted proactive path to {}", root.root);
        }
    }

    /// Remove the proactive path if it leads to `root`
    pub fn delete_proactive_path_to(&mut self, root: MacAddress) {
        if self.root.as_ref().is_some_and(|r| r.root == root) {
            self.delete_proactive_path();
        }
    }

    /// Remove the reactive path to `destination`; returns whether one existed
    pub fn delete_reactive_path(&mut self, destination: MacAddress) -> bool {
        let removed = self.routes.remove(&destination).is_some();
        if removed {
            debug!("Deleted path to {}", destination);
        }
        removed
    }

    /// Live reactive path
    pub fn lookup_reactive(&self, destination: MacAddress, now: Duration) -> Option<LookupResult> {
        self.routes
            .get(&destination)
            .filter(|p| !p.is_expired(now))
            .map(|p| p.result(now))
    }

    /// Reactive path whether or not it expired
    pub fn lookup_reactive_expired(
        &self,
        destination: MacAddress,
        now: Duration,
    ) -> Option<LookupResult> {
        self.routes.get(&destination).map(|p| p.result(now))
    }

    /// Live proactive path
    pub fn lookup_proactive(&self, now: Duration) -> Option<LookupResult> {
        self.root
            .as_ref()
            .filter(|r| !r.path.is_expired(now))
            .map(|r| r.path.result(now))
    }

    /// Proactive path whether or not it expired
    pub fn lookup_proactive_expired(&self, now: Duration) -> Option<LookupResult> {
        self.root.as_ref().map(|r| r.path.result(now))
    }

    /// Address of the current root, if any
    pub fn root(&self) -> Option<MacAddress> {
        self.root.as_ref().map(|r| r.root)
    }

    /// Live precursors of `destination`, deduplicated
    pub fn get_precursors(&self, destination: MacAddress, now: Duration) -> Vec<Precursor> {
        let mut precursors: Vec<Precursor> = Vec::new();
        let reactive = self.routes.get(&destination).into_iter();
        let proactive = self
            .root
            .iter()
            .filter(|r| r.root == destination)
            .map(|r| &r.path);
        for path in reactive.chain(proactive) {
            for precursor in path.live_precursors(now) {
                if !precursors.contains(&precursor) {
                    precursors.push(precursor);
                }
            }
        }
        precursors
    }

    /// Destinations reached through `peer`, with their seqno advanced by one so
    /// that a PERR built from them supersedes the stored paths.
    pub fn get_unreachable_destinations(&self, peer: MacAddress) -> Vec<FailedDestination> {
        let mut failed: Vec<FailedDestination> = self
            .routes
            .iter()
            .filter(|(_, path)| path.retransmitter == peer)
            .map(|(destination, path)| {
                FailedDestination::new(*destination, path.seqno.wrapping_add(1))
            })
            .collect();
        if let Some(root) = self.root.as_ref().filter(|r| r.path.retransmitter == peer) {
            if !failed.iter().any(|f| f.destination == root.root) {
                failed.push(FailedDestination::new(root.root, root.path.seqno.wrapping_add(1)));
            }
        }
        failed
    }

    /// Number of reactive entries, expired ones included
    pub fn reactive_len(&self) -> usize {
        self.routes.len()
    }

    /// Every entry, for reporting
    pub fn snapshot(&self, now: Duration) -> Vec<RouteSnapshot> {
        let row = |destination: MacAddress, path: &Path, proactive: bool| RouteSnapshot {
            destination,
            retransmitter: path.retransmitter,
            interface: path.interface,
            metric: path.metric,
            seqno: path.seqno,
            lifetime_ms: path.expires_at.saturating_sub(now).as_millis() as u64,
            proactive,
            precursors: path.live_precursors(now).count(),
        };
        let mut rows: Vec<RouteSnapshot> = self
            .routes
            .iter()
            .map(|(destination, path)| row(*destination, path, false))
            .collect();
        if let Some(root) = &self.root {
            rows.push(row(root.root, &root.path, true));
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIFETIME: Duration = Duration::from_secs(5);

    fn addr(i: u32) -> MacAddress {
        MacAddress::from_index(i)
    }

    #[test]
    fn test_seqno_wraparound() {
        assert!(seqno_newer(5, 3));
        assert!(!seqno_newer(3, 5));
        assert!(!seqno_newer(3, 3));
        assert!(seqno_newer(2, u32::MAX - 1));
        assert!(!seqno_newer(u32::MAX - 1, 2));
    }

    #[test]
    fn test_no_stale_overwrite() {
        let mut table = HwmpRtable::new();
        let now = Duration::ZERO;
        assert!(table.add_reactive_path(addr(9), addr(2), 1, 100, LIFETIME, 5, now));
        let before = table.lookup_reactive(addr(9), now).unwrap();

        assert!(!table.add_reactive_path(addr(9), addr(3), 1, 1, LIFETIME, 3, now));
        assert_eq!(table.lookup_reactive(addr(9), now).unwrap(), before);
    }

    #[test]
    fn test_equal_seqno_lower_metric_wins() {
        let mut table = HwmpRtable::new();
        let now = Duration::ZERO;
        table.add_reactive_path(addr(9), addr(2), 1, 100, LIFETIME, 7, now);
        assert!(table.add_reactive_path(addr(9), addr(3), 1, 60, LIFETIME, 7, now));
        let result = table.lookup_reactive(addr(9), now).unwrap();
        assert_eq!(result.metric, 60);
        assert_eq!(result.retransmitter, addr(3));

        // Equal metric is not an improvement.
        assert!(!table.add_reactive_path(addr(9), addr(4), 1, 60, LIFETIME, 7, now));
        assert_eq!(table.lookup_reactive(addr(9), now).unwrap().retransmitter, addr(3));
    }

    #[test]
    fn test_freshness_monotonicity() {
        let updates: [(u32, u32); 9] = [
            (1, 50),
            (1, 40),
            (2, 90),
            (2, 95),
            (2, 80),
            (4, 200),
            (3, 10),
            (4, 150),
            (4, 175),
        ];
        let mut table = HwmpRtable::new();
        let now = Duration::ZERO;
        for (n, &(seqno, metric)) in updates.iter().enumerate() {
            table.add_reactive_path(addr(9), addr(2), 1, metric, LIFETIME, seqno, now);
            table.add_proactive_path(metric, addr(9), addr(2), 1, LIFETIME, seqno, now);

            let seen = &updates[..=n];
            let best_seqno = seen.iter().map(|u| u.0).max().unwrap();
            let best_metric = seen
                .iter()
                .filter(|u| u.0 == best_seqno)
                .map(|u| u.1)
                .min()
                .unwrap();
            let reactive = table.lookup_reactive(addr(9), now).unwrap();
            let proactive = table.lookup_proactive(now).unwrap();
            assert_eq!((reactive.seqno, reactive.metric), (best_seqno, best_metric));
            assert_eq!((proactive.seqno, proactive.metric), (best_seqno, best_metric));
        }
    }

    #[test]
    fn test_expired_lookup() {
        let mut table = HwmpRtable::new();
        table.add_reactive_path(addr(9), addr(2), 1, 10, LIFETIME, 1, Duration::ZERO);
        let later = Duration::from_secs(6);
        assert!(table.lookup_reactive(addr(9), later).is_none());
        let stale = table.lookup_reactive_expired(addr(9), later).unwrap();
        assert!(stale.is_expired());
        assert!(table.lookup_reactive_expired(addr(8), later).is_none());

        // An expired entry is replaced even by an older update.
        assert!(table.add_reactive_path(addr(9), addr(3), 1, 500, LIFETIME, 0, later));
        assert_eq!(table.lookup_reactive(addr(9), later).unwrap().retransmitter, addr(3));
    }

    #[test]
    fn test_precursors_are_deduplicated() {
        let mut table = HwmpRtable::new();
        let now = Duration::ZERO;
        table.add_reactive_path(addr(9), addr(2), 1, 10, LIFETIME, 1, now);
        table.add_precursor(addr(9), 1, addr(5), Duration::from_secs(1), now);
        table.add_precursor(addr(9), 1, addr(5), Duration::from_secs(3), now);
        table.add_precursor(addr(9), 2, addr(5), Duration::from_secs(1), now);
        assert_eq!(table.get_precursors(addr(9), now).len(), 2);

        let later = Duration::from_secs(2);
        assert_eq!(
            table.get_precursors(addr(9), later),
            vec![Precursor::new(1, addr(5))]
        );
        assert!(table.get_precursors(addr(8), now).is_empty());
    }

    #[test]
    fn test_precursors_survive_path_update() {
        let mut table = HwmpRtable::new();
        let now = Duration::ZERO;
        table.add_reactive_path(addr(9), addr(2), 1, 10, LIFETIME, 1, now);
        table.add_precursor(addr(9), 1, addr(5), LIFETIME, now);
        table.add_reactive_path(addr(9), addr(3), 1, 10, LIFETIME, 2, now);
        assert_eq!(table.get_precursors(addr(9), now).len(), 1);
    }

    #[test]
    fn test_unreachable_destinations() {
        let mut table = HwmpRtable::new();
        let now = Duration::ZERO;
        table.add_reactive_path(addr(7), addr(2), 1, 10, LIFETIME, 4, now);
        table.add_reactive_path(addr(8), addr(2), 1, 10, LIFETIME, 9, now);
        table.add_reactive_path(addr(9), addr(3), 1, 10, LIFETIME, 1, now);
        table.add_proactive_path(10, addr(10), addr(2), 1, LIFETIME, 6, now);

        let failed = table.get_unreachable_destinations(addr(2));
        assert_eq!(
            failed,
            vec![
                FailedDestination::new(addr(7), 5),
                FailedDestination::new(addr(8), 10),
                FailedDestination::new(addr(10), 7),
            ]
        );
        assert!(table.get_unreachable_destinations(addr(4)).is_empty());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut table = HwmpRtable::new();
        table.add_reactive_path(addr(9), addr(2), 1, 10, LIFETIME, 1, Duration::ZERO);
        assert!(table.delete_reactive_path(addr(9)));
        assert!(!table.delete_reactive_path(addr(9)));
        assert_eq!(table.reactive_len(), 0);
    }

    #[test]
    fn test_proactive_root_switch() {
        let mut table = HwmpRtable::new();
        let now = Duration::ZERO;
        assert!(table.add_proactive_path(100, addr(1), addr(2), 1, LIFETIME, 3, now));
        // Another root must be strictly cheaper.
        assert!(!table.add_proactive_path(100, addr(5), addr(3), 1, LIFETIME, 50, now));
        assert!(table.add_proactive_path(90, addr(5), addr(3), 1, LIFETIME, 50, now));
        assert_eq!(table.root(), Some(addr(5)));

        table.delete_proactive_path_to(addr(1));
        assert_eq!(table.root(), Some(addr(5)));
        table.delete_proactive_path_to(addr(5));
        assert!(table.lookup_proactive_expired(now).is_none());
    }

    #[test]
    fn test_snapshot() {
        let mut table = HwmpRtable::new();
        let now = Duration::ZERO;
        table.add_reactive_path(addr(9), addr(2), 1, 10, LIFETIME, 1, now);
        table.add_proactive_path(20, addr(1), addr(2), 1, LIFETIME, 1, now);
        let rows = table.snapshot(Duration::from_secs(1));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].lifetime_ms, 4000);
        assert!(rows[1].proactive);
    }
}
