//! Peer link finite state machine.
//!
//! One [`PeerLink`] exists per (interface, peer) pair. It runs the
//! Open/Confirm/Close handshake, owns the retry, confirm, holding and beacon
//! loss timers, and reports every state change and every frame it wants sent
//! through an output queue drained by the peer management protocol.

use crate::config::PeerLinkConfig;
use crate::link_quality::LinkQuality;
use mesh_wire::{IeBeaconTiming, IeConfiguration, IePeerManagement, MacAddress, PmpReasonCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Peer link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerLinkState {
    /// No handshake in progress
    Idle,
    /// Open sent, waiting for Confirm
    OpnSnt,
    /// Confirm received, waiting for the peer's Open
    CnfRcvd,
    /// Open received and confirmed, waiting for Confirm
    OpnRcvd,
    /// Link established
    Estab,
    /// Close sent, waiting before release
    Holding,
}

impl fmt::Display for PeerLinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerLinkState::Idle => "IDLE",
            PeerLinkState::OpnSnt => "OPN_SNT",
            PeerLinkState::CnfRcvd => "CNF_RCVD",
            PeerLinkState::OpnRcvd => "OPN_RCVD",
            PeerLinkState::Estab => "ESTAB",
            PeerLinkState::Holding => "HOLDING",
        };
        write!(f, "{}", name)
    }
}

/// Input of the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLinkEvent {
    /// Local cancellation
    Cancel(PmpReasonCode),
    /// Local active open
    ActiveOpen,
    /// Acceptable Open received
    OpenAccept,
    /// Unacceptable Open received
    OpenReject(PmpReasonCode),
    /// Acceptable Confirm received
    ConfirmAccept,
    /// Unacceptable Confirm received
    ConfirmReject(PmpReasonCode),
    /// Close received
    CloseAccept,
    /// Request refused before any handshake
    RequestReject(PmpReasonCode),
    /// Retry timer expired with retries left
    RetryTimeout,
    /// Retry timer expired with no retries left
    RetryExhausted,
    /// Confirm timer expired
    ConfirmTimeout,
    /// Holding timer expired
    HoldingTimeout,
}

/// Output of the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerLinkOutput {
    /// Peering management element to send to the peer
    Send {
        /// Element to send
        pm: IePeerManagement,
        /// Association id we assigned to the peer
        aid: u16,
    },
    /// The link moved between states (possibly the same one)
    StateChanged {
        /// Previous state
        old: PeerLinkState,
        /// New state
        new: PeerLinkState,
    },
}

/// One peer link
#[derive(Debug, Clone)]
pub struct PeerLink {
    interface: u32,
    peer: MacAddress,
    peer_mesh_point: MacAddress,
    local_link_id: u16,
    peer_link_id: u16,
    local_aid: u16,
    peer_aid: u16,
    state: PeerLinkState,
    retry_counter: u16,
    last_beacon: Duration,
    beacon_interval: Duration,
    beacon_timing: IeBeaconTiming,
    peer_config: Option<IeConfiguration>,
    quality: LinkQuality,
    config: PeerLinkConfig,
    retry_deadline: Option<Duration>,
    confirm_deadline: Option<Duration>,
    holding_deadline: Option<Duration>,
    beacon_loss_deadline: Option<Duration>,
    outputs: Vec<PeerLinkOutput>,
}

impl PeerLink {
    /// Create an idle link. A broadcast `peer_mesh_point` is learned from the first frame.
    pub fn new(
        interface: u32,
        peer: MacAddress,
        peer_mesh_point: MacAddress,
        local_link_id: u16,
        local_aid: u16,
        config: PeerLinkConfig,
    ) -> Self {
        Self {
            interface,
            peer,
            peer_mesh_point,
            local_link_id,
            peer_link_id: 0,
            local_aid,
            peer_aid: 0,
            state: PeerLinkState::Idle,
            retry_counter: 0,
            last_beacon: Duration::ZERO,
            beacon_interval: Duration::ZERO,
            beacon_timing: IeBeaconTiming::new(),
            peer_config: None,
            quality: LinkQuality::new(),
            config,
            retry_deadline: None,
            confirm_deadline: None,
            holding_deadline: None,
            beacon_loss_deadline: None,
            outputs: Vec::new(),
        }
    }

    /// Interface of the link
    pub fn interface(&self) -> u32 {
        self.interface
    }

    /// Peer interface address
    pub fn peer(&self) -> MacAddress {
        self.peer
    }

    /// Peer mesh point address
    pub fn peer_mesh_point(&self) -> MacAddress {
        self.peer_mesh_point
    }

    /// Our link id
    pub fn local_link_id(&self) -> u16 {
        self.local_link_id
    }

    /// Peer's link id, zero until learned
    pub fn peer_link_id(&self) -> u16 {
        self.peer_link_id
    }

    /// Association id we assigned to the peer
    pub fn local_aid(&self) -> u16 {
        self.local_aid
    }

    /// Association id the peer assigned to us, zero until confirmed
    pub fn peer_aid(&self) -> u16 {
        self.peer_aid
    }

    /// Current state
    pub fn state(&self) -> PeerLinkState {
        self.state
    }

    /// Open retransmissions so far
    pub fn retry_counter(&self) -> u16 {
        self.retry_counter
    }

    /// True once the handshake completed
    pub fn is_established(&self) -> bool {
        self.state == PeerLinkState::Estab
    }

    /// True when nothing is in progress
    pub fn is_idle(&self) -> bool {
        self.state == PeerLinkState::Idle
    }

    /// Reception time of the peer's last beacon
    pub fn last_beacon(&self) -> Duration {
        self.last_beacon
    }

    /// Peer's beacon interval
    pub fn beacon_interval(&self) -> Duration {
        self.beacon_interval
    }

    /// Beacon timing element last reported by the peer
    pub fn beacon_timing_element(&self) -> &IeBeaconTiming {
        &self.beacon_timing
    }

    /// Configuration last advertised by the peer
    pub fn peer_config(&self) -> Option<&IeConfiguration> {
        self.peer_config.as_ref()
    }

    /// Delivery statistics of frames sent to the peer
    pub fn quality(&self) -> &LinkQuality {
        &self.quality
    }

    /// Mutable delivery statistics
    pub fn quality_mut(&mut self) -> &mut LinkQuality {
        &mut self.quality
    }

    /// Remember the peer's beacon timing report
    pub fn set_beacon_timing_element(&mut self, timing: IeBeaconTiming) {
        self.beacon_timing = timing;
    }

    /// Record a beacon from the peer and re-arm the beacon loss timer
    pub fn set_beacon_information(&mut self, last_beacon: Duration, interval: Duration, now: Duration) {
        self.last_beacon = last_beacon;
        self.beacon_interval = interval;
        let loss = interval.saturating_mul(u32::from(self.config.max_beacon_loss));
        self.beacon_loss_deadline = Some(now.saturating_add(loss));
    }

    /// Start the handshake
    pub fn mlme_active_peer_link_open(&mut self, now: Duration) {
        self.state_machine(PeerLinkEvent::ActiveOpen, now);
    }

    /// Tear the link down locally
    pub fn mlme_cancel_peer_link(&mut self, reason: PmpReasonCode, now: Duration) {
        self.state_machine(PeerLinkEvent::Cancel(reason), now);
    }

    /// Acceptable Open from the peer
    pub fn open_accept(
        &mut self,
        local_link_id: u16,
        config: IeConfiguration,
        peer_mesh_point: MacAddress,
        now: Duration,
    ) {
        if !self.learn_mesh_point(peer_mesh_point) {
            return;
        }
        if self.peer_link_id == 0 {
            self.peer_link_id = local_link_id;
        }
        self.peer_config = Some(config);
        self.state_machine(PeerLinkEvent::OpenAccept, now);
    }

    /// Open from the peer that we refuse.
    ///
    /// On an idle link this is a request refusal: a Close is sent and the
    /// link stays idle.
    pub fn open_reject(
        &mut self,
        local_link_id: u16,
        config: IeConfiguration,
        peer_mesh_point: MacAddress,
        reason: PmpReasonCode,
        now: Duration,
    ) {
        if !self.learn_mesh_point(peer_mesh_point) {
            return;
        }
        if self.peer_link_id == 0 {
            self.peer_link_id = local_link_id;
        }
        self.peer_config = Some(config);
        let event = if self.state == PeerLinkState::Idle {
            PeerLinkEvent::RequestReject(reason)
        } else {
            PeerLinkEvent::OpenReject(reason)
        };
        self.state_machine(event, now);
    }

    /// Confirm from the peer
    pub fn confirm_accept(
        &mut self,
        local_link_id: u16,
        peer_link_id: u16,
        peer_aid: u16,
        config: IeConfiguration,
        peer_mesh_point: MacAddress,
        now: Duration,
    ) {
        if !self.link_ids_match(local_link_id, peer_link_id, false) {
            return;
        }
        if !self.learn_mesh_point(peer_mesh_point) {
            return;
        }
        self.peer_aid = peer_aid;
        self.peer_config = Some(config);
        self.state_machine(PeerLinkEvent::ConfirmAccept, now);
    }

    /// Confirm from the peer that we refuse
    pub fn confirm_reject(
        &mut self,
        local_link_id: u16,
        peer_link_id: u16,
        peer_aid: u16,
        config: IeConfiguration,
        peer_mesh_point: MacAddress,
        reason: PmpReasonCode,
        now: Duration,
    ) {
        if !self.link_ids_match(local_link_id, peer_link_id, false) {
            return;
        }
        if !self.learn_mesh_point(peer_mesh_point) {
            return;
        }
        self.peer_aid = peer_aid;
        self.peer_config = Some(config);
        self.state_machine(PeerLinkEvent::ConfirmReject(reason), now);
    }

    /// Close from the peer. A zero peer link id matches any link.
    pub fn close(
        &mut self,
        local_link_id: u16,
        peer_link_id: u16,
        reason: PmpReasonCode,
        now: Duration,
    ) {
        if !self.link_ids_match(local_link_id, peer_link_id, true) {
            return;
        }
        debug!(
            "Close from {} on interface {}: {}",
            self.peer, self.interface, reason
        );
        self.state_machine(PeerLinkEvent::CloseAccept, now);
    }

    /// Earliest armed timer
    pub fn next_timeout(&self) -> Option<Duration> {
        [
            self.retry_deadline,
            self.confirm_deadline,
            self.holding_deadline,
            self.beacon_loss_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Fire every timer due at `now`
    pub fn handle_timeouts(&mut self, now: Duration) {
        if take_due(&mut self.holding_deadline, now) {
            self.state_machine(PeerLinkEvent::HoldingTimeout, now);
        }
        if take_due(&mut self.confirm_deadline, now) {
            self.state_machine(PeerLinkEvent::ConfirmTimeout, now);
        }
        if take_due(&mut self.retry_deadline, now) {
            let event = if self.retry_counter < self.config.max_retries {
                PeerLinkEvent::RetryTimeout
            } else {
                PeerLinkEvent::RetryExhausted
            };
            self.state_machine(event, now);
        }
        if take_due(&mut self.beacon_loss_deadline, now) {
            info!(
                "Beacon loss from {} on interface {}, cancelling link",
                self.peer, self.interface
            );
            self.state_machine(PeerLinkEvent::Cancel(PmpReasonCode::PeeringCancelled), now);
        }
    }

    /// Take the queued outputs
    pub fn drain_outputs(&mut self) -> Vec<PeerLinkOutput> {
        std::mem::take(&mut self.outputs)
    }

    /// Apply one event. Events a state does not react to are ignored.
    pub fn state_machine(&mut self, event: PeerLinkEvent, now: Duration) {
        use PeerLinkEvent as E;
        use PeerLinkState as S;

        match (self.state, event) {
            (S::Idle, E::Cancel(_)) | (S::Idle, E::CloseAccept) => {
                self.change_state(S::Idle);
            }
            (S::Idle, E::RequestReject(reason)) => {
                self.send_close(reason);
            }
            (S::Idle, E::ActiveOpen) => {
                self.change_state(S::OpnSnt);
                self.send_open();
                self.set_retry_timer(now);
            }
            (S::Idle, E::OpenAccept) => {
                self.change_state(S::OpnRcvd);
                self.send_confirm();
                self.send_open();
                self.set_retry_timer(now);
            }

            (S::OpnSnt, E::RetryTimeout) | (S::OpnRcvd, E::RetryTimeout) => {
                self.send_open();
                self.retry_counter += 1;
                self.set_retry_timer(now);
            }
            (S::OpnSnt, E::ConfirmAccept) => {
                self.change_state(S::CnfRcvd);
                self.retry_deadline = None;
                self.confirm_deadline = Some(now + self.config.confirm_timeout);
            }
            (S::OpnSnt, E::OpenAccept) => {
                self.change_state(S::OpnRcvd);
                self.send_confirm();
            }
            (S::OpnSnt, E::CloseAccept) | (S::OpnRcvd, E::CloseAccept) => {
                self.enter_holding(PmpReasonCode::CloseRcvd, now);
            }
            (S::OpnSnt, E::OpenReject(reason))
            | (S::OpnSnt, E::ConfirmReject(reason))
            | (S::OpnRcvd, E::OpenReject(reason))
            | (S::OpnRcvd, E::ConfirmReject(reason)) => {
                self.enter_holding(reason, now);
            }
            (S::OpnSnt, E::RetryExhausted) | (S::OpnRcvd, E::RetryExhausted) => {
                warn!(
                    "Peer link to {} on interface {} exhausted {} retries",
                    self.peer, self.interface, self.retry_counter
                );
                self.enter_holding(PmpReasonCode::MaxRetries, now);
            }
            (S::OpnSnt, E::Cancel(reason)) | (S::OpnRcvd, E::Cancel(reason)) => {
                self.enter_holding(reason, now);
            }

            (S::CnfRcvd, E::ConfirmAccept) => {}
            (S::CnfRcvd, E::OpenAccept) => {
                self.change_state(S::Estab);
                self.confirm_deadline = None;
                self.send_confirm();
            }
            (S::CnfRcvd, E::CloseAccept) => {
                self.enter_holding(PmpReasonCode::CloseRcvd, now);
            }
            (S::CnfRcvd, E::OpenReject(reason)) | (S::CnfRcvd, E::ConfirmReject(reason)) => {
                self.enter_holding(reason, now);
            }
            (S::CnfRcvd, E::Cancel(reason)) => {
                self.enter_holding(reason, now);
            }
            (S::CnfRcvd, E::ConfirmTimeout) => {
                self.enter_holding(PmpReasonCode::ConfirmTimeout, now);
            }

            (S::OpnRcvd, E::ConfirmAccept) => {
                self.change_state(S::Estab);
                self.retry_deadline = None;
            }

            (S::Estab, E::OpenAccept) => {
                self.send_confirm();
            }
            (S::Estab, E::CloseAccept) => {
                self.enter_holding(PmpReasonCode::CloseRcvd, now);
            }
            (S::Estab, E::OpenReject(reason)) | (S::Estab, E::ConfirmReject(reason)) => {
                self.enter_holding(reason, now);
            }
            (S::Estab, E::Cancel(reason)) => {
                self.enter_holding(reason, now);
            }

            (S::Holding, E::CloseAccept) | (S::Holding, E::HoldingTimeout) => {
                self.holding_deadline = None;
                self.change_state(S::Idle);
            }
            (S::Holding, E::OpenAccept) | (S::Holding, E::ConfirmAccept) => {
                self.send_close(PmpReasonCode::PeeringCancelled);
            }
            (S::Holding, E::OpenReject(reason)) | (S::Holding, E::ConfirmReject(reason)) => {
                self.send_close(reason);
            }

            (state, event) => {
                debug!(
                    "Peer link {} on interface {} ignores {:?} in {}",
                    self.peer, self.interface, event, state
                );
            }
        }
    }

    fn enter_holding(&mut self, reason: PmpReasonCode, now: Duration) {
        self.retry_deadline = None;
        self.confirm_deadline = None;
        self.change_state(PeerLinkState::Holding);
        self.send_close(reason);
        self.holding_deadline = Some(now + self.config.holding_timeout);
    }

    fn set_retry_timer(&mut self, now: Duration) {
        self.retry_deadline = Some(now + self.config.retry_timeout);
    }

    fn change_state(&mut self, new: PeerLinkState) {
        let old = self.state;
        self.state = new;
        if old != new {
            debug!(
                "Peer link {} on interface {}: {} -> {}",
                self.peer, self.interface, old, new
            );
        }
        if new == PeerLinkState::Idle {
            self.beacon_loss_deadline = None;
        }
        self.outputs.push(PeerLinkOutput::StateChanged { old, new });
    }

    fn send_open(&mut self) {
        self.outputs.push(PeerLinkOutput::Send {
            pm: IePeerManagement::open(self.local_link_id),
            aid: self.local_aid,
        });
    }

    fn send_confirm(&mut self) {
        self.outputs.push(PeerLinkOutput::Send {
            pm: IePeerManagement::confirm(self.local_link_id, self.peer_link_id),
            aid: self.local_aid,
        });
    }

    fn send_close(&mut self, reason: PmpReasonCode) {
        self.outputs.push(PeerLinkOutput::Send {
            pm: IePeerManagement::close(self.local_link_id, self.peer_link_id, reason),
            aid: self.local_aid,
        });
    }

    fn learn_mesh_point(&mut self, peer_mesh_point: MacAddress) -> bool {
        if self.peer_mesh_point.is_broadcast() {
            self.peer_mesh_point = peer_mesh_point;
            return true;
        }
        if self.peer_mesh_point != peer_mesh_point {
            warn!(
                "Peer {} changed mesh point from {} to {}, frame ignored",
                self.peer, self.peer_mesh_point, peer_mesh_point
            );
            return false;
        }
        true
    }

    /// `local_link_id` and `peer_link_id` are as seen by the sender
    fn link_ids_match(&mut self, local_link_id: u16, peer_link_id: u16, wildcard: bool) -> bool {
        let addressed_to_us = if wildcard {
            peer_link_id == 0 || peer_link_id == self.local_link_id
        } else {
            peer_link_id == self.local_link_id
        };
        if !addressed_to_us {
            debug!(
                "Link id {} from {} does not match ours ({})",
                peer_link_id, self.peer, self.local_link_id
            );
            return false;
        }
        if self.peer_link_id == 0 {
            self.peer_link_id = local_link_id;
        } else if self.peer_link_id != local_link_id {
            debug!(
                "Peer link id {} from {} does not match {}",
                local_link_id, self.peer, self.peer_link_id
            );
            return false;
        }
        true
    }
}

fn take_due(deadline: &mut Option<Duration>, now: Duration) -> bool {
    match deadline {
        Some(at) if *at <= now => {
            *deadline = None;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_wire::PeerManagementSubtype;

    const T0: Duration = Duration::ZERO;

    fn link() -> PeerLink {
        PeerLink::new(
            0,
            MacAddress::from_index(2),
            MacAddress::BROADCAST,
            7,
            1,
            PeerLinkConfig::default(),
        )
    }

    fn sent(outputs: &[PeerLinkOutput]) -> Vec<PeerManagementSubtype> {
        outputs
            .iter()
            .filter_map(|o| match o {
                PeerLinkOutput::Send { pm, .. } => Some(pm.subtype()),
                _ => None,
            })
            .collect()
    }

    fn last_close_reason(outputs: &[PeerLinkOutput]) -> Option<PmpReasonCode> {
        outputs.iter().rev().find_map(|o| match o {
            PeerLinkOutput::Send { pm, .. } if pm.subtype_is_close() => Some(pm.reason_code()),
            _ => None,
        })
    }

    fn config() -> IeConfiguration {
        IeConfiguration::default()
    }

    #[test]
    fn test_initiator_handshake() {
        let mut link = link();
        link.mlme_active_peer_link_open(T0);
        assert_eq!(link.state(), PeerLinkState::OpnSnt);
        assert_eq!(sent(&link.drain_outputs()), vec![PeerManagementSubtype::Open]);

        link.confirm_accept(9, 7, 3, config(), MacAddress::from_index(20), T0);
        assert_eq!(link.state(), PeerLinkState::CnfRcvd);
        assert_eq!(link.peer_link_id(), 9);
        assert_eq!(link.peer_aid(), 3);

        link.open_accept(9, config(), MacAddress::from_index(20), T0);
        assert_eq!(link.state(), PeerLinkState::Estab);
        let outputs = link.drain_outputs();
        assert_eq!(sent(&outputs), vec![PeerManagementSubtype::Confirm]);
        assert!(outputs.contains(&PeerLinkOutput::StateChanged {
            old: PeerLinkState::CnfRcvd,
            new: PeerLinkState::Estab,
        }));
        assert_eq!(link.peer_mesh_point(), MacAddress::from_index(20));
    }

    #[test]
    fn test_responder_handshake() {
        let mut link = link();
        link.open_accept(9, config(), MacAddress::from_index(20), T0);
        assert_eq!(link.state(), PeerLinkState::OpnRcvd);
        assert_eq!(
            sent(&link.drain_outputs()),
            vec![PeerManagementSubtype::Confirm, PeerManagementSubtype::Open]
        );

        link.confirm_accept(9, 7, 3, config(), MacAddress::from_index(20), T0);
        assert!(link.is_established());
        assert_eq!(link.next_timeout(), None);
    }

    #[test]
    fn test_confirm_with_wrong_link_id_ignored() {
        let mut link = link();
        link.mlme_active_peer_link_open(T0);
        link.confirm_accept(9, 8, 3, config(), MacAddress::from_index(20), T0);
        assert_eq!(link.state(), PeerLinkState::OpnSnt);
    }

    #[test]
    fn test_retries_then_holding_then_idle() {
        let mut link = link();
        link.mlme_active_peer_link_open(T0);
        let retry = PeerLinkConfig::default().retry_timeout;
        let mut now = T0;
        for expected in 1..=4 {
            now += retry;
            link.handle_timeouts(now);
            assert_eq!(link.retry_counter(), expected);
            assert_eq!(link.state(), PeerLinkState::OpnSnt);
        }
        link.drain_outputs();

        now += retry;
        link.handle_timeouts(now);
        assert_eq!(link.state(), PeerLinkState::Holding);
        assert_eq!(
            last_close_reason(&link.drain_outputs()),
            Some(PmpReasonCode::MaxRetries)
        );

        now += PeerLinkConfig::default().holding_timeout;
        link.handle_timeouts(now);
        assert!(link.is_idle());
        assert_eq!(link.next_timeout(), None);
    }

    #[test]
    fn test_confirm_timeout() {
        let mut link = link();
        link.mlme_active_peer_link_open(T0);
        link.confirm_accept(9, 7, 3, config(), MacAddress::from_index(20), T0);
        link.drain_outputs();

        link.handle_timeouts(PeerLinkConfig::default().confirm_timeout);
        assert_eq!(link.state(), PeerLinkState::Holding);
        assert_eq!(
            last_close_reason(&link.drain_outputs()),
            Some(PmpReasonCode::ConfirmTimeout)
        );
    }

    #[test]
    fn test_close_from_established() {
        let mut link = link();
        link.open_accept(9, config(), MacAddress::from_index(20), T0);
        link.confirm_accept(9, 7, 3, config(), MacAddress::from_index(20), T0);
        link.drain_outputs();

        // A close for another link id is not ours
        link.close(9, 6, PmpReasonCode::PeeringCancelled, T0);
        assert!(link.is_established());

        link.close(9, 7, PmpReasonCode::PeeringCancelled, T0);
        assert_eq!(link.state(), PeerLinkState::Holding);
        let outputs = link.drain_outputs();
        assert_eq!(last_close_reason(&outputs), Some(PmpReasonCode::CloseRcvd));
        assert!(outputs.contains(&PeerLinkOutput::StateChanged {
            old: PeerLinkState::Estab,
            new: PeerLinkState::Holding,
        }));

        link.close(9, 0, PmpReasonCode::CloseRcvd, T0);
        assert!(link.is_idle());
    }

    #[test]
    fn test_request_reject_keeps_idle() {
        let mut link = link();
        link.open_reject(9, config(), MacAddress::from_index(20), PmpReasonCode::MaxPeers, T0);
        assert!(link.is_idle());
        assert_eq!(
            last_close_reason(&link.drain_outputs()),
            Some(PmpReasonCode::MaxPeers)
        );
    }

    #[test]
    fn test_beacon_loss_cancels() {
        let mut link = link();
        let interval = Duration::from_millis(100);
        link.set_beacon_information(T0, interval, T0);
        link.open_accept(9, config(), MacAddress::from_index(20), T0);
        link.confirm_accept(9, 7, 3, config(), MacAddress::from_index(20), T0);
        assert_eq!(link.next_timeout(), Some(interval * 2));

        link.set_beacon_information(interval, interval, interval);
        link.handle_timeouts(interval * 2);
        assert!(link.is_established());

        link.handle_timeouts(interval * 3);
        assert_eq!(link.state(), PeerLinkState::Holding);
        assert_eq!(
            last_close_reason(&link.drain_outputs()),
            Some(PmpReasonCode::PeeringCancelled)
        );
    }

    #[test]
    fn test_mesh_point_change_ignored() {
        let mut link = link();
        link.open_accept(9, config(), MacAddress::from_index(20), T0);
        link.confirm_accept(9, 7, 3, config(), MacAddress::from_index(21), T0);
        assert_eq!(link.state(), PeerLinkState::OpnRcvd);
    }

    fn drive_to(state: PeerLinkState) -> PeerLink {
        let mut link = link();
        let mp = MacAddress::from_index(20);
        match state {
            PeerLinkState::Idle => {}
            PeerLinkState::OpnSnt => link.mlme_active_peer_link_open(T0),
            PeerLinkState::CnfRcvd => {
                link.mlme_active_peer_link_open(T0);
                link.confirm_accept(9, 7, 3, config(), mp, T0);
            }
            PeerLinkState::OpnRcvd => link.open_accept(9, config(), mp, T0),
            PeerLinkState::Estab => {
                link.open_accept(9, config(), mp, T0);
                link.confirm_accept(9, 7, 3, config(), mp, T0);
            }
            PeerLinkState::Holding => {
                link.mlme_active_peer_link_open(T0);
                link.mlme_cancel_peer_link(PmpReasonCode::PeeringCancelled, T0);
            }
        }
        assert_eq!(link.state(), state);
        link
    }

    #[test]
    fn test_every_event_in_every_state_lands_in_a_state() {
        let states = [
            PeerLinkState::Idle,
            PeerLinkState::OpnSnt,
            PeerLinkState::CnfRcvd,
            PeerLinkState::OpnRcvd,
            PeerLinkState::Estab,
            PeerLinkState::Holding,
        ];
        let events = [
            PeerLinkEvent::Cancel(PmpReasonCode::PeeringCancelled),
            PeerLinkEvent::ActiveOpen,
            PeerLinkEvent::OpenAccept,
            PeerLinkEvent::OpenReject(PmpReasonCode::InconsistentParameters),
            PeerLinkEvent::ConfirmAccept,
            PeerLinkEvent::ConfirmReject(PmpReasonCode::InconsistentParameters),
            PeerLinkEvent::CloseAccept,
            PeerLinkEvent::RequestReject(PmpReasonCode::MaxPeers),
            PeerLinkEvent::RetryTimeout,
            PeerLinkEvent::RetryExhausted,
            PeerLinkEvent::ConfirmTimeout,
            PeerLinkEvent::HoldingTimeout,
        ];
        for state in states {
            for event in events {
                let mut link = drive_to(state);
                link.state_machine(event, T0);
                assert!(states.contains(&link.state()));
                // Holding always has its release timer armed
                if link.state() == PeerLinkState::Holding {
                    assert!(link.next_timeout().is_some());
                }
            }
        }
    }

    #[test]
    fn test_cancel_from_any_non_idle_state_reaches_holding() {
        for state in [
            PeerLinkState::OpnSnt,
            PeerLinkState::CnfRcvd,
            PeerLinkState::OpnRcvd,
            PeerLinkState::Estab,
        ] {
            let mut link = drive_to(state);
            link.drain_outputs();
            link.mlme_cancel_peer_link(PmpReasonCode::CapabilityPolicyViolation, T0);
            assert_eq!(link.state(), PeerLinkState::Holding);
            assert_eq!(
                last_close_reason(&link.drain_outputs()),
                Some(PmpReasonCode::CapabilityPolicyViolation)
            );
        }
    }
}
