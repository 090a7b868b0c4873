//! Marker state machine for a single process.
//!
//! [`Recorder`] implements the per-process half of the snapshot protocol
//! without doing any I/O. Every operation returns a [`Transition`]
//! describing the markers that must be sent; the caller performs the
//! sends after the call returns, so no handler state is ever borrowed
//! across a potentially blocking send.
//!
//! # States
//!
//! ```text
//!   Idle --initiate / first marker--> Recording --last marker--> Done
//!                                         ^                        |
//!                                         +--- newer round id -----+
//! ```
//!
//! A process with no incoming channels goes straight from `Idle` to
//! `Done` when it captures.

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;

use cutline_core::{
    ChannelError, ChannelId, ChannelState, InvalidTransition, Message, ProcessId, ProcessRecord,
    ProtocolFault, SnapshotId,
};

/// Where a process stands in the current round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No marker seen and not an initiator.
    Idle,
    /// Local state captured; listening on non-frozen incoming channels.
    Recording,
    /// Markers received on every incoming channel.
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Recording => write!(f, "recording"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Markers queued for sending: `(destination, marker)`.
pub type Outbox<P> = SmallVec<[(ProcessId, Message<P>); 4]>;

/// The externally visible effect of a recorder operation.
#[derive(Debug)]
pub struct Transition<P> {
    /// Markers to send, one per outgoing channel, in topology order.
    pub markers: Outbox<P>,
    /// Whether local state was captured by this operation.
    pub captured: bool,
    /// Whether this operation moved the process to `Done`.
    pub completed: bool,
}

impl<P> Transition<P> {
    fn none() -> Self {
        Self {
            markers: SmallVec::new(),
            captured: false,
            completed: false,
        }
    }
}

/// How an application message was classified on arrival.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// No round is recording; ordinary traffic.
    Untracked,
    /// Appended to the channel's log for the current round.
    Recorded,
    /// Arrived after this channel's marker; belongs to the next epoch.
    PostCut,
}

/// Per-process snapshot bookkeeping.
///
/// `P` is the application payload type and `S` the captured local-state
/// type. A recorder is owned by exactly one handler; it is not `Sync` by
/// intent and needs no internal locking.
#[derive(Debug)]
pub struct Recorder<P, S> {
    id: ProcessId,
    inbound: IndexSet<ProcessId>,
    outbound: IndexSet<ProcessId>,
    round: SnapshotId,
    phase: Phase,
    local_snapshot: Option<S>,
    marker_sent_to: IndexSet<ProcessId>,
    marker_received_from: IndexSet<ProcessId>,
    recording: IndexSet<ProcessId>,
    channel_states: IndexMap<ProcessId, ChannelState<P>>,
    /// Last marker received per incoming channel.
    inbound_epochs: IndexMap<ProcessId, SnapshotId>,
    /// Last marker sent per outgoing channel.
    outbound_epochs: IndexMap<ProcessId, SnapshotId>,
}

impl<P, S> Recorder<P, S> {
    /// Create an idle recorder for `id` with the given channel peers.
    ///
    /// `inbound` lists the senders of this process's incoming channels,
    /// `outbound` the receivers of its outgoing channels.
    pub fn new(
        id: ProcessId,
        inbound: impl IntoIterator<Item = ProcessId>,
        outbound: impl IntoIterator<Item = ProcessId>,
    ) -> Self {
        let inbound: IndexSet<ProcessId> = inbound.into_iter().collect();
        let outbound: IndexSet<ProcessId> = outbound.into_iter().collect();
        let channel_states = inbound
            .iter()
            .map(|&p| (p, ChannelState::new(p)))
            .collect();
        let inbound_epochs = inbound.iter().map(|&p| (p, SnapshotId::GENESIS)).collect();
        let outbound_epochs = outbound.iter().map(|&p| (p, SnapshotId::GENESIS)).collect();
        Self {
            id,
            inbound,
            outbound,
            round: SnapshotId::GENESIS,
            phase: Phase::Idle,
            local_snapshot: None,
            marker_sent_to: IndexSet::new(),
            marker_received_from: IndexSet::new(),
            recording: IndexSet::new(),
            channel_states,
            inbound_epochs,
            outbound_epochs,
        }
    }

    /// Start (or rejoin) round `snapshot` as an initiator.
    ///
    /// Calling this again for the round that is already active or already
    /// finished is a no-op: the returned transition sends nothing and
    /// captures nothing.
    pub fn initiate(
        &mut self,
        snapshot: SnapshotId,
        capture: impl FnOnce() -> S,
    ) -> Result<Transition<P>, InvalidTransition> {
        if snapshot.is_genesis() {
            return Err(InvalidTransition::GenesisRound);
        }
        if snapshot == self.round && self.phase != Phase::Idle {
            return Ok(Transition::none());
        }
        if self.phase == Phase::Recording {
            return Err(InvalidTransition::RoundInProgress {
                process: self.id,
                active: self.round,
                requested: snapshot,
            });
        }
        if snapshot <= self.round {
            return Err(InvalidTransition::StaleRound {
                requested: snapshot,
                latest: self.round,
            });
        }
        let mut transition = self.begin_round(snapshot, capture);
        transition.completed = self.check_done();
        Ok(transition)
    }

    /// Handle a marker for `snapshot` arriving on the channel from `sender`.
    ///
    /// The first marker of a round is an implicit initiation. Every
    /// marker freezes its own channel. All checks run before any
    /// mutation, so a fault leaves the recorder untouched.
    pub fn on_marker(
        &mut self,
        sender: ProcessId,
        snapshot: SnapshotId,
        capture: impl FnOnce() -> S,
    ) -> Result<Transition<P>, ProtocolFault> {
        let channel = ChannelId::new(sender, self.id);
        if !self.inbound.contains(&sender) {
            return Err(ProtocolFault::UnknownChannel {
                process: self.id,
                peer: sender,
            });
        }

        let starts_round = match self.phase {
            Phase::Recording => {
                if snapshot < self.round {
                    return Err(ProtocolFault::StaleMarker {
                        channel,
                        snapshot,
                        current: self.round,
                    });
                }
                if snapshot > self.round {
                    return Err(ProtocolFault::ConcurrentRound {
                        channel,
                        active: self.round,
                        incoming: snapshot,
                    });
                }
                if self.marker_received_from.contains(&sender) {
                    return Err(ProtocolFault::DuplicateMarker { channel, snapshot });
                }
                false
            }
            Phase::Idle | Phase::Done => {
                if self.phase == Phase::Done && snapshot == self.round {
                    return Err(ProtocolFault::DuplicateMarker { channel, snapshot });
                }
                if snapshot <= self.round {
                    return Err(ProtocolFault::StaleMarker {
                        channel,
                        snapshot,
                        current: self.round,
                    });
                }
                true
            }
        };

        let mut transition = if starts_round {
            self.begin_round(snapshot, capture)
        } else {
            Transition::none()
        };

        self.recording.shift_remove(&sender);
        if let Some(state) = self.channel_states.get_mut(&sender) {
            state.freeze();
        }
        self.marker_received_from.insert(sender);
        self.inbound_epochs.insert(sender, snapshot);
        transition.completed = self.check_done();
        Ok(transition)
    }

    /// Build an outgoing application message for `to`, stamped with the
    /// epoch of the last marker sent on that channel.
    pub fn stamp(&self, to: ProcessId, payload: P) -> Result<Message<P>, ChannelError> {
        let epoch = self
            .outbound_epochs
            .get(&to)
            .copied()
            .ok_or(ChannelError::UnknownChannel {
                channel: ChannelId::new(self.id, to),
            })?;
        Ok(Message::application(self.id, epoch, payload))
    }

    /// Confirm that the current round's marker was handed to the channel
    /// to `to`.
    ///
    /// Later application messages on that channel are stamped with the
    /// new epoch. A marker that was never confirmed leaves the channel in
    /// its previous epoch, so traffic sent after a failed marker send is
    /// still accepted by the receiver. Returns `false` if `to` is not an
    /// outgoing peer or no round has started.
    pub fn marker_sent(&mut self, to: ProcessId) -> bool {
        if self.phase == Phase::Idle || !self.outbound.contains(&to) {
            return false;
        }
        self.marker_sent_to.insert(to);
        self.outbound_epochs.insert(to, self.round);
        true
    }

    fn begin_round(&mut self, snapshot: SnapshotId, capture: impl FnOnce() -> S) -> Transition<P> {
        self.round = snapshot;
        self.phase = Phase::Recording;
        self.local_snapshot = Some(capture());
        self.marker_received_from.clear();
        self.marker_sent_to.clear();
        self.recording = self.inbound.clone();
        for state in self.channel_states.values_mut() {
            state.reset();
        }

        let markers = self
            .outbound
            .iter()
            .map(|&peer| (peer, Message::marker(self.id, snapshot)))
            .collect();
        Transition {
            markers,
            captured: true,
            completed: false,
        }
    }

    fn check_done(&mut self) -> bool {
        if self.phase == Phase::Recording && self.marker_received_from.len() == self.inbound.len() {
            self.phase = Phase::Done;
            return true;
        }
        false
    }

    /// This process's id.
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The active round, or the last finished one.
    pub fn round(&self) -> SnapshotId {
        self.round
    }

    /// Whether the current round is finished for this process.
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Local state captured for the current round.
    pub fn local_snapshot(&self) -> Option<&S> {
        self.local_snapshot.as_ref()
    }

    /// Recorded log of the channel from `sender`.
    pub fn channel_state(&self, sender: ProcessId) -> Option<&ChannelState<P>> {
        self.channel_states.get(&sender)
    }

    /// Outgoing channels whose marker for this round was confirmed sent.
    pub fn marker_sent_to(&self) -> &IndexSet<ProcessId> {
        &self.marker_sent_to
    }

    /// Incoming channels that delivered this round's marker.
    pub fn marker_received_from(&self) -> &IndexSet<ProcessId> {
        &self.marker_received_from
    }

    /// Incoming channels still accumulating messages for this round.
    pub fn recording(&self) -> &IndexSet<ProcessId> {
        &self.recording
    }

    /// Senders of incoming channels.
    pub fn inbound(&self) -> &IndexSet<ProcessId> {
        &self.inbound
    }

    /// Receivers of outgoing channels.
    pub fn outbound(&self) -> &IndexSet<ProcessId> {
        &self.outbound
    }

    /// Incoming channels whose marker for the current round is missing.
    pub fn awaiting_markers(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.inbound
            .iter()
            .copied()
            .filter(|p| !self.marker_received_from.contains(p))
    }
}

impl<P: Clone, S> Recorder<P, S> {
    /// Classify an application message from `sender` and record it if its
    /// channel is still recording.
    ///
    /// The message epoch must equal the last marker seen on the channel;
    /// anything else means the channel reordered a marker and a message.
    pub fn on_message(
        &mut self,
        sender: ProcessId,
        epoch: SnapshotId,
        payload: &P,
    ) -> Result<Delivery, ProtocolFault> {
        let channel = ChannelId::new(sender, self.id);
        let channel_epoch = self
            .inbound_epochs
            .get(&sender)
            .copied()
            .ok_or(ProtocolFault::UnknownChannel {
                process: self.id,
                peer: sender,
            })?;
        if epoch > channel_epoch {
            return Err(ProtocolFault::MarkerOvertaken {
                channel,
                message_epoch: epoch,
                channel_epoch,
            });
        }
        if epoch < channel_epoch {
            return Err(ProtocolFault::LateMessage {
                channel,
                message_epoch: epoch,
                channel_epoch,
            });
        }

        match self.phase {
            Phase::Recording if self.recording.contains(&sender) => {
                if let Some(state) = self.channel_states.get_mut(&sender) {
                    state.record(payload.clone());
                }
                Ok(Delivery::Recorded)
            }
            Phase::Recording => Ok(Delivery::PostCut),
            Phase::Idle | Phase::Done => Ok(Delivery::Untracked),
        }
    }
}

impl<P: Clone, S: Clone> Recorder<P, S> {
    /// The frozen output of the current round, once `Done`.
    pub fn frozen_record(&self) -> Option<ProcessRecord<P, S>> {
        if self.phase != Phase::Done {
            return None;
        }
        let local_state = self.local_snapshot.clone()?;
        let channels = self
            .channel_states
            .iter()
            .map(|(p, state)| (*p, state.to_vec()))
            .collect();
        Some(ProcessRecord {
            process: self.id,
            snapshot: self.round,
            local_state,
            channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn p(n: u32) -> ProcessId {
        ProcessId(n)
    }

    fn mesh(id: u32, n: u32) -> Recorder<&'static str, u32> {
        let peers: Vec<ProcessId> = (0..n).filter(|&i| i != id).map(ProcessId).collect();
        Recorder::new(p(id), peers.clone(), peers)
    }

    const R1: SnapshotId = SnapshotId(1);

    fn confirm<P, S>(r: &mut Recorder<P, S>, t: &Transition<P>) {
        for (to, _) in &t.markers {
            assert!(r.marker_sent(*to));
        }
    }

    // ── Initiation ─────────────────────────────────────────────

    #[test]
    fn initiate_captures_and_marks_every_outgoing_channel() {
        let mut r = mesh(0, 3);
        let t = r.initiate(R1, || 42).unwrap();
        assert!(t.captured);
        assert!(!t.completed);
        let dests: Vec<_> = t.markers.iter().map(|(d, _)| *d).collect();
        assert_eq!(dests, vec![p(1), p(2)]);
        assert!(t.markers.iter().all(|(_, m)| m.as_marker() == Some(R1)));
        assert_eq!(r.phase(), Phase::Recording);
        assert_eq!(r.local_snapshot(), Some(&42));
        assert_eq!(r.recording().len(), 2);
        assert!(r.marker_sent_to().is_empty());
        confirm(&mut r, &t);
        assert_eq!(r.marker_sent_to().len(), 2);
    }

    #[test]
    fn initiate_twice_is_a_noop() {
        let mut r = mesh(0, 3);
        let captures = Cell::new(0);
        let capture = || {
            captures.set(captures.get() + 1);
            7
        };
        let first = r.initiate(R1, capture).unwrap();
        confirm(&mut r, &first);
        let again = r.initiate(R1, capture).unwrap();
        assert!(again.markers.is_empty());
        assert!(!again.captured);
        assert_eq!(captures.get(), 1);
        assert_eq!(r.marker_sent_to().len(), 2);
    }

    #[test]
    fn initiate_new_round_while_recording_is_rejected() {
        let mut r = mesh(0, 2);
        r.initiate(R1, || 0).unwrap();
        let err = r.initiate(SnapshotId(2), || 0).unwrap_err();
        assert_eq!(
            err,
            InvalidTransition::RoundInProgress {
                process: p(0),
                active: R1,
                requested: SnapshotId(2),
            }
        );
    }

    #[test]
    fn initiate_genesis_is_rejected() {
        let mut r = mesh(0, 2);
        assert_eq!(
            r.initiate(SnapshotId::GENESIS, || 0).unwrap_err(),
            InvalidTransition::GenesisRound
        );
        assert_eq!(r.phase(), Phase::Idle);
    }

    #[test]
    fn lone_process_completes_on_initiate() {
        let mut r: Recorder<(), u32> = Recorder::new(p(0), [], []);
        let t = r.initiate(R1, || 5).unwrap();
        assert!(t.captured);
        assert!(t.completed);
        assert!(t.markers.is_empty());
        let record = r.frozen_record().unwrap();
        assert_eq!(record.local_state, 5);
        assert!(record.channels.is_empty());
    }

    // ── Markers ────────────────────────────────────────────────

    #[test]
    fn first_marker_is_an_implicit_initiation() {
        let mut r = mesh(1, 3);
        let t = r.on_marker(p(0), R1, || 9).unwrap();
        assert!(t.captured);
        assert_eq!(t.markers.len(), 2);
        assert_eq!(r.round(), R1);
        assert!(r.channel_state(p(0)).unwrap().is_frozen());
        assert!(!r.recording().contains(&p(0)));
        assert!(r.recording().contains(&p(2)));
        assert_eq!(r.awaiting_markers().collect::<Vec<_>>(), vec![p(2)]);
    }

    #[test]
    fn two_processes_without_traffic() {
        let mut a = mesh(0, 2);
        let mut b = mesh(1, 2);

        let t = a.initiate(R1, || 100).unwrap();
        let (to, marker) = &t.markers[0];
        assert_eq!(*to, p(1));

        let t = b.on_marker(marker.sender, marker.as_marker().unwrap(), || 0).unwrap();
        assert!(t.captured);
        assert!(t.completed);
        let (to, marker) = &t.markers[0];
        assert_eq!(*to, p(0));

        let t = a.on_marker(marker.sender, R1, || unreachable!()).unwrap();
        assert!(t.completed);
        assert!(!t.captured);

        let ra = a.frozen_record().unwrap();
        let rb = b.frozen_record().unwrap();
        assert_eq!(ra.local_state, 100);
        assert_eq!(rb.local_state, 0);
        assert_eq!(ra.in_flight_count() + rb.in_flight_count(), 0);
    }

    #[test]
    fn duplicate_marker_before_done_is_a_fault_without_mutation() {
        let mut r = mesh(1, 3);
        r.on_marker(p(0), R1, || 1).unwrap();
        let received_before = r.marker_received_from().clone();
        let recording_before = r.recording().clone();

        let err = r.on_marker(p(0), R1, || 2).unwrap_err();
        assert_eq!(
            err,
            ProtocolFault::DuplicateMarker {
                channel: ChannelId::new(0u32, 1u32),
                snapshot: R1,
            }
        );
        assert_eq!(r.marker_received_from(), &received_before);
        assert_eq!(r.recording(), &recording_before);
        assert_eq!(r.local_snapshot(), Some(&1));
        assert_eq!(r.phase(), Phase::Recording);
    }

    #[test]
    fn duplicate_marker_after_done_is_a_fault() {
        let mut r = mesh(1, 2);
        r.on_marker(p(0), R1, || 1).unwrap();
        assert!(r.is_done());
        let err = r.on_marker(p(0), R1, || 1).unwrap_err();
        assert!(matches!(err, ProtocolFault::DuplicateMarker { .. }));
        assert!(r.is_done());
    }

    #[test]
    fn marker_for_other_round_while_recording_is_a_fault() {
        let mut r = mesh(1, 3);
        r.on_marker(p(0), SnapshotId(2), || 1).unwrap();
        assert!(matches!(
            r.on_marker(p(2), SnapshotId(3), || 1),
            Err(ProtocolFault::ConcurrentRound { .. })
        ));
        assert!(matches!(
            r.on_marker(p(2), R1, || 1),
            Err(ProtocolFault::StaleMarker { .. })
        ));
    }

    #[test]
    fn marker_from_unknown_peer_is_a_fault() {
        let mut r = mesh(0, 2);
        assert_eq!(
            r.on_marker(p(9), R1, || 0).unwrap_err(),
            ProtocolFault::UnknownChannel {
                process: p(0),
                peer: p(9),
            }
        );
        assert_eq!(r.phase(), Phase::Idle);
    }

    // ── Application messages ───────────────────────────────────

    #[test]
    fn messages_are_classified_by_channel_state() {
        let mut r = mesh(1, 3);
        let g = SnapshotId::GENESIS;

        assert_eq!(r.on_message(p(0), g, &"before").unwrap(), Delivery::Untracked);

        r.on_marker(p(2), R1, || 0).unwrap();
        assert_eq!(r.on_message(p(0), g, &"in-flight").unwrap(), Delivery::Recorded);
        assert_eq!(r.on_message(p(2), R1, &"after").unwrap(), Delivery::PostCut);

        r.on_marker(p(0), R1, || unreachable!()).unwrap();
        assert!(r.is_done());
        assert_eq!(r.on_message(p(0), R1, &"later").unwrap(), Delivery::Untracked);

        let record = r.frozen_record().unwrap();
        assert_eq!(record.channels[&p(0)], vec!["in-flight"]);
        assert!(record.channels[&p(2)].is_empty());
    }

    #[test]
    fn in_flight_message_recorded_when_receiver_captured_first() {
        // A sends M to B, then initiates. C's marker reaches B before M.
        let mut a = mesh(0, 3);
        let mut b = mesh(1, 3);
        let mut c = mesh(2, 3);

        let m = a.stamp(p(1), "M").unwrap();
        let t = a.initiate(R1, || 0).unwrap();
        let to_c = t.markers.iter().find(|(d, _)| *d == p(2)).unwrap().1.clone();

        let t = c.on_marker(to_c.sender, R1, || 0).unwrap();
        let c_to_b = t.markers.iter().find(|(d, _)| *d == p(1)).unwrap().1.clone();

        b.on_marker(c_to_b.sender, R1, || 0).unwrap();
        assert_eq!(
            b.on_message(m.sender, m.epoch, m.payload().unwrap()).unwrap(),
            Delivery::Recorded
        );
        b.on_marker(p(0), R1, || 0).unwrap();

        assert_eq!(b.channel_state(p(0)).unwrap().messages(), &["M"]);
        assert!(b.is_done());
    }

    #[test]
    fn epoch_mismatch_is_a_fault() {
        let mut r = mesh(1, 2);
        assert!(matches!(
            r.on_message(p(0), R1, &"early"),
            Err(ProtocolFault::MarkerOvertaken { .. })
        ));
        r.on_marker(p(0), R1, || 0).unwrap();
        assert!(matches!(
            r.on_message(p(0), SnapshotId::GENESIS, &"late"),
            Err(ProtocolFault::LateMessage { .. })
        ));
    }

    #[test]
    fn stamp_follows_marker_epoch() {
        let mut r = mesh(0, 2);
        assert_eq!(r.stamp(p(1), "x").unwrap().epoch, SnapshotId::GENESIS);
        let t = r.initiate(R1, || 0).unwrap();
        confirm(&mut r, &t);
        assert_eq!(r.stamp(p(1), "y").unwrap().epoch, R1);
        assert_eq!(
            r.stamp(p(7), "z").unwrap_err(),
            ChannelError::UnknownChannel {
                channel: ChannelId::new(0u32, 7u32),
            }
        );
    }

    #[test]
    fn unconfirmed_marker_keeps_previous_epoch() {
        let mut a = mesh(0, 3);
        let mut b = mesh(1, 3);
        let t = a.initiate(R1, || 0).unwrap();
        // Only the marker to p2 made it out.
        assert!(a.marker_sent(p(2)));
        assert_eq!(t.markers.len(), 2);
        assert_eq!(a.marker_sent_to().iter().copied().collect::<Vec<_>>(), vec![p(2)]);

        let m = a.stamp(p(1), "after failed marker").unwrap();
        assert_eq!(m.epoch, SnapshotId::GENESIS);
        assert_eq!(a.stamp(p(2), "after marker").unwrap().epoch, R1);
        assert_eq!(
            b.on_message(m.sender, m.epoch, m.payload().unwrap()).unwrap(),
            Delivery::Untracked
        );
    }

    #[test]
    fn marker_sent_needs_a_round_and_a_peer() {
        let mut r = mesh(0, 2);
        assert!(!r.marker_sent(p(1)));
        assert_eq!(r.stamp(p(1), "x").unwrap().epoch, SnapshotId::GENESIS);
        r.initiate(R1, || 0).unwrap();
        assert!(!r.marker_sent(p(5)));
        assert!(r.marker_sent(p(1)));
    }

    // ── Rounds ─────────────────────────────────────────────────

    #[test]
    fn sequential_rounds_reset_bookkeeping() {
        let mut r = mesh(1, 2);
        r.on_marker(p(0), R1, || 1).unwrap();
        assert!(r.is_done());
        assert!(matches!(
            r.initiate(R1, || 0),
            Ok(Transition { captured: false, .. })
        ));
        assert!(matches!(
            r.initiate(SnapshotId::GENESIS.next(), || 0),
            Ok(Transition { captured: false, .. })
        ));

        let t = r.initiate(SnapshotId(2), || 2).unwrap();
        assert!(t.captured);
        assert_eq!(r.phase(), Phase::Recording);
        assert!(r.marker_received_from().is_empty());
        assert!(!r.channel_state(p(0)).unwrap().is_frozen());
        assert_eq!(r.on_message(p(0), R1, &"m").unwrap(), Delivery::Recorded);

        assert!(matches!(
            r.initiate(SnapshotId(1), || 0),
            Err(InvalidTransition::RoundInProgress { .. })
        ));
    }

    #[test]
    fn stale_round_after_done_is_rejected() {
        let mut r = mesh(0, 2);
        r.initiate(SnapshotId(3), || 0).unwrap();
        r.on_marker(p(1), SnapshotId(3), || 0).unwrap();
        assert_eq!(
            r.initiate(SnapshotId(2), || 0).unwrap_err(),
            InvalidTransition::StaleRound {
                requested: SnapshotId(2),
                latest: SnapshotId(3),
            }
        );
    }

    #[test]
    fn concurrent_initiators_of_one_round_both_finish() {
        let mut a = mesh(0, 2);
        let mut b = mesh(1, 2);
        let ta = a.initiate(R1, || 1).unwrap();
        let tb = b.initiate(R1, || 2).unwrap();

        let tb2 = b.on_marker(ta.markers[0].1.sender, R1, || unreachable!()).unwrap();
        let ta2 = a.on_marker(tb.markers[0].1.sender, R1, || unreachable!()).unwrap();
        assert!(ta2.completed && tb2.completed);
        assert!(ta2.markers.is_empty() && tb2.markers.is_empty());
    }

    #[test]
    fn frozen_record_requires_done() {
        let mut r = mesh(0, 2);
        assert!(r.frozen_record().is_none());
        r.initiate(R1, || 0).unwrap();
        assert!(r.frozen_record().is_none());
    }
}
