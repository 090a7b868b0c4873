//! Per-process actor: one thread draining the control inbox and every
//! incoming link.
//!
//! The actor is the only owner of its [`LocalState`], its [`Recorder`]
//! and its outgoing channels. Every inbound event (control command,
//! marker or application message) is handled to completion before the
//! next one is selected, which makes local-state capture indivisible with
//! respect to delivery without any locking.
//!
//! Marker sends always happen after the recorder call that produced them
//! has returned. Only markers the transport accepted are confirmed back to
//! the recorder; an outgoing channel whose marker failed keeps stamping
//! the previous epoch.

use crossbeam_channel::{Receiver, Select, Sender};
use indexmap::IndexMap;
use tracing::{debug, error, info, trace, warn};

use cutline_core::{
    Channel, ChannelError, ChannelId, Content, InvalidTransition, LocalState, Message, ProcessId,
    ProcessRecord, ProtocolFault, SnapshotId,
};

use crate::metrics::ProcessMetrics;
use crate::recorder::{Delivery, Phase, Recorder, Transition};

/// Boxed outgoing channel.
pub type BoxChannel<P> = Box<dyn Channel<P>>;

// ── Commands and events ──────────────────────────────────────────

/// Commands from the control plane to a process.
#[derive(Debug)]
pub enum Control<P> {
    /// Initiate (or join) round `snapshot`. Replies with whether local
    /// state was captured by this command.
    Initiate {
        /// Round to initiate.
        snapshot: SnapshotId,
        /// Reply channel.
        reply: Sender<Result<bool, InvalidTransition>>,
    },
    /// Send an application message to `to`.
    Send {
        /// Destination process.
        to: ProcessId,
        /// Application payload.
        payload: P,
        /// Reply channel.
        reply: Sender<Result<(), ChannelError>>,
    },
    /// Report phase, round and counters.
    Status {
        /// Reply channel.
        reply: Sender<ProcessStatus>,
    },
    /// Stop the actor loop.
    Shutdown,
}

/// A protocol fault attributed to a process and round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaultReport {
    /// The process that rejected the traffic.
    pub process: ProcessId,
    /// The process's round when the fault was raised.
    pub round: SnapshotId,
    /// What went wrong.
    pub fault: ProtocolFault,
}

/// Events pushed from a process to the control plane.
#[derive(Debug)]
pub enum ProcessEvent<P, S> {
    /// The process captured its local state for `snapshot`.
    Started {
        /// The reporting process.
        process: ProcessId,
        /// The round entered.
        snapshot: SnapshotId,
    },
    /// The process received a marker on every incoming channel.
    Completed(ProcessRecord<P, S>),
    /// Incoming traffic was rejected.
    Fault(FaultReport),
    /// An outgoing send failed at the transport.
    ChannelFailure {
        /// The sending process.
        process: ProcessId,
        /// The transport error.
        error: ChannelError,
    },
}

/// Point-in-time view of a process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessStatus {
    /// The process.
    pub process: ProcessId,
    /// Phase in the current round.
    pub phase: Phase,
    /// Current (or last finished) round.
    pub round: SnapshotId,
    /// Cumulative counters.
    pub metrics: ProcessMetrics,
}

// ── Mailbox ──────────────────────────────────────────────────────

/// Receiving ends owned by a process thread.
#[derive(Debug)]
pub struct Mailbox<P> {
    control: Receiver<Control<P>>,
    inbound: Vec<(ProcessId, Receiver<Message<P>>)>,
}

impl<P> Mailbox<P> {
    /// Bundle the control inbox with one receiver per incoming link.
    pub fn new(
        control: Receiver<Control<P>>,
        inbound: Vec<(ProcessId, Receiver<Message<P>>)>,
    ) -> Self {
        Self { control, inbound }
    }

    /// Senders of the incoming links, in selection order.
    pub fn peers(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.inbound.iter().map(|(p, _)| *p)
    }
}

// ── ProcessActor ─────────────────────────────────────────────────

/// The protocol handler of one process.
pub struct ProcessActor<L: LocalState> {
    id: ProcessId,
    state: L,
    recorder: Recorder<L::Payload, L::Snapshot>,
    outbound: IndexMap<ProcessId, BoxChannel<L::Payload>>,
    events: Sender<ProcessEvent<L::Payload, L::Snapshot>>,
    metrics: ProcessMetrics,
}

impl<L: LocalState> ProcessActor<L> {
    /// Build an idle actor.
    ///
    /// `inbound` lists the senders of the incoming channels. Outgoing
    /// channels are keyed by their receiver.
    pub fn new(
        id: ProcessId,
        state: L,
        inbound: impl IntoIterator<Item = ProcessId>,
        outbound: IndexMap<ProcessId, BoxChannel<L::Payload>>,
        events: Sender<ProcessEvent<L::Payload, L::Snapshot>>,
    ) -> Self {
        let recorder = Recorder::new(id, inbound, outbound.keys().copied());
        Self {
            id,
            state,
            recorder,
            outbound,
            events,
            metrics: ProcessMetrics::default(),
        }
    }

    /// Run until a `Shutdown` command arrives or the control inbox closes.
    ///
    /// Returns the final counters.
    pub fn run(mut self, mailbox: Mailbox<L::Payload>) -> ProcessMetrics {
        let mut sel = Select::new();
        // Index 0 is the control inbox; link `i` is at index `i + 1`.
        sel.recv(&mailbox.control);
        for (_, rx) in &mailbox.inbound {
            sel.recv(rx);
        }
        debug!(process = %self.id, links = mailbox.inbound.len(), "process started");

        loop {
            let op = sel.select();
            let index = op.index();
            if index == 0 {
                match op.recv(&mailbox.control) {
                    Ok(Control::Shutdown) | Err(_) => break,
                    Ok(command) => self.handle_control(command),
                }
                continue;
            }

            let (from, rx) = &mailbox.inbound[index - 1];
            match op.recv(rx) {
                Ok(message) => self.handle_message(*from, message),
                Err(_) => {
                    debug!(process = %self.id, from = %from, "incoming link closed");
                    sel.remove(index);
                }
            }
        }

        debug!(process = %self.id, "process stopped");
        self.metrics
    }

    fn handle_control(&mut self, command: Control<L::Payload>) {
        match command {
            Control::Initiate { snapshot, reply } => {
                let state = &self.state;
                let result = self.recorder.initiate(snapshot, || state.capture());
                let reply_value = match result {
                    Ok(transition) => {
                        let captured = transition.captured;
                        if captured {
                            info!(
                                process = %self.id,
                                snapshot = %snapshot,
                                "initiating snapshot"
                            );
                        }
                        self.apply(transition);
                        Ok(captured)
                    }
                    Err(e) => {
                        warn!(
                            process = %self.id,
                            snapshot = %snapshot,
                            error = %e,
                            "initiate rejected"
                        );
                        Err(e)
                    }
                };
                let _ = reply.send(reply_value);
            }
            Control::Send { to, payload, reply } => {
                let _ = reply.send(self.send_application(to, payload));
            }
            Control::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Control::Shutdown => {}
        }
    }

    fn handle_message(&mut self, from: ProcessId, message: Message<L::Payload>) {
        if message.sender != from {
            self.fault(ProtocolFault::SenderMismatch {
                channel: ChannelId::new(from, self.id),
                claimed: message.sender,
            });
            return;
        }

        match message.content {
            Content::Marker(snapshot) => {
                let state = &self.state;
                match self.recorder.on_marker(from, snapshot, || state.capture()) {
                    Ok(transition) => {
                        self.metrics.markers_received += 1;
                        debug!(
                            process = %self.id,
                            from = %from,
                            snapshot = %snapshot,
                            "marker received"
                        );
                        self.apply(transition);
                    }
                    Err(fault) => self.fault(fault),
                }
            }
            Content::Application(payload) => {
                match self.recorder.on_message(from, message.epoch, &payload) {
                    Ok(delivery) => {
                        if delivery == Delivery::Recorded {
                            self.metrics.app_recorded += 1;
                        }
                        self.state.on_deliver(from, &payload);
                        self.metrics.app_delivered += 1;
                        trace!(process = %self.id, from = %from, ?delivery, "message delivered");
                    }
                    Err(fault) => self.fault(fault),
                }
            }
        }
    }

    /// Carry out a recorder transition: report capture, send markers,
    /// report completion.
    fn apply(&mut self, transition: Transition<L::Payload>) {
        let snapshot = self.recorder.round();
        if transition.captured {
            self.metrics.captures += 1;
            debug!(process = %self.id, snapshot = %snapshot, "local state captured");
            self.emit(ProcessEvent::Started {
                process: self.id,
                snapshot,
            });
        }

        for (to, marker) in transition.markers {
            if self.send_raw(to, marker).is_ok() {
                self.recorder.marker_sent(to);
                self.metrics.markers_sent += 1;
            } else {
                warn!(process = %self.id, to = %to, snapshot = %snapshot, "marker not sent");
            }
        }

        if transition.completed {
            self.metrics.rounds_completed += 1;
            if let Some(record) = self.recorder.frozen_record() {
                info!(
                    process = %self.id,
                    snapshot = %snapshot,
                    in_flight = record.in_flight_count(),
                    "process recording complete"
                );
                self.emit(ProcessEvent::Completed(record));
            }
        }
    }

    fn send_application(
        &mut self,
        to: ProcessId,
        payload: L::Payload,
    ) -> Result<(), ChannelError> {
        let message = self.recorder.stamp(to, payload.clone())?;
        self.send_raw(to, message)?;
        self.state.on_send(to, &payload);
        self.metrics.app_sent += 1;
        trace!(process = %self.id, to = %to, "message sent");
        Ok(())
    }

    fn send_raw(
        &mut self,
        to: ProcessId,
        message: Message<L::Payload>,
    ) -> Result<(), ChannelError> {
        let result = match self.outbound.get(&to) {
            Some(channel) => channel.send(message),
            None => Err(ChannelError::UnknownChannel {
                channel: ChannelId::new(self.id, to),
            }),
        };
        if let Err(e) = &result {
            self.metrics.channel_failures += 1;
            warn!(process = %self.id, error = %e, "send failed");
            self.emit(ProcessEvent::ChannelFailure {
                process: self.id,
                error: e.clone(),
            });
        }
        result
    }

    fn fault(&mut self, fault: ProtocolFault) {
        self.metrics.faults += 1;
        let round = self.recorder.round();
        error!(process = %self.id, round = %round, fault = %fault, "protocol fault");
        self.emit(ProcessEvent::Fault(FaultReport {
            process: self.id,
            round,
            fault,
        }));
    }

    fn emit(&self, event: ProcessEvent<L::Payload, L::Snapshot>) {
        if self.events.send(event).is_err() {
            trace!(process = %self.id, "event sink closed");
        }
    }

    fn status(&self) -> ProcessStatus {
        ProcessStatus {
            process: self.id,
            phase: self.recorder.phase(),
            round: self.recorder.round(),
            metrics: self.metrics.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::link;

    /// Sums every delivered payload.
    struct Counter {
        total: u64,
    }

    impl LocalState for Counter {
        type Payload = u64;
        type Snapshot = u64;

        fn on_deliver(&mut self, _from: ProcessId, payload: &u64) {
            self.total += payload;
        }

        fn capture(&self) -> u64 {
            self.total
        }
    }

    type Events = Receiver<ProcessEvent<u64, u64>>;

    /// Actor for p1 with one link each way to p0.
    fn pair() -> (ProcessActor<Counter>, Receiver<Message<u64>>, Events) {
        pair_with_capacity(None)
    }

    fn pair_with_capacity(
        capacity: Option<usize>,
    ) -> (ProcessActor<Counter>, Receiver<Message<u64>>, Events) {
        let (to_p0, from_p1) = link(ChannelId::new(1u32, 0u32), capacity);
        let mut outbound: IndexMap<ProcessId, BoxChannel<u64>> = IndexMap::new();
        outbound.insert(ProcessId(0), Box::new(to_p0));
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let actor = ProcessActor::new(
            ProcessId(1),
            Counter { total: 0 },
            [ProcessId(0)],
            outbound,
            events_tx,
        );
        (actor, from_p1, events_rx)
    }

    #[test]
    fn marker_captures_then_forwards_then_completes() {
        let (mut actor, peer_rx, events) = pair();
        let five = Message::application(ProcessId(0), SnapshotId::GENESIS, 5);
        actor.handle_message(ProcessId(0), five);
        actor.handle_message(ProcessId(0), Message::marker(ProcessId(0), SnapshotId(1)));

        let forwarded = peer_rx.try_recv().unwrap();
        assert_eq!(forwarded.as_marker(), Some(SnapshotId(1)));

        let evs: Vec<_> = events.try_iter().collect();
        assert!(matches!(evs[0], ProcessEvent::Started { snapshot: SnapshotId(1), .. }));
        match &evs[1] {
            ProcessEvent::Completed(record) => {
                assert_eq!(record.local_state, 5);
                assert!(record.channels[&ProcessId(0)].is_empty());
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(actor.status().phase, Phase::Done);
        assert_eq!(actor.metrics.markers_sent, 1);
        assert_eq!(actor.metrics.markers_received, 1);
    }

    #[test]
    fn faulted_message_is_not_applied() {
        let (mut actor, _peer_rx, events) = pair();
        let early = Message::application(ProcessId(0), SnapshotId(4), 9);
        actor.handle_message(ProcessId(0), early);
        assert_eq!(actor.state.total, 0);
        assert_eq!(actor.metrics.faults, 1);
        match events.try_recv().unwrap() {
            ProcessEvent::Fault(report) => {
                assert_eq!(report.process, ProcessId(1));
                assert!(matches!(report.fault, ProtocolFault::MarkerOvertaken { .. }));
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[test]
    fn failed_marker_send_keeps_channel_in_previous_epoch() {
        let (mut actor, peer_rx, events) = pair_with_capacity(Some(1));
        actor.send_application(ProcessId(0), 1).unwrap();
        // The link is full, so the forwarded marker is rejected.
        actor.handle_message(ProcessId(0), Message::marker(ProcessId(0), SnapshotId(1)));
        assert_eq!(actor.metrics.markers_sent, 0);
        assert_eq!(actor.metrics.channel_failures, 1);
        assert!(actor.recorder.marker_sent_to().is_empty());
        assert!(events
            .try_iter()
            .any(|e| matches!(e, ProcessEvent::ChannelFailure { .. })));

        let first = peer_rx.try_recv().unwrap();
        assert_eq!(first.payload(), Some(&1));
        actor.send_application(ProcessId(0), 30).unwrap();
        let later = peer_rx.try_recv().unwrap();
        assert_eq!(later.epoch, SnapshotId::GENESIS);

        // The receiver never saw a marker on this channel and accepts it.
        let mut p0: Recorder<u64, u64> = Recorder::new(ProcessId(0), [ProcessId(1)], []);
        assert_eq!(
            p0.on_message(later.sender, later.epoch, later.payload().unwrap()),
            Ok(Delivery::Untracked)
        );
    }

    #[test]
    fn mismatched_sender_is_a_fault() {
        let (mut actor, _peer_rx, events) = pair();
        actor.handle_message(ProcessId(0), Message::marker(ProcessId(7), SnapshotId(1)));
        assert_eq!(actor.status().phase, Phase::Idle);
        assert!(matches!(
            events.try_recv().unwrap(),
            ProcessEvent::Fault(FaultReport {
                fault: ProtocolFault::SenderMismatch { .. },
                ..
            })
        ));
    }

    #[test]
    fn send_to_missing_peer_reports_failure() {
        let (mut actor, _peer_rx, events) = pair();
        let err = actor.send_application(ProcessId(3), 1).unwrap_err();
        assert!(matches!(err, ChannelError::UnknownChannel { .. }));
        assert_eq!(actor.metrics.app_sent, 0);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn send_to_dropped_link_reports_channel_failure() {
        let (mut actor, peer_rx, events) = pair();
        drop(peer_rx);
        assert!(actor.send_application(ProcessId(0), 1).is_err());
        assert_eq!(actor.metrics.channel_failures, 1);
        assert!(matches!(
            events.try_recv().unwrap(),
            ProcessEvent::ChannelFailure { .. }
        ));
    }

    #[test]
    fn run_loop_answers_status_and_stops() {
        let (actor, _peer_rx, _events) = pair();
        let (control_tx, control_rx) = crossbeam_channel::bounded(4);
        let (_link_tx, link_rx) = link::<u64>(ChannelId::new(0u32, 1u32), None);
        let mailbox = Mailbox::new(control_rx, vec![(ProcessId(0), link_rx)]);
        let handle = std::thread::spawn(move || actor.run(mailbox));

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        control_tx.send(Control::Status { reply: reply_tx }).unwrap();
        let status = reply_rx.recv().unwrap();
        assert_eq!(status.process, ProcessId(1));
        assert_eq!(status.phase, Phase::Idle);

        control_tx.send(Control::Shutdown).unwrap();
        let metrics = handle.join().unwrap();
        assert_eq!(metrics, ProcessMetrics::default());
    }
}
