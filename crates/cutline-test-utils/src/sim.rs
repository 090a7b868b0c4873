//! Deterministic single-threaded network simulator.
//!
//! Every directed channel is a FIFO queue. Nothing is delivered until the
//! test asks: [`Simulation::deliver`] pops one message from a chosen
//! channel, [`Simulation::step`] pops one from a channel picked by a
//! seeded `ChaCha8Rng`. Any interleaving that respects per-channel FIFO
//! order is reachable, and a seed replays the same one.
//!
//! The simulator also keeps an independent ledger of what was sent,
//! delivered, and marked on each channel, so tests can compute the
//! expected channel state of a round without trusting the recorder.

use std::collections::VecDeque;

use indexmap::IndexMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use cutline_core::{
    ChannelError, ChannelId, Content, GlobalSnapshot, InvalidTransition, LocalState, Message,
    ProcessId, ProcessRecord, SnapshotId,
};
use cutline_engine::{FaultReport, Recorder, SnapshotAssembler, Topology, Transition};

/// One simulated process.
pub struct Node<L: LocalState> {
    pub state: L,
    pub recorder: Recorder<L::Payload, L::Snapshot>,
}

/// A closed network of recorders connected by in-memory FIFO queues.
pub struct Simulation<L: LocalState> {
    topology: Topology,
    nodes: IndexMap<ProcessId, Node<L>>,
    queues: IndexMap<ChannelId, VecDeque<Message<L::Payload>>>,
    /// Application payloads accepted per channel, in send order.
    sent: IndexMap<ChannelId, Vec<L::Payload>>,
    /// Application messages delivered per channel.
    delivered: IndexMap<ChannelId, usize>,
    /// Per (process, round): delivered count of each incoming channel at capture.
    captured_at: IndexMap<(ProcessId, SnapshotId), IndexMap<ProcessId, usize>>,
    capture_counts: IndexMap<(ProcessId, SnapshotId), usize>,
    /// Per (channel, round): sent count when the marker went out.
    marked_at: IndexMap<(ChannelId, SnapshotId), usize>,
    records: Vec<ProcessRecord<L::Payload, L::Snapshot>>,
    faults: Vec<FaultReport>,
    rng: ChaCha8Rng,
}

impl<L: LocalState> Simulation<L> {
    pub fn new(topology: Topology, seed: u64, mut factory: impl FnMut(ProcessId) -> L) -> Self {
        let nodes = topology
            .processes()
            .map(|id| {
                let recorder = Recorder::new(id, topology.inbound(id), topology.outbound(id));
                (
                    id,
                    Node {
                        state: factory(id),
                        recorder,
                    },
                )
            })
            .collect();
        let queues = topology.edges().iter().map(|&c| (c, VecDeque::new())).collect();
        let sent = topology.edges().iter().map(|&c| (c, Vec::new())).collect();
        let delivered = topology.edges().iter().map(|&c| (c, 0)).collect();
        Self {
            topology,
            nodes,
            queues,
            sent,
            delivered,
            captured_at: IndexMap::new(),
            capture_counts: IndexMap::new(),
            marked_at: IndexMap::new(),
            records: Vec::new(),
            faults: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn node(&self, id: ProcessId) -> Option<&Node<L>> {
        self.nodes.get(&id)
    }

    // ── Driving ──────────────────────────────────────────────

    /// Application send from `from` to `to`, applying the sender-side
    /// effect once the message is queued.
    pub fn send(
        &mut self,
        from: ProcessId,
        to: ProcessId,
        payload: L::Payload,
    ) -> Result<(), ChannelError> {
        let channel = ChannelId::new(from, to);
        let unknown = ChannelError::UnknownChannel { channel };
        let node = self.nodes.get_mut(&from).ok_or(unknown.clone())?;
        let queue = self.queues.get_mut(&channel).ok_or(unknown)?;
        let message = node.recorder.stamp(to, payload.clone())?;
        queue.push_back(message);
        node.state.on_send(to, &payload);
        self.sent.entry(channel).or_default().push(payload);
        Ok(())
    }

    /// Initiate `snapshot` at `process`. Returns whether it captured.
    pub fn initiate(
        &mut self,
        process: ProcessId,
        snapshot: SnapshotId,
    ) -> Result<bool, InvalidTransition> {
        let Some(node) = self.nodes.get_mut(&process) else {
            return Ok(false);
        };
        let Node { state, recorder } = node;
        let transition = recorder.initiate(snapshot, || state.capture())?;
        let captured = transition.captured;
        self.apply(process, transition);
        Ok(captured)
    }

    /// Deliver the head of channel `from -> to`. Returns `false` if the
    /// channel is empty or unknown.
    pub fn deliver(&mut self, from: ProcessId, to: ProcessId) -> bool {
        let channel = ChannelId::new(from, to);
        let Some(message) = self.queues.get_mut(&channel).and_then(VecDeque::pop_front) else {
            return false;
        };
        let Some(node) = self.nodes.get_mut(&to) else {
            return false;
        };
        let round = node.recorder.round();

        match message.content {
            Content::Marker(snapshot) => {
                let Node { state, recorder } = node;
                let result = recorder.on_marker(from, snapshot, || state.capture());
                match result {
                    Ok(transition) => self.apply(to, transition),
                    Err(fault) => self.faults.push(FaultReport {
                        process: to,
                        round,
                        fault,
                    }),
                }
            }
            Content::Application(payload) => {
                match node.recorder.on_message(from, message.epoch, &payload) {
                    Ok(_) => {
                        node.state.on_deliver(from, &payload);
                        *self.delivered.entry(channel).or_default() += 1;
                    }
                    Err(fault) => self.faults.push(FaultReport {
                        process: to,
                        round,
                        fault,
                    }),
                }
            }
        }
        true
    }

    /// Deliver one message from a randomly chosen non-empty channel.
    pub fn step(&mut self) -> bool {
        let ready: Vec<ChannelId> = self
            .queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(c, _)| *c)
            .collect();
        if ready.is_empty() {
            return false;
        }
        let pick = ready[self.rng.random_range(0..ready.len())];
        self.deliver(pick.from, pick.to)
    }

    /// Step until every channel is empty. Returns the number of deliveries.
    pub fn run_until_quiet(&mut self) -> usize {
        let mut steps = 0;
        while self.step() {
            steps += 1;
        }
        steps
    }

    /// Push a raw message onto a channel, bypassing the sender.
    pub fn inject(&mut self, channel: ChannelId, message: Message<L::Payload>) -> bool {
        match self.queues.get_mut(&channel) {
            Some(q) => {
                q.push_back(message);
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, process: ProcessId, transition: Transition<L::Payload>) {
        let Some(node) = self.nodes.get(&process) else {
            return;
        };
        let round = node.recorder.round();
        if transition.captured {
            let counts = node
                .recorder
                .inbound()
                .iter()
                .map(|&from| {
                    let delivered = self.delivered.get(&ChannelId::new(from, process)).copied();
                    (from, delivered.unwrap_or(0))
                })
                .collect();
            self.captured_at.insert((process, round), counts);
            *self.capture_counts.entry((process, round)).or_default() += 1;
        }
        let record = if transition.completed {
            node.recorder.frozen_record()
        } else {
            None
        };

        for (to, marker) in transition.markers {
            let channel = ChannelId::new(process, to);
            let sent = self.sent.get(&channel).map_or(0, Vec::len);
            self.marked_at.insert((channel, round), sent);
            let Some(q) = self.queues.get_mut(&channel) else {
                continue;
            };
            q.push_back(marker);
            if let Some(node) = self.nodes.get_mut(&process) {
                node.recorder.marker_sent(to);
            }
        }
        if let Some(record) = record {
            self.records.push(record);
        }
    }

    // ── Inspection ───────────────────────────────────────────

    pub fn pending(&self, channel: ChannelId) -> usize {
        self.queues.get(&channel).map_or(0, VecDeque::len)
    }

    pub fn in_transit(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn faults(&self) -> &[FaultReport] {
        &self.faults
    }

    pub fn records(&self) -> &[ProcessRecord<L::Payload, L::Snapshot>] {
        &self.records
    }

    /// How many times `process` captured for `snapshot`.
    pub fn capture_count(&self, process: ProcessId, snapshot: SnapshotId) -> usize {
        self.capture_counts.get(&(process, snapshot)).copied().unwrap_or(0)
    }

    /// Whether every process finished `snapshot`.
    pub fn is_complete(&self, snapshot: SnapshotId) -> bool {
        self.nodes
            .keys()
            .all(|p| self.records.iter().any(|r| r.snapshot == snapshot && r.process == *p))
    }

    /// The in-flight messages `channel` should hold in `snapshot`,
    /// computed from the ledger: those sent before the sender's marker
    /// and delivered after the receiver captured.
    pub fn expected_channel_state(
        &self,
        channel: ChannelId,
        snapshot: SnapshotId,
    ) -> Option<Vec<L::Payload>> {
        let start = *self.captured_at.get(&(channel.to, snapshot))?.get(&channel.from)?;
        let end = *self.marked_at.get(&(channel, snapshot))?;
        Some(self.sent.get(&channel)?.get(start..end)?.to_vec())
    }

    /// Combine the records of `snapshot` into a global snapshot.
    pub fn assemble(
        &self,
        snapshot: SnapshotId,
    ) -> Result<GlobalSnapshot<L::Payload, L::Snapshot>, InvalidTransition> {
        let mut assembler = SnapshotAssembler::new(snapshot, self.nodes.keys().copied());
        for record in self.records.iter().filter(|r| r.snapshot == snapshot) {
            assembler.accept(record.clone())?;
        }
        assembler.assemble()
    }
}
