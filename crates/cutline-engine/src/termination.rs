//! Control-plane termination detection.
//!
//! Every process reports `Started` when it captures and `Completed` when
//! its last incoming marker arrives. The detector counts completions per
//! round; a round has terminated once every process has reported.
//!
//! A round's records are held only until the round is taken with
//! [`TerminationDetector::take`]. Taking a round retires it together with
//! every older round still held; events for retired rounds are dropped.
//! Faults and transport failures are kept for inspection, newest
//! [`HISTORY_LIMIT`] of each.

use std::collections::VecDeque;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use cutline_core::{ChannelError, ProcessId, SnapshotId};

use crate::assembler::SnapshotAssembler;
use crate::process::{FaultReport, ProcessEvent};

/// How many fault reports and transport failures are kept.
pub const HISTORY_LIMIT: usize = 1024;

/// Where a round stands from the control plane's point of view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoundStatus {
    /// Every process reported `Done`.
    Complete,
    /// Not complete and a fault was raised during the round.
    Faulted(FaultReport),
    /// Still waiting on the listed processes.
    Pending(Vec<ProcessId>),
    /// Already taken, or older than a taken round; no records are held.
    Retired,
}

/// Consumes [`ProcessEvent`]s and assembles completed rounds.
#[derive(Debug)]
pub struct TerminationDetector<P, S> {
    events: Receiver<ProcessEvent<P, S>>,
    participants: Vec<ProcessId>,
    rounds: IndexMap<SnapshotId, SnapshotAssembler<P, S>>,
    /// Highest round any process has entered.
    latest: SnapshotId,
    /// Every round at or below this id is retired.
    retired: SnapshotId,
    faults: VecDeque<FaultReport>,
    channel_failures: VecDeque<(ProcessId, ChannelError)>,
}

impl<P, S> TerminationDetector<P, S> {
    /// A detector for a fixed set of participants.
    pub fn new(events: Receiver<ProcessEvent<P, S>>, participants: Vec<ProcessId>) -> Self {
        Self {
            events,
            participants,
            rounds: IndexMap::new(),
            latest: SnapshotId::GENESIS,
            retired: SnapshotId::GENESIS,
            faults: VecDeque::new(),
            channel_failures: VecDeque::new(),
        }
    }

    /// Drain every queued event without blocking. Returns how many were
    /// handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle(event);
            handled += 1;
        }
        handled
    }

    /// Block until `snapshot` is no longer pending or `deadline` passes.
    ///
    /// Also returns early if every process has exited.
    pub fn wait_until(&mut self, snapshot: SnapshotId, deadline: Instant) -> RoundStatus {
        self.poll();
        loop {
            let status = self.status(snapshot);
            if !matches!(status, RoundStatus::Pending(_)) {
                return status;
            }
            match self.events.recv_deadline(deadline) {
                Ok(event) => self.handle(event),
                Err(RecvTimeoutError::Timeout) => {
                    if let RoundStatus::Pending(pending) = &status {
                        warn!(snapshot = %snapshot, pending = pending.len(), "snapshot stalled");
                    }
                    return status;
                }
                Err(RecvTimeoutError::Disconnected) => return status,
            }
        }
    }

    /// Status of `snapshot` given the events handled so far.
    pub fn status(&self, snapshot: SnapshotId) -> RoundStatus {
        let assembler = self.rounds.get(&snapshot);
        if assembler.is_some_and(SnapshotAssembler::is_complete) {
            return RoundStatus::Complete;
        }
        if self.is_retired(snapshot) {
            return RoundStatus::Retired;
        }
        if let Some(report) = self.faults.iter().find(|f| f.round == snapshot) {
            return RoundStatus::Faulted(report.clone());
        }
        RoundStatus::Pending(
            assembler
                .map(SnapshotAssembler::pending)
                .unwrap_or_else(|| self.participants.clone()),
        )
    }

    /// The assembler for `snapshot`, if any process has entered it.
    pub fn assembler(&self, snapshot: SnapshotId) -> Option<&SnapshotAssembler<P, S>> {
        self.rounds.get(&snapshot)
    }

    /// Remove the assembler of a complete round and hand it to the
    /// caller. Every older round still held is discarded with it.
    ///
    /// Returns `None`, and keeps everything, if `snapshot` is not complete.
    pub fn take(&mut self, snapshot: SnapshotId) -> Option<SnapshotAssembler<P, S>> {
        if !self.rounds.get(&snapshot)?.is_complete() {
            return None;
        }
        let assembler = self.rounds.shift_remove(&snapshot)?;
        let before = self.rounds.len();
        self.rounds.retain(|&id, _| id > snapshot);
        if before != self.rounds.len() {
            debug!(
                snapshot = %snapshot,
                dropped = before - self.rounds.len(),
                "older unfinished rounds discarded"
            );
        }
        self.retired = self.retired.max(snapshot);
        Some(assembler)
    }

    /// Number of rounds whose records are still held.
    pub fn held_rounds(&self) -> usize {
        self.rounds.len()
    }

    /// Highest round any process has entered.
    pub fn latest_round(&self) -> SnapshotId {
        self.latest
    }

    /// Protocol faults reported so far, oldest first.
    pub fn faults(&self) -> impl Iterator<Item = &FaultReport> + '_ {
        self.faults.iter()
    }

    /// Transport failures reported so far, oldest first.
    pub fn channel_failures(&self) -> impl Iterator<Item = &(ProcessId, ChannelError)> + '_ {
        self.channel_failures.iter()
    }

    fn is_retired(&self, snapshot: SnapshotId) -> bool {
        !snapshot.is_genesis() && snapshot <= self.retired && !self.rounds.contains_key(&snapshot)
    }

    fn handle(&mut self, event: ProcessEvent<P, S>) {
        match event {
            ProcessEvent::Started { process, snapshot } => {
                self.latest = self.latest.max(snapshot);
                if snapshot <= self.retired {
                    return;
                }
                if !self.rounds.contains_key(&snapshot) {
                    info!(snapshot = %snapshot, first = %process, "snapshot round started");
                }
                self.round_mut(snapshot);
            }
            ProcessEvent::Completed(record) => {
                let snapshot = record.snapshot;
                let process = record.process;
                self.latest = self.latest.max(snapshot);
                if snapshot <= self.retired {
                    debug!(
                        process = %process,
                        snapshot = %snapshot,
                        "record for retired round dropped"
                    );
                    return;
                }
                let assembler = self.round_mut(snapshot);
                if let Err(e) = assembler.accept(record) {
                    warn!(process = %process, error = %e, "completion record rejected");
                    return;
                }
                if assembler.is_complete() {
                    info!(snapshot = %snapshot, "snapshot complete");
                }
            }
            ProcessEvent::Fault(report) => push_bounded(&mut self.faults, report),
            ProcessEvent::ChannelFailure { process, error } => {
                push_bounded(&mut self.channel_failures, (process, error));
            }
        }
    }

    fn round_mut(&mut self, snapshot: SnapshotId) -> &mut SnapshotAssembler<P, S> {
        let participants = &self.participants;
        self.rounds
            .entry(snapshot)
            .or_insert_with(|| SnapshotAssembler::new(snapshot, participants.iter().copied()))
    }
}

fn push_bounded<T>(history: &mut VecDeque<T>, item: T) {
    if history.len() == HISTORY_LIMIT {
        history.pop_front();
    }
    history.push_back(item);
}
