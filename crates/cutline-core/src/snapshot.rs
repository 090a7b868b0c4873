//! Per-process round output and the assembled global snapshot.

use std::fmt;

use indexmap::IndexMap;

use crate::id::{ChannelId, ProcessId, SnapshotId};

/// What one process recorded during a round.
///
/// Produced exactly once, when the process has received a marker on every
/// incoming channel. Immutable afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessRecord<P, S> {
    /// The reporting process.
    pub process: ProcessId,
    /// The round this record belongs to.
    pub snapshot: SnapshotId,
    /// The captured local state.
    pub local_state: S,
    /// Recorded in-flight messages, keyed by the sender of each incoming
    /// channel. Every incoming channel has an entry, possibly empty.
    pub channels: IndexMap<ProcessId, Vec<P>>,
}

impl<P, S> ProcessRecord<P, S> {
    /// Total recorded messages across all incoming channels.
    pub fn in_flight_count(&self) -> usize {
        self.channels.values().map(Vec::len).sum()
    }
}

/// A consistent cut: every process's local state plus the messages that
/// were in flight on every directed channel.
///
/// Built only from the records of a completed round; read-only.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalSnapshot<P, S> {
    id: SnapshotId,
    states: IndexMap<ProcessId, S>,
    channels: IndexMap<ChannelId, Vec<P>>,
}

impl<P, S> GlobalSnapshot<P, S> {
    /// Combine per-process records into a global snapshot.
    ///
    /// Records are taken in iteration order, which fixes the iteration
    /// order of [`states`](Self::states) and [`channels`](Self::channels).
    pub fn from_records(
        id: SnapshotId,
        records: impl IntoIterator<Item = ProcessRecord<P, S>>,
    ) -> Self {
        let mut states = IndexMap::new();
        let mut channels = IndexMap::new();
        for record in records {
            for (sender, log) in record.channels {
                channels.insert(ChannelId::new(sender, record.process), log);
            }
            states.insert(record.process, record.local_state);
        }
        Self {
            id,
            states,
            channels,
        }
    }

    /// The round this snapshot captures.
    pub fn id(&self) -> SnapshotId {
        self.id
    }

    /// Captured local state of `process`.
    pub fn state(&self, process: ProcessId) -> Option<&S> {
        self.states.get(&process)
    }

    /// Recorded in-flight messages on `from -> to`.
    pub fn channel(&self, from: ProcessId, to: ProcessId) -> Option<&[P]> {
        self.channels
            .get(&ChannelId::new(from, to))
            .map(Vec::as_slice)
    }

    /// All process states.
    pub fn states(&self) -> impl Iterator<Item = (ProcessId, &S)> {
        self.states.iter().map(|(p, s)| (*p, s))
    }

    /// All channel logs, including empty ones.
    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, &[P])> {
        self.channels.iter().map(|(c, m)| (*c, m.as_slice()))
    }

    /// Number of processes in the cut.
    pub fn process_count(&self) -> usize {
        self.states.len()
    }

    /// Total in-flight messages across all channels.
    pub fn in_flight_count(&self) -> usize {
        self.channels.values().map(Vec::len).sum()
    }
}

impl<P: fmt::Debug, S: fmt::Debug> fmt::Display for GlobalSnapshot<P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "global snapshot {}:", self.id)?;
        for (process, state) in &self.states {
            writeln!(f, "  {process} state: {state:?}")?;
            for (channel, log) in self.channels.iter().filter(|(c, _)| c.to == *process) {
                writeln!(f, "    channel {channel}: {log:?}")?;
            }
        }
        Ok(())
    }
}
