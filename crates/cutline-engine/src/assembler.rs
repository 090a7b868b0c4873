//! Combines per-process records into a [`GlobalSnapshot`].

use indexmap::IndexMap;

use cutline_core::{GlobalSnapshot, InvalidTransition, ProcessId, ProcessRecord, SnapshotId};

/// Collects the [`ProcessRecord`]s of one round.
///
/// The set of participants is fixed at construction. Records are stored
/// in participant order regardless of arrival order, so the assembled
/// snapshot iterates deterministically.
#[derive(Debug)]
pub struct SnapshotAssembler<P, S> {
    snapshot: SnapshotId,
    records: IndexMap<ProcessId, Option<ProcessRecord<P, S>>>,
}

impl<P, S> SnapshotAssembler<P, S> {
    /// An empty assembler for round `snapshot` over `participants`.
    pub fn new(snapshot: SnapshotId, participants: impl IntoIterator<Item = ProcessId>) -> Self {
        Self {
            snapshot,
            records: participants.into_iter().map(|p| (p, None)).collect(),
        }
    }

    /// The round being assembled.
    pub fn snapshot(&self) -> SnapshotId {
        self.snapshot
    }

    /// Store a completion record.
    ///
    /// Rejects records for another round, from a process that is not a
    /// participant, or from a process that already reported.
    pub fn accept(&mut self, record: ProcessRecord<P, S>) -> Result<(), InvalidTransition> {
        let unexpected = InvalidTransition::UnexpectedRecord {
            process: record.process,
            snapshot: record.snapshot,
        };
        if record.snapshot != self.snapshot {
            return Err(unexpected);
        }
        match self.records.get_mut(&record.process) {
            Some(slot @ None) => {
                *slot = Some(record);
                Ok(())
            }
            _ => Err(unexpected),
        }
    }

    /// True once every participant has reported `Done`.
    pub fn is_complete(&self) -> bool {
        self.records.values().all(Option::is_some)
    }

    /// Participants that have not reported yet.
    pub fn pending(&self) -> Vec<ProcessId> {
        self.records
            .iter()
            .filter(|(_, r)| r.is_none())
            .map(|(p, _)| *p)
            .collect()
    }

    /// Number of records received.
    pub fn reported(&self) -> usize {
        self.records.values().filter(|r| r.is_some()).count()
    }
}

impl<P: Clone, S: Clone> SnapshotAssembler<P, S> {
    /// Build the global snapshot. Fails with
    /// [`InvalidTransition::NotComplete`] until every participant reported.
    pub fn assemble(&self) -> Result<GlobalSnapshot<P, S>, InvalidTransition> {
        if !self.is_complete() {
            return Err(InvalidTransition::NotComplete {
                snapshot: self.snapshot,
                pending: self.pending(),
            });
        }
        Ok(GlobalSnapshot::from_records(
            self.snapshot,
            self.records.values().flatten().cloned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(process: u32, snapshot: u64, state: u32) -> ProcessRecord<u8, u32> {
        ProcessRecord {
            process: ProcessId(process),
            snapshot: SnapshotId(snapshot),
            local_state: state,
            channels: IndexMap::new(),
        }
    }

    #[test]
    fn assembles_in_participant_order() {
        let mut asm = SnapshotAssembler::new(SnapshotId(1), [ProcessId(0), ProcessId(1)]);
        assert!(!asm.is_complete());
        asm.accept(record(1, 1, 11)).unwrap();
        assert_eq!(asm.pending(), vec![ProcessId(0)]);
        assert_eq!(
            asm.assemble().unwrap_err(),
            InvalidTransition::NotComplete {
                snapshot: SnapshotId(1),
                pending: vec![ProcessId(0)],
            }
        );
        asm.accept(record(0, 1, 10)).unwrap();
        assert!(asm.is_complete());
        assert_eq!(asm.reported(), 2);

        let snap = asm.assemble().unwrap();
        let order: Vec<_> = snap.states().map(|(p, s)| (p, *s)).collect();
        assert_eq!(order, vec![(ProcessId(0), 10), (ProcessId(1), 11)]);
    }

    #[test]
    fn rejects_foreign_and_duplicate_records() {
        let mut asm = SnapshotAssembler::new(SnapshotId(2), [ProcessId(0)]);
        assert!(asm.accept(record(0, 1, 0)).is_err());
        assert!(asm.accept(record(5, 2, 0)).is_err());
        asm.accept(record(0, 2, 0)).unwrap();
        assert_eq!(
            asm.accept(record(0, 2, 1)).unwrap_err(),
            InvalidTransition::UnexpectedRecord {
                process: ProcessId(0),
                snapshot: SnapshotId(2),
            }
        );
    }
}
