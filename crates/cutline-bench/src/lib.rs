//! Benchmark fixtures for the Cutline snapshot protocol.
//!
//! - [`mesh_recorders`]: idle recorders wired as a full mesh
//! - [`drive_round`]: run one round to completion with FIFO marker delivery

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::collections::VecDeque;

use cutline_core::{ProcessId, SnapshotId};
use cutline_engine::{Recorder, Topology};

/// Idle recorders for every process of a full mesh of `n`.
pub fn mesh_recorders(n: u32) -> Vec<Recorder<u64, u64>> {
    let topology = Topology::full_mesh(n);
    topology
        .processes()
        .map(|id| Recorder::new(id, topology.inbound(id), topology.outbound(id)))
        .collect()
}

/// Initiate `snapshot` at `initiator` and deliver markers in global FIFO
/// order until every recorder is done. Returns the number of markers
/// delivered.
///
/// Recorders are indexed by process id.
pub fn drive_round(
    recorders: &mut [Recorder<u64, u64>],
    initiator: ProcessId,
    snapshot: SnapshotId,
) -> usize {
    let mut queue: VecDeque<(ProcessId, ProcessId)> = VecDeque::new();
    let Some(first) = recorders.get_mut(initiator.0 as usize) else {
        return 0;
    };
    let Ok(t) = first.initiate(snapshot, || 0) else {
        return 0;
    };
    for (to, _) in &t.markers {
        first.marker_sent(*to);
        queue.push_back((initiator, *to));
    }

    let mut delivered = 0;
    while let Some((from, to)) = queue.pop_front() {
        let Some(r) = recorders.get_mut(to.0 as usize) else {
            continue;
        };
        if let Ok(t) = r.on_marker(from, snapshot, || u64::from(to.0)) {
            for (next, _) in &t.markers {
                r.marker_sent(*next);
                queue.push_back((to, *next));
            }
        }
        delivered += 1;
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_delivers_one_marker_per_channel() {
        let mut recorders = mesh_recorders(5);
        let delivered = drive_round(&mut recorders, ProcessId(2), SnapshotId(1));
        assert_eq!(delivered, 20);
        assert!(recorders.iter().all(Recorder::is_done));
        assert!(recorders.iter().all(|r| r.marker_sent_to().len() == 4));
    }
}
