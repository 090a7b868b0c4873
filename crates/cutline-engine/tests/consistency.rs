//! Property tests: every FIFO-respecting interleaving yields a consistent cut.
//!
//! Runs the real `Recorder` inside the deterministic simulator. Proptest
//! chooses the topology, the application traffic, the initiator, and the
//! scheduler seed; the simulator's own ledger supplies the expected
//! channel states.

use proptest::prelude::*;
use proptest::sample::Index;

use cutline_core::{ChannelId, ProcessId, SnapshotId};
use cutline_engine::Topology;
use cutline_test_utils::{total_money, Bank, Simulation};

const START: i64 = 100;

fn topology(kind: u8, n: u32) -> Topology {
    match kind {
        0 => Topology::full_mesh(n),
        1 => Topology::ring(n),
        _ => Topology::bidirectional_ring(n),
    }
}

/// One application transfer on a chosen edge, optionally followed by a
/// scheduler step.
type Op = (Index, i64, bool);

fn ops(max: usize) -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec((any::<Index>(), 1i64..10, any::<bool>()), 0..max)
}

fn play(sim: &mut Simulation<Bank>, ops: &[Op]) {
    for (edge, amount, step) in ops {
        let channel = *edge.get(sim.topology().edges());
        sim.send(channel.from, channel.to, *amount).unwrap();
        if *step {
            sim.step();
        }
    }
}

/// Every invariant a finished round must satisfy.
fn check_round(sim: &Simulation<Bank>, snapshot: SnapshotId) -> Result<(), TestCaseError> {
    let n = sim.topology().process_count();
    prop_assert!(sim.faults().is_empty(), "faults: {:?}", sim.faults());
    prop_assert!(sim.is_complete(snapshot));

    for id in sim.topology().processes() {
        prop_assert_eq!(sim.capture_count(id, snapshot), 1);
    }

    let snap = sim.assemble(snapshot).unwrap();
    prop_assert_eq!(total_money(&snap), START * n as i64);

    let edges: Vec<ChannelId> = sim.topology().edges().to_vec();
    for channel in edges {
        let expected = sim.expected_channel_state(channel, snapshot);
        prop_assert!(expected.is_some(), "no ledger entry for {}", channel);
        prop_assert_eq!(
            snap.channel(channel.from, channel.to).map(<[i64]>::to_vec),
            expected
        );
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn single_round_cut_is_consistent(
        seed in any::<u64>(),
        n in 1u32..6,
        kind in 0u8..3,
        initiator in any::<Index>(),
        before in ops(30),
        during in ops(30),
    ) {
        let mut sim = Simulation::new(topology(kind, n), seed, |_| Bank::new(START));
        if n > 1 {
            play(&mut sim, &before);
        }
        let initiator = ProcessId(initiator.index(n as usize) as u32);
        prop_assert!(sim.initiate(initiator, SnapshotId(1)).unwrap());
        if n > 1 {
            play(&mut sim, &during);
        }
        sim.run_until_quiet();
        check_round(&sim, SnapshotId(1))?;
    }

    #[test]
    fn two_initiators_one_round(
        seed in any::<u64>(),
        n in 2u32..6,
        first in any::<Index>(),
        second in any::<Index>(),
        before in ops(20),
        between in ops(20),
    ) {
        let mut sim = Simulation::new(Topology::full_mesh(n), seed, |_| Bank::new(START));
        play(&mut sim, &before);
        sim.initiate(ProcessId(first.index(n as usize) as u32), SnapshotId(1)).unwrap();
        play(&mut sim, &between);
        // Either captures now or is already recording; both are fine.
        sim.initiate(ProcessId(second.index(n as usize) as u32), SnapshotId(1)).unwrap();
        sim.run_until_quiet();
        check_round(&sim, SnapshotId(1))?;
    }

    #[test]
    fn sequential_rounds_are_each_consistent(
        seed in any::<u64>(),
        n in 2u32..5,
        traffic in proptest::collection::vec(ops(15), 3),
    ) {
        let mut sim = Simulation::new(Topology::bidirectional_ring(n), seed, |_| Bank::new(START));
        for (round, ops) in traffic.iter().enumerate() {
            let snapshot = SnapshotId(round as u64 + 1);
            play(&mut sim, ops);
            let initiator = ProcessId(round as u32 % n);
            prop_assert!(sim.initiate(initiator, snapshot).unwrap());
            play(&mut sim, ops);
            sim.run_until_quiet();
            check_round(&sim, snapshot)?;
        }
    }
}
