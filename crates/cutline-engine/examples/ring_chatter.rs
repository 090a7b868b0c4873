//! Four processes exchange greetings with their next two neighbours in
//! waves, then one of them takes a snapshot and the result is printed.
//!
//! ```text
//! RUST_LOG=cutline_engine=debug cargo run -p cutline-engine --example ring_chatter
//! ```

use cutline_core::{ChannelId, ProcessId};
use cutline_engine::{Cluster, ClusterConfig, Topology};
use cutline_test_utils::Chatter;
use tracing_subscriber::EnvFilter;

const PROCESSES: u32 = 4;
const BUFFER: usize = 100;
const WAVES: [[&str; 2]; 5] = [
    ["Hello", "Bonjour"],
    ["Hola", "Ciao"],
    ["wow", "nice"],
    ["rishith", "hi"],
    ["naice", "da"],
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let edges = (0..PROCESSES).flat_map(|i| {
        [1, 2].map(|hop| ChannelId::new(i, (i + hop) % PROCESSES))
    });
    let topology = Topology::from_edges(PROCESSES, edges);
    let config = ClusterConfig::new(topology).with_channel_capacity(BUFFER);
    let mut cluster = Cluster::spawn(config, |_| Chatter::new())?;

    for (wave, [near, far]) in WAVES.iter().enumerate() {
        for i in 0..PROCESSES {
            let from = ProcessId(i);
            cluster.send(from, ProcessId((i + 1) % PROCESSES), near.to_string())?;
            cluster.send(from, ProcessId((i + 2) % PROCESSES), far.to_string())?;
        }
        if wave == 2 {
            let id = cluster.initiate_snapshot(ProcessId(0))?;
            let snapshot = cluster.await_snapshot(id)?;
            println!("{snapshot}");
        }
    }

    let report = cluster.shutdown();
    println!("stopped {} processes in {}ms", report.processes_joined, report.total_ms);
    Ok(())
}
