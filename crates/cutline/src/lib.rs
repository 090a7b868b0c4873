//! Cutline: Chandy-Lamport global snapshots over FIFO process channels.
//!
//! This is the top-level facade crate that re-exports the public API from
//! the Cutline sub-crates. For most users, adding `cutline` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::time::Duration;
//! use cutline::prelude::*;
//!
//! // Each process holds a balance; transfers debit on send, credit on delivery.
//! struct Account(i64);
//!
//! impl LocalState for Account {
//!     type Payload = i64;
//!     type Snapshot = i64;
//!     fn on_deliver(&mut self, _from: ProcessId, amount: &i64) { self.0 += amount; }
//!     fn on_send(&mut self, _to: ProcessId, amount: &i64) { self.0 -= amount; }
//!     fn capture(&self) -> i64 { self.0 }
//! }
//!
//! let cluster = Cluster::spawn(ClusterConfig::full_mesh(3), |_| Account(100)).unwrap();
//! cluster.send(ProcessId(0), ProcessId(1), 30).unwrap();
//! cluster.send(ProcessId(2), ProcessId(0), 5).unwrap();
//!
//! let id = cluster.initiate_snapshot(ProcessId(0)).unwrap();
//! let snapshot = cluster.wait_for_snapshot(id, Duration::from_secs(5)).unwrap();
//!
//! // Money is either in an account or in flight on a channel.
//! let held: i64 = snapshot.states().map(|(_, b)| *b).sum();
//! let moving: i64 = snapshot.channels().flat_map(|(_, log)| log.iter()).sum();
//! assert_eq!(held + moving, 300);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `cutline-core` | IDs, message envelope, snapshots, errors, seam traits |
//! | [`engine`] | `cutline-engine` | Recorder, process actors, links, assembly, cluster |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, traits, and IDs (`cutline-core`).
///
/// Contains the message envelope, recorded channel state, the global
/// snapshot, the error taxonomy, and the seam traits
/// ([`types::Channel`], [`types::LocalState`]).
pub use cutline_core as types;

/// Protocol runtime (`cutline-engine`).
///
/// [`engine::Recorder`] is the I/O-free marker state machine;
/// [`engine::Cluster`] runs one thread per process over crossbeam links.
pub use cutline_engine as engine;

/// Common imports for typical Cutline usage.
///
/// ```rust
/// use cutline::prelude::*;
/// ```
pub mod prelude {
    // Core types and traits
    pub use cutline_core::{
        ChannelId, GlobalSnapshot, LocalState, Message, ProcessId, ProcessRecord, SnapshotId,
    };

    // Errors
    pub use cutline_core::{ChannelError, InvalidTransition, ProtocolFault};

    // Engine
    pub use cutline_engine::{
        Cluster, ClusterConfig, ClusterError, ConfigError, Phase, ProcessStatus, Recorder,
        Topology,
    };
}
