//! Runtime for the Cutline snapshot protocol.
//!
//! The pure marker state machine ([`Recorder`]) lives beside the threaded
//! runtime that drives it: one [`ProcessActor`] per process, FIFO
//! [`Link`]s between them, a [`TerminationDetector`] on the control plane
//! that feeds each round's [`SnapshotAssembler`], and the [`Cluster`]
//! registry that ties it together.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod assembler;
pub mod cluster;
pub mod config;
pub mod link;
pub mod metrics;
pub mod process;
pub mod recorder;
pub mod termination;

pub use assembler::SnapshotAssembler;
pub use cluster::{Cluster, ClusterError, ShutdownReport};
pub use config::{ClusterConfig, ConfigError, Topology};
pub use link::{link, Link};
pub use metrics::ProcessMetrics;
pub use process::{
    BoxChannel, Control, FaultReport, Mailbox, ProcessActor, ProcessEvent, ProcessStatus,
};
pub use recorder::{Delivery, Outbox, Phase, Recorder, Transition};
pub use termination::{RoundStatus, TerminationDetector, HISTORY_LIMIT};
