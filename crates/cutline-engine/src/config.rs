//! Cluster configuration, topology, and validation.
//!
//! [`ClusterConfig`] is the input to [`Cluster::spawn`](crate::cluster::Cluster::spawn).
//! [`validate()`](ClusterConfig::validate) checks the structural
//! requirements of the protocol before any thread is started.

use std::collections::VecDeque;
use std::time::Duration;

use indexmap::IndexSet;
use thiserror::Error;

use cutline_core::{ChannelId, ProcessId};

// ── Topology ─────────────────────────────────────────────────────

/// A fixed set of processes `p0..p{n-1}` and the directed channels
/// between them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    processes: u32,
    edges: Vec<ChannelId>,
}

impl Topology {
    /// Every ordered pair of distinct processes is connected.
    pub fn full_mesh(n: u32) -> Self {
        let edges = (0..n)
            .flat_map(|from| {
                (0..n)
                    .filter(move |&to| to != from)
                    .map(move |to| ChannelId::new(from, to))
            })
            .collect();
        Self { processes: n, edges }
    }

    /// `p{i} -> p{i+1}`, wrapping. A single process gets no edges.
    pub fn ring(n: u32) -> Self {
        let edges = if n < 2 {
            Vec::new()
        } else {
            (0..n).map(|i| ChannelId::new(i, (i + 1) % n)).collect()
        };
        Self { processes: n, edges }
    }

    /// A ring with channels in both directions.
    pub fn bidirectional_ring(n: u32) -> Self {
        let mut edges = IndexSet::new();
        if n >= 2 {
            for i in 0..n {
                let next = (i + 1) % n;
                edges.insert(ChannelId::new(i, next));
                edges.insert(ChannelId::new(next, i));
            }
        }
        Self {
            processes: n,
            edges: edges.into_iter().collect(),
        }
    }

    /// An explicit edge list. Not checked until
    /// [`ClusterConfig::validate`].
    pub fn from_edges(n: u32, edges: impl IntoIterator<Item = ChannelId>) -> Self {
        Self {
            processes: n,
            edges: edges.into_iter().collect(),
        }
    }

    /// Number of processes.
    pub fn process_count(&self) -> u32 {
        self.processes
    }

    /// Process ids in registration order.
    pub fn processes(&self) -> impl Iterator<Item = ProcessId> {
        (0..self.processes).map(ProcessId)
    }

    /// Directed channels, in declaration order.
    pub fn edges(&self) -> &[ChannelId] {
        &self.edges
    }

    /// Senders of `process`'s incoming channels.
    pub fn inbound(&self, process: ProcessId) -> Vec<ProcessId> {
        self.edges
            .iter()
            .filter(|c| c.to == process)
            .map(|c| c.from)
            .collect()
    }

    /// Receivers of `process`'s outgoing channels.
    pub fn outbound(&self, process: ProcessId) -> Vec<ProcessId> {
        self.edges
            .iter()
            .filter(|c| c.from == process)
            .map(|c| c.to)
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.processes == 0 {
            return Err(ConfigError::NoProcesses);
        }
        let mut seen = IndexSet::with_capacity(self.edges.len());
        for &channel in &self.edges {
            if channel.is_self_loop() {
                return Err(ConfigError::SelfLoop {
                    process: channel.from,
                });
            }
            if channel.from.0 >= self.processes || channel.to.0 >= self.processes {
                return Err(ConfigError::UnknownProcess { channel });
            }
            if !seen.insert(channel) {
                return Err(ConfigError::DuplicateChannel { channel });
            }
        }
        if let Some(process) = self
            .unreachable(false)
            .or_else(|| self.unreachable(true))
        {
            return Err(ConfigError::NotStronglyConnected { process });
        }
        Ok(())
    }

    /// First process not reached from `p0`, following edges forwards or
    /// (with `reversed`) backwards.
    fn unreachable(&self, reversed: bool) -> Option<ProcessId> {
        let n = self.processes as usize;
        let mut visited = vec![false; n];
        let mut queue = VecDeque::from([0usize]);
        visited[0] = true;
        while let Some(node) = queue.pop_front() {
            for c in &self.edges {
                let (src, dst) = if reversed { (c.to, c.from) } else { (c.from, c.to) };
                let dst = dst.0 as usize;
                if src.0 as usize == node && !visited[dst] {
                    visited[dst] = true;
                    queue.push_back(dst);
                }
            }
        }
        visited
            .iter()
            .position(|v| !v)
            .map(|i| ProcessId(i as u32))
    }
}

// ── ClusterConfig ────────────────────────────────────────────────

/// Configuration for a [`Cluster`](crate::cluster::Cluster).
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    /// Processes and channels.
    pub topology: Topology,
    /// Per-channel buffer size. `None` = unbounded. Default: `None`.
    pub channel_capacity: Option<usize>,
    /// Capacity of each process's control inbox. Default: 64.
    pub control_capacity: usize,
    /// Timeout of [`Cluster::await_snapshot`](crate::cluster::Cluster::await_snapshot).
    /// Default: 5s.
    pub default_wait: Duration,
}

impl ClusterConfig {
    /// Defaults around the given topology.
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            channel_capacity: None,
            control_capacity: 64,
            default_wait: Duration::from_secs(5),
        }
    }

    /// Defaults around a full mesh of `n` processes.
    pub fn full_mesh(n: u32) -> Self {
        Self::new(Topology::full_mesh(n))
    }

    /// Bound every channel's buffer.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    /// Change how long `await_snapshot` blocks.
    pub fn with_default_wait(mut self, wait: Duration) -> Self {
        self.default_wait = wait;
        self
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == Some(0) {
            return Err(ConfigError::ZeroChannelCapacity);
        }
        if self.control_capacity == 0 {
            return Err(ConfigError::ZeroControlCapacity);
        }
        self.topology.validate()
    }
}

// ── Error types ──────────────────────────────────────────────────

/// Errors detected during cluster configuration or startup.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The topology has no processes.
    #[error("topology has no processes")]
    NoProcesses,
    /// A channel connects a process to itself.
    #[error("self loop on {process}")]
    SelfLoop {
        /// The offending process.
        process: ProcessId,
    },
    /// A channel names a process outside the topology.
    #[error("channel {channel} names an unknown process")]
    UnknownProcess {
        /// The offending channel.
        channel: ChannelId,
    },
    /// A directed channel is declared twice.
    #[error("duplicate channel {channel}")]
    DuplicateChannel {
        /// The duplicated channel.
        channel: ChannelId,
    },
    /// `channel_capacity` is `Some(0)`.
    #[error("channel capacity must be at least 1")]
    ZeroChannelCapacity,
    /// `control_capacity` is zero.
    #[error("control inbox capacity must be at least 1")]
    ZeroControlCapacity,
    /// Markers from some initiator could never reach every process.
    #[error("topology is not strongly connected: {process} is cut off")]
    NotStronglyConnected {
        /// A process not mutually reachable with `p0`.
        process: ProcessId,
    },
    /// A process thread could not be spawned.
    #[error("failed to spawn thread: {reason}")]
    ThreadSpawnFailed {
        /// The underlying I/O error.
        reason: String,
    },
}
