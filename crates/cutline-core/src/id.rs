//! Strongly-typed identifiers for processes, snapshot rounds, and channels.

use std::fmt;

/// Identifies a process within a cluster.
///
/// Processes are registered when the cluster is built and assigned
/// sequential IDs. `ProcessId(n)` is the n-th process of the topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl From<u32> for ProcessId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Monotonically increasing snapshot round identifier.
///
/// [`SnapshotId::GENESIS`] denotes "no round yet" and is never used for
/// a real round; the first round is `SnapshotId(1)`. The same value is
/// used as the epoch tag of application messages (see
/// [`Message::epoch`](crate::Message::epoch)).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotId(pub u64);

impl SnapshotId {
    /// The epoch before any marker has been sent or received.
    pub const GENESIS: SnapshotId = SnapshotId(0);

    /// The id following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Whether this is [`SnapshotId::GENESIS`].
    pub fn is_genesis(self) -> bool {
        self == Self::GENESIS
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for SnapshotId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// A directed channel `from -> to`.
///
/// Channels are unidirectional; the reverse direction is a distinct
/// channel with its own FIFO order and its own recorded log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId {
    /// The sending process.
    pub from: ProcessId,
    /// The receiving process.
    pub to: ProcessId,
}

impl ChannelId {
    /// Build a channel id from a sender and a receiver.
    pub fn new(from: impl Into<ProcessId>, to: impl Into<ProcessId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// The channel carrying traffic in the opposite direction.
    pub fn reversed(self) -> Self {
        Self {
            from: self.to,
            to: self.from,
        }
    }

    /// Whether both ends name the same process.
    pub fn is_self_loop(self) -> bool {
        self.from == self.to
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}
