//! Error types for the Cutline snapshot protocol.
//!
//! Organized by who is at fault: the channel ordering contract
//! ([`ProtocolFault`]), the caller ([`InvalidTransition`]), or the
//! transport itself ([`ChannelError`]).

use thiserror::Error;

use crate::id::{ChannelId, ProcessId, SnapshotId};

/// An incoming marker or message violated the FIFO / no-duplicate
/// assumption the protocol relies on.
///
/// A fault never mutates recorder state. It is reported upward because it
/// means the snapshot for the affected round cannot be trusted.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProtocolFault {
    /// Traffic arrived on a channel that is not part of the topology.
    #[error("{process} has no incoming channel from {peer}")]
    UnknownChannel {
        /// The receiving process.
        process: ProcessId,
        /// The claimed sender.
        peer: ProcessId,
    },
    /// The envelope's sender does not match the channel it arrived on.
    #[error("message on channel {channel} claims sender {claimed}")]
    SenderMismatch {
        /// The channel the message arrived on.
        channel: ChannelId,
        /// The sender named in the envelope.
        claimed: ProcessId,
    },
    /// A second marker for the same round arrived on the same channel.
    #[error("duplicate marker {snapshot} on channel {channel}")]
    DuplicateMarker {
        /// The channel carrying the duplicate.
        channel: ChannelId,
        /// The round named by both markers.
        snapshot: SnapshotId,
    },
    /// A marker for a round older than the receiver's current round.
    #[error("stale marker {snapshot} on channel {channel} (current round {current})")]
    StaleMarker {
        /// The channel carrying the marker.
        channel: ChannelId,
        /// The round named by the marker.
        snapshot: SnapshotId,
        /// The receiver's current round.
        current: SnapshotId,
    },
    /// A marker for a new round arrived while another round is recording.
    #[error("marker {incoming} on channel {channel} while round {active} is in progress")]
    ConcurrentRound {
        /// The channel carrying the marker.
        channel: ChannelId,
        /// The round currently recording.
        active: SnapshotId,
        /// The round named by the marker.
        incoming: SnapshotId,
    },
    /// An application message was sent after a marker the receiver has
    /// not seen yet: the marker was overtaken.
    #[error("message epoch {message_epoch} on {channel} is ahead of channel epoch {channel_epoch}")]
    MarkerOvertaken {
        /// The channel carrying the message.
        channel: ChannelId,
        /// Epoch stamped by the sender.
        message_epoch: SnapshotId,
        /// Last marker the receiver saw on this channel.
        channel_epoch: SnapshotId,
    },
    /// An application message sent before a marker arrived after it.
    #[error("message epoch {message_epoch} on {channel} lags channel epoch {channel_epoch}")]
    LateMessage {
        /// The channel carrying the message.
        channel: ChannelId,
        /// Epoch stamped by the sender.
        message_epoch: SnapshotId,
        /// Last marker the receiver saw on this channel.
        channel_epoch: SnapshotId,
    },
}

impl ProtocolFault {
    /// The channel the offending traffic arrived on.
    pub fn channel(&self) -> ChannelId {
        match self {
            Self::UnknownChannel { process, peer } => ChannelId::new(*peer, *process),
            Self::SenderMismatch { channel, .. }
            | Self::DuplicateMarker { channel, .. }
            | Self::StaleMarker { channel, .. }
            | Self::ConcurrentRound { channel, .. }
            | Self::MarkerOvertaken { channel, .. }
            | Self::LateMessage { channel, .. } => *channel,
        }
    }
}

/// A caller asked for something the protocol state does not allow.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InvalidTransition {
    /// `initiate` for a new round while another round is still recording.
    #[error("{process} cannot start round {requested}: round {active} is in progress")]
    RoundInProgress {
        /// The process asked to initiate.
        process: ProcessId,
        /// The round currently recording.
        active: SnapshotId,
        /// The round that was requested.
        requested: SnapshotId,
    },
    /// `initiate` with an id that is not newer than the last round.
    #[error("round {requested} is not newer than round {latest}")]
    StaleRound {
        /// The round that was requested.
        requested: SnapshotId,
        /// The newest round already entered.
        latest: SnapshotId,
    },
    /// `initiate` with [`SnapshotId::GENESIS`].
    #[error("the genesis epoch is not a snapshot round")]
    GenesisRound,
    /// `assemble` before every process reached `Done`.
    #[error("round {snapshot} is not complete: {} process(es) pending", pending.len())]
    NotComplete {
        /// The round that was requested.
        snapshot: SnapshotId,
        /// Processes that have not reported `Done`.
        pending: Vec<ProcessId>,
    },
    /// A completion record that does not belong to the round being assembled.
    #[error("unexpected record from {process} for round {snapshot}")]
    UnexpectedRecord {
        /// The reporting process.
        process: ProcessId,
        /// The round named by the record.
        snapshot: SnapshotId,
    },
}

/// A transport-level delivery failure.
///
/// The protocol never retries a send; retry and backoff belong to the
/// channel implementation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The channel buffer is at capacity.
    #[error("channel {channel} is full")]
    Full {
        /// The saturated channel.
        channel: ChannelId,
    },
    /// The receiving end is gone.
    #[error("channel {channel} is disconnected")]
    Disconnected {
        /// The disconnected channel.
        channel: ChannelId,
    },
    /// No such channel exists in the topology.
    #[error("no channel {channel} in the topology")]
    UnknownChannel {
        /// The requested channel.
        channel: ChannelId,
    },
}

impl ChannelError {
    /// The channel this error concerns.
    pub fn channel(&self) -> ChannelId {
        match self {
            Self::Full { channel }
            | Self::Disconnected { channel }
            | Self::UnknownChannel { channel } => *channel,
        }
    }
}
